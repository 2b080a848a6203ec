//! Background resolution of payments whose outcome is unknown.
//!
//! A reconciler asks the node about one payment hash with exponential
//! backoff until the node reports a final outcome, the give-up horizon
//! passes, or the engine shuts down. It never reverses a debit on its own:
//! only a node-reported failure does.

use std::time::Instant;

use database::Resolution;
use lightning_backend::PaymentStatus;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::PaymentEngine;

pub(crate) fn spawn(engine: PaymentEngine, wallet_id: String, payment_hash: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        run(&engine, &wallet_id, &payment_hash).await;
        engine.reconcile_finished(&payment_hash);
    })
}

async fn run(engine: &PaymentEngine, wallet_id: &str, payment_hash: &str) {
    let config = engine.config().reconcile.clone();
    let backend_timeout = engine.config().backend_timeout;
    let shutdown = engine.shutdown_handle().clone();
    let started = Instant::now();

    debug!(payment_hash = %payment_hash, "reconciling payment");

    for attempt in 0u32.. {
        let delay = config.delay_for_attempt(attempt);
        if started.elapsed() + delay > config.give_up_after {
            warn!(
                wallet_id = %wallet_id,
                payment_hash = %payment_hash,
                attempts = attempt,
                "giving up on reconciliation, payment stays indeterminate"
            );
            return;
        }

        tokio::select! {
            _ = shutdown.wait() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let status = match tokio::time::timeout(
            backend_timeout,
            engine.backend().lookup_payment(payment_hash),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!(payment_hash = %payment_hash, error = %e, attempt, "payment lookup failed");
                continue;
            }
            Err(_) => {
                warn!(payment_hash = %payment_hash, attempt, "payment lookup timed out");
                continue;
            }
        };

        let resolved = match status {
            PaymentStatus::Succeeded { preimage, fee_msat } => {
                engine
                    .reconcile_confirmed(wallet_id, payment_hash, fee_msat, preimage)
                    .await
            }
            PaymentStatus::Failed(reason) => {
                let resolution = Resolution::Failed {
                    reason: reason.as_str().to_string(),
                };
                engine.resolve(wallet_id, payment_hash, &resolution).await
            }
            unresolved @ (PaymentStatus::Pending | PaymentStatus::Unknown) => {
                debug!(payment_hash = %payment_hash, attempt, status = ?unresolved, "payment still unresolved");
                continue;
            }
        };

        match resolved {
            Ok(payment) => {
                info!(
                    payment_hash = %payment_hash,
                    state = payment.state.as_str(),
                    "reconciled payment"
                );
                return;
            }
            Err(e) => {
                warn!(payment_hash = %payment_hash, error = %e, "failed to apply reconciled outcome");
            }
        }
    }
}
