//! Settlement ingestion.
//!
//! One task drains the backend's settlement stream into a bounded queue;
//! a fixed set of workers applies each settlement to the ledger. A settlement
//! that fails to apply is retried until it lands. Everything stops on shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lightning_backend::{Settlement, SettlementStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::PaymentEngine;
use crate::error::Result;
use crate::runtime::Shutdown;

const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

pub(crate) fn spawn_ingestion(engine: PaymentEngine, stream: SettlementStream) -> Vec<JoinHandle<()>> {
    let config = engine.config();
    let (sender, receiver) = mpsc::channel(config.settlement_queue_size.max(1));
    let receiver = Arc::new(Mutex::new(receiver));

    let mut handles = vec![tokio::spawn(ingest(engine.clone(), stream, sender))];
    for worker in 0..config.settlement_workers.max(1) {
        handles.push(tokio::spawn(work(engine.clone(), worker, receiver.clone())));
    }
    handles
}

async fn ingest(engine: PaymentEngine, mut stream: SettlementStream, sender: mpsc::Sender<Settlement>) {
    let shutdown = engine.shutdown_handle().clone();

    loop {
        let next = tokio::select! {
            _ = shutdown.wait() => break,
            next = stream.next() => next,
        };

        let Some(settlement) = next else {
            warn!("settlement stream ended");
            break;
        };

        debug!(payment_hash = %settlement.payment_hash, "settlement received");
        tokio::select! {
            _ = shutdown.wait() => break,
            sent = sender.send(settlement) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    info!("settlement ingestion stopped");
}

async fn work(engine: PaymentEngine, worker: usize, receiver: Arc<Mutex<mpsc::Receiver<Settlement>>>) {
    let shutdown = engine.shutdown_handle().clone();

    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = shutdown.wait() => None,
                next = receiver.recv() => next,
            }
        };

        let Some(settlement) = next else {
            break;
        };

        let applied = apply_with_retry(&shutdown, &settlement.payment_hash, || {
            engine.handle_settlement(settlement.clone())
        })
        .await;
        if !applied {
            break;
        }
    }

    debug!(worker, "settlement worker stopped");
}

/// Run `apply` until it succeeds, backing off between attempts.
///
/// Returns false if shutdown came first.
async fn apply_with_retry<F, Fut>(shutdown: &Shutdown, payment_hash: &str, mut apply: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut delay = RETRY_INITIAL_DELAY;
    let mut attempt = 1u32;
    loop {
        let error = match apply().await {
            Ok(()) => return true,
            Err(e) => e,
        };
        error!(
            payment_hash = %payment_hash,
            attempt,
            error = %error,
            retry_in_ms = delay.as_millis() as u64,
            "failed to apply settlement"
        );

        tokio::select! {
            _ = shutdown.wait() => {
                warn!(payment_hash = %payment_hash, "shutdown before settlement was applied");
                return false;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = delay.saturating_mul(2).min(RETRY_MAX_DELAY);
        attempt = attempt.saturating_add(1);
    }
}
