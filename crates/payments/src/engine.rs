//! The payment engine: invoices, outgoing payments and their ledger effects.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use database::models::now;
use database::validation::validate_memo;
use database::{payment, Database, NewInvoice, NewOutgoing, Payment, Resolution, TransferOutcome};
use lightning_backend::{
    bolt11, BackendError, CreateInvoiceParams, DecodedInvoice, FailureReason, InvoiceStatus,
    LightningBackend, PayOutcome, Settlement,
};
use notifier::{EventState, Notifier, PaymentEvent};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{PaymentError, Result};
use crate::ledger::Ledger;
use crate::lifecycle::{fee_reserve, PayResult, PaymentView, Status};
use crate::runtime::Shutdown;
use crate::{reconcile, settlement};

/// Default number of payments returned by [`PaymentEngine::list_payments`].
pub const DEFAULT_LIST_LIMIT: i64 = 100;

struct Inner {
    db: Database,
    backend: Arc<dyn LightningBackend>,
    ledger: Ledger,
    notifier: Notifier,
    config: EngineConfig,
    shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    reconciling: Mutex<HashSet<String>>,
}

/// Drives invoices and outgoing payments against one backend.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PaymentEngine {
    inner: Arc<Inner>,
}

impl PaymentEngine {
    pub fn new(db: Database, backend: Arc<dyn LightningBackend>, config: EngineConfig) -> Self {
        let notifier = Notifier::new(config.notifier_buffer);
        Self {
            inner: Arc::new(Inner {
                ledger: Ledger::new(db.clone()),
                db,
                backend,
                notifier,
                config,
                shutdown: Shutdown::new(),
                tasks: Mutex::new(Vec::new()),
                reconciling: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn backend(&self) -> &Arc<dyn LightningBackend> {
        &self.inner.backend
    }

    pub fn ledger(&self) -> &Ledger {
        &self.inner.ledger
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn shutdown_handle(&self) -> &Shutdown {
        &self.inner.shutdown
    }

    /// Start settlement ingestion. Call once.
    pub fn start(&self) -> Result<()> {
        let stream = self.inner.backend.subscribe_settlements()?;
        let handles = settlement::spawn_ingestion(self.clone(), stream);
        for handle in handles {
            self.track(handle);
        }
        info!(
            backend = self.inner.backend.name(),
            workers = self.inner.config.settlement_workers,
            "settlement ingestion started"
        );
        Ok(())
    }

    /// Mark every unresolved outgoing payment indeterminate and reconcile it.
    ///
    /// Meant for startup, before any new payment is sent.
    pub async fn resume_pending(&self) -> Result<usize> {
        let pending = payment::list_unresolved_outgoing(self.inner.db.pool()).await?;
        for p in &pending {
            payment::mark_indeterminate(self.inner.db.pool(), &p.payment_hash, now()).await?;
            self.schedule_reconcile(&p.wallet_id, &p.payment_hash);
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "resuming unresolved outgoing payments");
        }
        Ok(pending.len())
    }

    /// Credit open invoices the node reports as paid.
    ///
    /// Catches settlements that happened while nothing was subscribed. Returns
    /// the number of invoices credited.
    pub async fn sync_invoices(&self) -> Result<usize> {
        let open = payment::list_open_invoices(self.inner.db.pool()).await?;
        let mut credited = 0;
        for invoice in &open {
            let lookup = tokio::time::timeout(
                self.inner.config.backend_timeout,
                self.inner.backend.lookup_invoice(&invoice.payment_hash),
            )
            .await;
            let amount_msat = match lookup {
                Ok(Ok(InvoiceStatus::Settled { amount_msat })) => amount_msat,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    warn!(payment_hash = %invoice.payment_hash, error = %e, "invoice lookup failed");
                    continue;
                }
                Err(_) => {
                    warn!(payment_hash = %invoice.payment_hash, "invoice lookup timed out");
                    continue;
                }
            };

            self.handle_settlement(Settlement {
                payment_hash: invoice.payment_hash.clone(),
                amount_msat,
                fee_msat: 0,
            })
            .await?;
            credited += 1;
        }
        if credited > 0 {
            info!(checked = open.len(), credited, "credited invoices paid while offline");
        }
        Ok(credited)
    }

    /// Stop background tasks and end every event subscription.
    pub async fn shutdown(&self) {
        self.inner.shutdown.trigger();
        self.inner.notifier.close();

        let handles: Vec<_> = self.tasks().drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("background task did not stop in time");
            }
        }
        info!("payment engine stopped");
    }

    /// Issue an invoice for `wallet_id`. A zero amount means "any amount".
    pub async fn create_invoice(
        &self,
        wallet_id: &str,
        amount_msat: u64,
        memo: &str,
        expiry: Option<Duration>,
    ) -> Result<PaymentView> {
        validate_memo(memo)?;
        if amount_msat > i64::MAX as u64 {
            return Err(PaymentError::InvalidAmount(format!("{amount_msat} msat is too large")));
        }

        let expiry = expiry.unwrap_or(self.inner.config.invoice_expiry);
        let params = CreateInvoiceParams {
            amount_msat,
            memo: memo.to_string(),
            expiry_secs: expiry.as_secs().max(1),
        };

        let created = tokio::time::timeout(
            self.inner.config.backend_timeout,
            self.inner.backend.create_invoice(params),
        )
        .await
        .map_err(|_| PaymentError::BackendUnavailable("create_invoice timed out".to_string()))??;

        let invoice = NewInvoice {
            payment_hash: created.payment_hash.clone(),
            wallet_id: wallet_id.to_string(),
            amount_msat: amount_msat as i64,
            payment_request: created.payment_request,
            memo: memo.to_string(),
            expires_at: Some(created.expires_at),
        };
        payment::insert_invoice(self.inner.db.pool(), &invoice, now()).await?;

        info!(
            wallet_id = %wallet_id,
            payment_hash = %created.payment_hash,
            amount_msat,
            "invoice created"
        );

        self.payment(wallet_id, &created.payment_hash).await
    }

    /// A wallet's payment by hash.
    pub async fn payment(&self, wallet_id: &str, payment_hash: &str) -> Result<PaymentView> {
        let payment = payment::get_wallet_payment(self.inner.db.pool(), wallet_id, payment_hash).await?;
        Ok(PaymentView::new(payment, now()))
    }

    /// A wallet's payments, newest first.
    pub async fn list_payments(&self, wallet_id: &str, limit: Option<i64>) -> Result<Vec<PaymentView>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 1000);
        let now = now();
        Ok(payment::list_wallet_payments(self.inner.db.pool(), wallet_id, limit)
            .await?
            .into_iter()
            .map(|p| PaymentView::new(p, now))
            .collect())
    }

    /// Apply a settlement reported by the backend.
    ///
    /// Unknown hashes are ignored. Applying the same settlement again credits
    /// nothing and publishes nothing.
    pub async fn handle_settlement(&self, settlement: Settlement) -> Result<()> {
        let Some(invoice) =
            payment::get_payment(self.inner.db.pool(), &settlement.payment_hash, false).await?
        else {
            debug!(payment_hash = %settlement.payment_hash, "settlement for unknown invoice ignored");
            return Ok(());
        };

        let now = now();
        if invoice.state == database::PaymentState::Created
            && invoice.expires_at.is_some_and(|expires_at| now >= expires_at)
        {
            warn!(
                wallet_id = %invoice.wallet_id,
                payment_hash = %invoice.payment_hash,
                "settlement arrived after invoice expiry, crediting anyway"
            );
        }
        if invoice.amount_msat > 0 && (settlement.amount_msat as i64) < invoice.amount_msat {
            warn!(
                payment_hash = %invoice.payment_hash,
                invoice_msat = invoice.amount_msat,
                settled_msat = settlement.amount_msat,
                "settled amount below invoice amount"
            );
        }

        let Some(settled) = self
            .inner
            .ledger
            .settle_invoice(
                &invoice.wallet_id,
                &settlement.payment_hash,
                settlement.amount_msat as i64,
            )
            .await?
        else {
            return Ok(());
        };

        if !settled.newly_settled {
            debug!(payment_hash = %settlement.payment_hash, "duplicate settlement ignored");
            return Ok(());
        }

        info!(
            wallet_id = %settled.payment.wallet_id,
            payment_hash = %settled.payment.payment_hash,
            amount_msat = settled.credit.amount_msat,
            "invoice settled"
        );
        self.publish(&settled.payment, EventState::Settled);
        Ok(())
    }

    /// Pay a bolt11 invoice from `wallet_id`.
    ///
    /// Returns `Confirmed`, or `Indeterminate` when the node did not give a
    /// definite answer in time; the debit then stands and the payment is
    /// reconciled in the background. Definite failures are reversed and
    /// returned as [`PaymentError::PaymentFailed`].
    pub async fn pay_invoice(&self, wallet_id: &str, payment_request: &str) -> Result<PayResult> {
        let decoded = bolt11::decode(payment_request)?;
        let amount_msat = match decoded.amount_msat {
            Some(amount) if amount > 0 && amount <= i64::MAX as u64 => amount,
            Some(amount) if amount > 0 => {
                return Err(PaymentError::InvalidAmount(format!("{amount} msat is too large")))
            }
            _ => {
                return Err(PaymentError::InvalidPaymentRequest(
                    "invoices without an amount cannot be paid".to_string(),
                ))
            }
        };
        if decoded.is_expired_at(now()) {
            return Err(PaymentError::InvalidPaymentRequest("invoice has expired".to_string()));
        }

        let pool = self.inner.db.pool();
        if payment::get_payment(pool, &decoded.payment_hash, true).await?.is_some() {
            return Err(PaymentError::DuplicatePayment(decoded.payment_hash));
        }

        if let Some(invoice) = payment::get_payment(pool, &decoded.payment_hash, false).await? {
            return self
                .pay_internal(wallet_id, invoice, &decoded, payment_request, amount_msat)
                .await;
        }

        let config = &self.inner.config;
        let reserve = fee_reserve(amount_msat, config.reserve_fee_min_msat, config.reserve_fee_percent);
        let outgoing = NewOutgoing {
            payment_hash: decoded.payment_hash.clone(),
            wallet_id: wallet_id.to_string(),
            amount_msat: amount_msat as i64,
            fee_reserve_msat: reserve as i64,
            payment_request: payment_request.trim().to_string(),
            memo: decoded.description.clone().unwrap_or_default(),
        };
        self.inner.ledger.open_outgoing(&outgoing).await?;

        info!(
            wallet_id = %wallet_id,
            payment_hash = %outgoing.payment_hash,
            amount_msat,
            fee_reserve_msat = reserve,
            "sending payment"
        );

        // The send runs in its own task so that dropping the caller cannot
        // abandon a payment between debit and outcome.
        let engine = self.clone();
        let send = tokio::spawn(async move { engine.send(outgoing).await });
        send.await
            .map_err(|e| PaymentError::Internal(format!("payment task failed: {e}")))?
    }

    async fn send(&self, outgoing: NewOutgoing) -> Result<PayResult> {
        let attempt = tokio::time::timeout(
            self.inner.config.payment_timeout,
            self.inner
                .backend
                .pay_invoice(&outgoing.payment_request, outgoing.fee_reserve_msat as u64),
        )
        .await;

        let hash = &outgoing.payment_hash;
        let wallet_id = &outgoing.wallet_id;

        let failure = match attempt {
            Ok(Ok(PayOutcome::Succeeded { preimage, fee_msat })) => {
                let resolution = self.confirmation(&outgoing, fee_msat, Some(preimage));
                let payment = self.resolve(wallet_id, hash, &resolution).await?;
                return Ok(pay_result(&payment));
            }
            Ok(Ok(PayOutcome::Failed(reason))) => reason,
            Ok(Err(e)) if e.is_definite() => {
                warn!(payment_hash = %hash, error = %e, "backend refused payment");
                match e {
                    BackendError::InvalidPaymentRequest(_) | BackendError::InvalidAmount(_) => {
                        FailureReason::Rejected
                    }
                    _ => FailureReason::Unreachable,
                }
            }
            Ok(Err(e)) => {
                warn!(payment_hash = %hash, error = %e, "payment outcome unknown");
                return self.leave_indeterminate(&outgoing).await;
            }
            Err(_) => {
                warn!(
                    payment_hash = %hash,
                    timeout_secs = self.inner.config.payment_timeout.as_secs(),
                    "payment timed out, outcome unknown"
                );
                return self.leave_indeterminate(&outgoing).await;
            }
        };

        let resolution = Resolution::Failed {
            reason: failure.as_str().to_string(),
        };
        self.resolve(wallet_id, hash, &resolution).await?;
        Err(PaymentError::PaymentFailed(failure))
    }

    async fn leave_indeterminate(&self, outgoing: &NewOutgoing) -> Result<PayResult> {
        payment::mark_indeterminate(self.inner.db.pool(), &outgoing.payment_hash, now()).await?;
        self.schedule_reconcile(&outgoing.wallet_id, &outgoing.payment_hash);

        Ok(PayResult {
            payment_hash: outgoing.payment_hash.clone(),
            status: Status::Indeterminate,
            amount_msat: outgoing.amount_msat,
            fee_msat: 0,
            preimage: None,
            internal: false,
        })
    }

    fn confirmation(&self, outgoing: &NewOutgoing, fee_msat: u64, preimage: Option<String>) -> Resolution {
        let fee_msat = fee_msat.min(i64::MAX as u64) as i64;
        if fee_msat > outgoing.fee_reserve_msat {
            warn!(
                payment_hash = %outgoing.payment_hash,
                fee_msat,
                fee_reserve_msat = outgoing.fee_reserve_msat,
                "routing fee above reserve, charging the reserve"
            );
        }
        Resolution::Confirmed { fee_msat, preimage }
    }

    /// Apply a final outcome and publish it. Already-resolved payments are
    /// returned as they are.
    pub(crate) async fn resolve(
        &self,
        wallet_id: &str,
        payment_hash: &str,
        resolution: &Resolution,
    ) -> Result<Payment> {
        match self
            .inner
            .ledger
            .resolve_outgoing(wallet_id, payment_hash, resolution)
            .await?
        {
            Some(payment) => {
                let state = match resolution {
                    Resolution::Confirmed { .. } => EventState::Confirmed,
                    Resolution::Failed { .. } => EventState::Failed,
                };
                info!(
                    wallet_id = %wallet_id,
                    payment_hash = %payment_hash,
                    state = payment.state.as_str(),
                    fee_msat = payment.fee_msat,
                    "outgoing payment resolved"
                );
                self.publish(&payment, state);
                Ok(payment)
            }
            None => payment::get_payment(self.inner.db.pool(), payment_hash, true)
                .await?
                .ok_or_else(|| PaymentError::NotFound(format!("Payment {payment_hash}"))),
        }
    }

    /// Confirm an outgoing payment found by reconciliation.
    pub(crate) async fn reconcile_confirmed(
        &self,
        wallet_id: &str,
        payment_hash: &str,
        fee_msat: u64,
        preimage: String,
    ) -> Result<Payment> {
        let pending = payment::get_payment(self.inner.db.pool(), payment_hash, true)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {payment_hash}")))?;
        let outgoing = NewOutgoing {
            payment_hash: pending.payment_hash,
            wallet_id: pending.wallet_id,
            amount_msat: pending.amount_msat,
            fee_reserve_msat: pending.fee_reserve_msat,
            payment_request: pending.payment_request,
            memo: pending.memo,
        };
        let resolution = self.confirmation(&outgoing, fee_msat, Some(preimage));
        self.resolve(wallet_id, payment_hash, &resolution).await
    }

    async fn pay_internal(
        &self,
        wallet_id: &str,
        invoice: Payment,
        decoded: &DecodedInvoice,
        payment_request: &str,
        amount_msat: u64,
    ) -> Result<PayResult> {
        if invoice.wallet_id == wallet_id {
            return Err(PaymentError::InvalidPaymentRequest(
                "cannot pay an invoice of the same wallet".to_string(),
            ));
        }

        let outgoing = NewOutgoing {
            payment_hash: decoded.payment_hash.clone(),
            wallet_id: wallet_id.to_string(),
            amount_msat: amount_msat as i64,
            fee_reserve_msat: 0,
            payment_request: payment_request.trim().to_string(),
            memo: invoice.memo.clone(),
        };

        match self
            .inner
            .ledger
            .transfer_internal(&invoice.wallet_id, &outgoing)
            .await?
        {
            TransferOutcome::Completed { invoice, .. } => {
                info!(
                    payer = %wallet_id,
                    payee = %invoice.wallet_id,
                    payment_hash = %invoice.payment_hash,
                    amount_msat,
                    "internal payment settled"
                );
                self.publish(&invoice, EventState::Settled);
                self.inner.notifier.publish(PaymentEvent::new(
                    wallet_id,
                    &outgoing.payment_hash,
                    EventState::Confirmed,
                    outgoing.amount_msat,
                    0,
                ));
                Ok(PayResult {
                    payment_hash: outgoing.payment_hash,
                    status: Status::Confirmed,
                    amount_msat: outgoing.amount_msat,
                    fee_msat: 0,
                    preimage: None,
                    internal: true,
                })
            }
            TransferOutcome::InsufficientBalance => Err(PaymentError::InsufficientBalance {
                required_msat: outgoing.amount_msat,
            }),
            TransferOutcome::InvoiceNotOpen => Err(PaymentError::InvalidPaymentRequest(
                "invoice is no longer open".to_string(),
            )),
        }
    }

    fn publish(&self, payment: &Payment, state: EventState) {
        let delivered = self.inner.notifier.publish(PaymentEvent::new(
            &payment.wallet_id,
            &payment.payment_hash,
            state,
            payment.amount_msat,
            payment.fee_msat,
        ));
        debug!(payment_hash = %payment.payment_hash, delivered, "event published");
    }

    /// Start a reconciler for a payment unless one is already running.
    pub(crate) fn schedule_reconcile(&self, wallet_id: &str, payment_hash: &str) {
        if self.inner.shutdown.is_triggered() {
            return;
        }
        let inserted = self
            .inner
            .reconciling
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(payment_hash.to_string());
        if !inserted {
            return;
        }

        let handle = reconcile::spawn(self.clone(), wallet_id.to_string(), payment_hash.to_string());
        self.track(handle);
    }

    pub(crate) fn reconcile_finished(&self, payment_hash: &str) {
        self.inner
            .reconciling
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(payment_hash);
    }

    /// Number of payments currently being reconciled.
    pub fn reconciling_count(&self) -> usize {
        self.inner
            .reconciling
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

fn pay_result(payment: &Payment) -> PayResult {
    PayResult {
        payment_hash: payment.payment_hash.clone(),
        status: Status::of(payment, now()),
        amount_msat: payment.amount_msat,
        fee_msat: payment.fee_msat,
        preimage: payment.preimage.clone(),
        internal: false,
    }
}

impl std::fmt::Debug for PaymentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentEngine")
            .field("backend", &self.inner.backend.name())
            .finish_non_exhaustive()
    }
}

