//! Scriptable in-process backend.
//!
//! Signs real (regtest) bolt11 invoices with a local node key, settles them
//! on demand and lets callers script the outcome of outgoing payments.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use futures::stream;
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};
use tokio::sync::mpsc;
use tracing::debug;

use crate::bolt11;
use crate::error::{BackendError, Result};
use crate::{
    CreateInvoiceParams, CreatedInvoice, FailureReason, InvoiceStatus, LightningBackend, NodeInfo,
    PayOutcome, PaymentStatus, Settlement, SettlementStream,
};

/// What the fake node does when asked to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakePayBehavior {
    /// Pay and report `fee_msat` as the routing fee.
    Succeed { fee_msat: u64 },
    /// Fail definitively.
    Fail(FailureReason),
    /// Never answer. The payment stays pending until scripted otherwise.
    Hang,
    /// Answer with a transport error; the outcome stays pending.
    Error,
}

enum Description<'a> {
    Direct(&'a str),
    Hashed(&'a str),
}

struct IssuedInvoice {
    amount_msat: u64,
}

struct FakeState {
    issued: HashMap<String, IssuedInvoice>,
    settled: HashMap<String, u64>,
    behaviors: HashMap<String, FakePayBehavior>,
    default_behavior: FakePayBehavior,
    payments: HashMap<String, PaymentStatus>,
    attempts: Vec<String>,
}

/// In-process fake node.
pub struct FakeBackend {
    secp: Secp256k1<bitcoin::secp256k1::All>,
    secret_key: SecretKey,
    state: Mutex<FakeState>,
    settlements: mpsc::UnboundedSender<Settlement>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Settlement>>>,
}

impl FakeBackend {
    /// Create a fake node with a fresh random node key.
    pub fn new() -> Result<Self> {
        let secret_key = SecretKey::from_slice(&rand::random::<[u8; 32]>())
            .map_err(|e| BackendError::Config(format!("fake node key: {e}")))?;
        let (settlements, receiver) = mpsc::unbounded_channel();

        Ok(Self {
            secp: Secp256k1::new(),
            secret_key,
            state: Mutex::new(FakeState {
                issued: HashMap::new(),
                settled: HashMap::new(),
                behaviors: HashMap::new(),
                default_behavior: FakePayBehavior::Succeed { fee_msat: 0 },
                payments: HashMap::new(),
                attempts: Vec::new(),
            }),
            settlements,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Node public key (hex).
    pub fn pubkey(&self) -> String {
        PublicKey::from_secret_key(&self.secp, &self.secret_key).to_string()
    }

    /// Sign an invoice without registering it as payable to this node.
    ///
    /// Useful for producing "remote" invoices in tests.
    pub fn sign_invoice(
        &self,
        amount_msat: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<CreatedInvoice> {
        let preimage = rand::random::<[u8; 32]>();
        self.sign_with_preimage(
            amount_msat,
            Description::Direct(memo),
            expiry_secs,
            &preimage,
        )
    }

    /// Like [`FakeBackend::sign_invoice`], but commits to `sha256(description)`
    /// instead of embedding it, as lnurl-pay services do with their metadata.
    pub fn sign_invoice_with_description_hash(
        &self,
        amount_msat: u64,
        description: &str,
        expiry_secs: u64,
    ) -> Result<CreatedInvoice> {
        let preimage = rand::random::<[u8; 32]>();
        self.sign_with_preimage(
            amount_msat,
            Description::Hashed(description),
            expiry_secs,
            &preimage,
        )
    }

    fn sign_with_preimage(
        &self,
        amount_msat: u64,
        description: Description<'_>,
        expiry_secs: u64,
        preimage: &[u8; 32],
    ) -> Result<CreatedInvoice> {
        let payment_hash = sha256::Hash::hash(preimage);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| BackendError::Protocol(format!("system clock before epoch: {e}")))?;

        let builder = InvoiceBuilder::new(Currency::Regtest);
        let builder = match description {
            Description::Direct(memo) => builder.description(memo.to_string()),
            Description::Hashed(text) => {
                builder.description_hash(sha256::Hash::hash(text.as_bytes()))
            }
        };
        let mut builder = builder
            .payment_hash(payment_hash)
            .payment_secret(PaymentSecret(rand::random()))
            .duration_since_epoch(timestamp)
            .min_final_cltv_expiry_delta(144)
            .expiry_time(Duration::from_secs(expiry_secs));
        if amount_msat > 0 {
            builder = builder.amount_milli_satoshis(amount_msat);
        }

        let invoice = builder
            .build_signed(|message| self.secp.sign_ecdsa_recoverable(message, &self.secret_key))
            .map_err(|e| BackendError::Protocol(format!("failed to sign invoice: {e}")))?;

        let expires_at = invoice
            .expires_at()
            .map(|d| d.as_secs() as i64)
            .unwrap_or(i64::MAX);

        Ok(CreatedInvoice {
            payment_hash: payment_hash.to_string(),
            payment_request: invoice.to_string(),
            expires_at,
        })
    }

    /// Settle an invoice this node issued, for its own amount.
    ///
    /// Returns false for unknown hashes and for zero-amount invoices (use
    /// [`FakeBackend::settle_with_amount`] for those).
    pub fn settle(&self, payment_hash: &str) -> bool {
        let amount = match self.state().issued.get(payment_hash) {
            Some(issued) if issued.amount_msat > 0 => issued.amount_msat,
            _ => return false,
        };
        self.push_settlement(Settlement {
            payment_hash: payment_hash.to_string(),
            amount_msat: amount,
            fee_msat: 0,
        });
        true
    }

    /// Settle an invoice for an arbitrary amount.
    pub fn settle_with_amount(&self, payment_hash: &str, amount_msat: u64) {
        self.push_settlement(Settlement {
            payment_hash: payment_hash.to_string(),
            amount_msat,
            fee_msat: 0,
        });
    }

    /// Record an invoice as paid without emitting a settlement, as if the
    /// payment arrived while nobody was listening.
    pub fn mark_settled(&self, payment_hash: &str, amount_msat: u64) {
        self.state()
            .settled
            .insert(payment_hash.to_string(), amount_msat);
    }

    /// Emit a raw settlement, e.g. a duplicate delivery.
    pub fn push_settlement(&self, settlement: Settlement) {
        debug!(payment_hash = %settlement.payment_hash, "fake settlement");
        self.mark_settled(&settlement.payment_hash, settlement.amount_msat);
        // The receiver lives as long as the stream; a closed stream just drops it.
        let _ = self.settlements.send(settlement);
    }

    /// Script the outcome of paying a specific payment hash.
    pub fn set_pay_behavior(&self, payment_hash: &str, behavior: FakePayBehavior) {
        self.state()
            .behaviors
            .insert(payment_hash.to_string(), behavior);
    }

    /// Script the outcome of every payment without a specific behavior.
    pub fn set_default_pay_behavior(&self, behavior: FakePayBehavior) {
        self.state().default_behavior = behavior;
    }

    /// Set what `lookup_payment` reports for a hash.
    pub fn set_payment_status(&self, payment_hash: &str, status: PaymentStatus) {
        self.state()
            .payments
            .insert(payment_hash.to_string(), status);
    }

    /// Payment hashes `pay_invoice` was called with, in call order.
    pub fn pay_attempts(&self) -> Vec<String> {
        self.state().attempts.clone()
    }
}

#[async_trait]
impl LightningBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn get_info(&self) -> Result<NodeInfo> {
        Ok(NodeInfo {
            alias: "fake".to_string(),
            pubkey: self.pubkey(),
            balance_msat: 0,
        })
    }

    async fn create_invoice(&self, params: CreateInvoiceParams) -> Result<CreatedInvoice> {
        let preimage = rand::random::<[u8; 32]>();
        let invoice = self.sign_with_preimage(
            params.amount_msat,
            Description::Direct(&params.memo),
            params.expiry_secs,
            &preimage,
        )?;

        self.state().issued.insert(
            invoice.payment_hash.clone(),
            IssuedInvoice {
                amount_msat: params.amount_msat,
            },
        );

        Ok(invoice)
    }

    async fn pay_invoice(&self, payment_request: &str, _max_fee_msat: u64) -> Result<PayOutcome> {
        let decoded = bolt11::decode(payment_request)?;
        let hash = decoded.payment_hash;

        let behavior = {
            let mut state = self.state();
            state.attempts.push(hash.clone());
            let behavior = state
                .behaviors
                .get(&hash)
                .cloned()
                .unwrap_or_else(|| state.default_behavior.clone());

            let status = match &behavior {
                FakePayBehavior::Succeed { fee_msat } => PaymentStatus::Succeeded {
                    preimage: hex::encode(rand::random::<[u8; 32]>()),
                    fee_msat: *fee_msat,
                },
                FakePayBehavior::Fail(reason) => PaymentStatus::Failed(*reason),
                FakePayBehavior::Hang | FakePayBehavior::Error => PaymentStatus::Pending,
            };
            state.payments.entry(hash.clone()).or_insert(status);
            behavior
        };

        match behavior {
            FakePayBehavior::Succeed { .. } => match self.state().payments.get(&hash) {
                Some(PaymentStatus::Succeeded { preimage, fee_msat }) => Ok(PayOutcome::Succeeded {
                    preimage: preimage.clone(),
                    fee_msat: *fee_msat,
                }),
                _ => Err(BackendError::Protocol(format!(
                    "payment {hash} already attempted with a different outcome"
                ))),
            },
            FakePayBehavior::Fail(reason) => Ok(PayOutcome::Failed(reason)),
            FakePayBehavior::Hang => {
                futures::future::pending::<()>().await;
                Err(BackendError::Unavailable("unreachable".to_string()))
            }
            FakePayBehavior::Error => Err(BackendError::Protocol(
                "connection reset while paying".to_string(),
            )),
        }
    }

    async fn lookup_payment(&self, payment_hash: &str) -> Result<PaymentStatus> {
        Ok(self
            .state()
            .payments
            .get(payment_hash)
            .cloned()
            .unwrap_or(PaymentStatus::Unknown))
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<InvoiceStatus> {
        let state = self.state();
        if let Some(amount_msat) = state.settled.get(payment_hash) {
            return Ok(InvoiceStatus::Settled {
                amount_msat: *amount_msat,
            });
        }
        Ok(if state.issued.contains_key(payment_hash) {
            InvoiceStatus::Open
        } else {
            InvoiceStatus::Unknown
        })
    }

    fn subscribe_settlements(&self) -> Result<SettlementStream> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(BackendError::AlreadySubscribed)?;

        Ok(Box::pin(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|settlement| (settlement, receiver))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn params(amount_msat: u64) -> CreateInvoiceParams {
        CreateInvoiceParams {
            amount_msat,
            memo: "test".to_string(),
            expiry_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_settle_issued_invoice() {
        let backend = FakeBackend::new().unwrap();
        let mut settlements = backend.subscribe_settlements().unwrap();

        let invoice = backend.create_invoice(params(5_000)).await.unwrap();
        assert!(backend.settle(&invoice.payment_hash));
        assert!(!backend.settle("unknown"));

        let settlement = settlements.next().await.unwrap();
        assert_eq!(settlement.payment_hash, invoice.payment_hash);
        assert_eq!(settlement.amount_msat, 5_000);
    }

    #[tokio::test]
    async fn test_invoice_timestamp_is_now() {
        let backend = FakeBackend::new().unwrap();
        let before = chrono::Utc::now().timestamp();
        let invoice = backend.create_invoice(params(1_000)).await.unwrap();
        let after = chrono::Utc::now().timestamp();

        assert!(invoice.expires_at >= before + 3600);
        assert!(invoice.expires_at <= after + 3600);

        let decoded = bolt11::decode(&invoice.payment_request).unwrap();
        assert_eq!(decoded.expires_at, invoice.expires_at);
        assert!(!decoded.is_expired_at(after));
    }

    #[tokio::test]
    async fn test_lookup_invoice() {
        let backend = FakeBackend::new().unwrap();
        let streamed = backend.create_invoice(params(1_000)).await.unwrap();
        let missed = backend.create_invoice(params(0)).await.unwrap();

        assert_eq!(
            backend.lookup_invoice(&streamed.payment_hash).await.unwrap(),
            InvoiceStatus::Open
        );
        assert!(backend.settle(&streamed.payment_hash));
        backend.mark_settled(&missed.payment_hash, 777);

        assert_eq!(
            backend.lookup_invoice(&streamed.payment_hash).await.unwrap(),
            InvoiceStatus::Settled { amount_msat: 1_000 }
        );
        assert_eq!(
            backend.lookup_invoice(&missed.payment_hash).await.unwrap(),
            InvoiceStatus::Settled { amount_msat: 777 }
        );
        assert_eq!(backend.lookup_invoice("ff").await.unwrap(), InvoiceStatus::Unknown);
    }

    #[tokio::test]
    async fn test_subscribe_only_once() {
        let backend = FakeBackend::new().unwrap();
        let _stream = backend.subscribe_settlements().unwrap();
        assert!(matches!(
            backend.subscribe_settlements(),
            Err(BackendError::AlreadySubscribed)
        ));
    }

    #[tokio::test]
    async fn test_scripted_pay_outcomes() {
        let remote = FakeBackend::new().unwrap();
        let backend = FakeBackend::new().unwrap();

        let ok = remote.sign_invoice(1_000, "ok", 600).unwrap();
        backend.set_pay_behavior(&ok.payment_hash, FakePayBehavior::Succeed { fee_msat: 7 });
        let outcome = backend.pay_invoice(&ok.payment_request, 100).await.unwrap();
        assert!(matches!(outcome, PayOutcome::Succeeded { fee_msat: 7, .. }));

        let bad = remote.sign_invoice(1_000, "bad", 600).unwrap();
        backend.set_pay_behavior(
            &bad.payment_hash,
            FakePayBehavior::Fail(FailureReason::RouteNotFound),
        );
        let outcome = backend.pay_invoice(&bad.payment_request, 100).await.unwrap();
        assert_eq!(outcome, PayOutcome::Failed(FailureReason::RouteNotFound));
        assert_eq!(
            backend.lookup_payment(&bad.payment_hash).await.unwrap(),
            PaymentStatus::Failed(FailureReason::RouteNotFound)
        );

        assert_eq!(backend.pay_attempts(), vec![ok.payment_hash, bad.payment_hash]);
    }

    #[tokio::test]
    async fn test_hang_never_returns() {
        let remote = FakeBackend::new().unwrap();
        let backend = FakeBackend::new().unwrap();
        backend.set_default_pay_behavior(FakePayBehavior::Hang);

        let invoice = remote.sign_invoice(1_000, "slow", 600).unwrap();
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            backend.pay_invoice(&invoice.payment_request, 10),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(
            backend.lookup_payment(&invoice.payment_hash).await.unwrap(),
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_get_info_reports_node_key() {
        let backend = FakeBackend::new().unwrap();
        let info = backend.get_info().await.unwrap();
        assert_eq!(info.pubkey.len(), 66);
    }
}
