#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use database::Database;
use lightning_backend::{FakeBackend, LightningBackend, Settlement};
use payments::{AccessControl, Accounts, EngineConfig, PaymentEngine, ReconcileConfig, Status};

pub struct Harness {
    pub db: Database,
    pub backend: Arc<FakeBackend>,
    pub engine: PaymentEngine,
    pub accounts: Accounts,
    pub access: AccessControl,
}

pub struct TestWallet {
    pub id: String,
    pub user_id: String,
    pub admin_key: String,
    pub invoice_key: String,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        payment_timeout: Duration::from_millis(200),
        backend_timeout: Duration::from_secs(2),
        settlement_workers: 2,
        reconcile: ReconcileConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            give_up_after: Duration::from_secs(60),
        },
        ..EngineConfig::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: EngineConfig) -> Harness {
    let db = Database::in_memory().await.unwrap();
    let backend = Arc::new(FakeBackend::new().unwrap());
    let dyn_backend: Arc<dyn LightningBackend> = backend.clone();
    let engine = PaymentEngine::new(db.clone(), dyn_backend, config);
    let accounts = Accounts::new(db.clone(), engine.ledger().clone(), "Test Wallet");
    let access = AccessControl::new(db.clone());

    Harness {
        db,
        backend,
        engine,
        accounts,
        access,
    }
}

impl Harness {
    pub async fn wallet(&self) -> TestWallet {
        let registration = self.accounts.register(None).await.unwrap();
        TestWallet {
            id: registration.wallet.wallet.id.clone(),
            user_id: registration.user.id.clone(),
            admin_key: registration.wallet.admin_key.clone(),
            invoice_key: registration.wallet.invoice_key.clone(),
        }
    }

    /// Fund a wallet through a settled invoice.
    pub async fn fund(&self, wallet_id: &str, amount_msat: u64) {
        let invoice = self
            .engine
            .create_invoice(wallet_id, amount_msat, "funding", None)
            .await
            .unwrap();
        self.engine
            .handle_settlement(Settlement {
                payment_hash: invoice.payment_hash,
                amount_msat,
                fee_msat: 0,
            })
            .await
            .unwrap();
    }

    pub async fn balance(&self, wallet_id: &str) -> i64 {
        self.engine.ledger().balance(wallet_id).await.unwrap()
    }

    /// A bolt11 invoice of some other node.
    pub fn remote_invoice(&self, amount_msat: u64) -> (String, String) {
        let invoice = self.backend.sign_invoice(amount_msat, "remote", 600).unwrap();
        (invoice.payment_hash, invoice.payment_request)
    }

    /// Poll until a payment reaches `status`.
    pub async fn wait_for_status(&self, wallet_id: &str, payment_hash: &str, status: Status) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let current = self.engine.payment(wallet_id, payment_hash).await.unwrap();
            if current.status == status {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "payment stuck in {:?}, expected {:?}",
                current.status,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
