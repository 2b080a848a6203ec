//! Per-wallet serialized access to the ledger.
//!
//! Every mutation of a wallet's entries runs under that wallet's async mutex.
//! Different wallets proceed concurrently. The SQL underneath also refuses
//! overdrafts on its own, so the lock only orders writers within this process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use database::models::now;
use database::{
    ledger, payment, Database, EntryKind, LedgerEntry, NewOutgoing, Payment, Resolution,
    SettledInvoice, TransferOutcome,
};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::error::{PaymentError, Result};

type WalletLock = Arc<tokio::sync::Mutex<()>>;

/// A credit and whether it was newly written.
#[derive(Debug, Clone)]
pub struct Credit {
    pub entry: LedgerEntry,
    /// False when a credit for the payment hash already existed.
    pub created: bool,
}

/// Balance-checked, idempotent access to the append-only ledger.
#[derive(Clone)]
pub struct Ledger {
    db: Database,
    locks: Arc<Mutex<HashMap<String, WalletLock>>>,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn wallet_lock(&self, wallet_id: &str) -> WalletLock {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(wallet_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Take a wallet's mutation lock.
    pub async fn lock(&self, wallet_id: &str) -> OwnedMutexGuard<()> {
        self.wallet_lock(wallet_id).lock_owned().await
    }

    /// Take two wallets' locks in a fixed order.
    async fn lock_pair(
        &self,
        a: &str,
        b: &str,
    ) -> (OwnedMutexGuard<()>, Option<OwnedMutexGuard<()>>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, Some(second))
    }

    /// Current balance: the sum of the wallet's entries.
    pub async fn balance(&self, wallet_id: &str) -> Result<i64> {
        Ok(ledger::balance(self.db.pool(), wallet_id).await?)
    }

    /// Entries of a wallet, oldest first.
    pub async fn entries(&self, wallet_id: &str) -> Result<Vec<LedgerEntry>> {
        Ok(ledger::list_entries(self.db.pool(), wallet_id).await?)
    }

    /// Credit a settlement. An existing credit for the hash is returned
    /// unchanged.
    pub async fn credit(&self, wallet_id: &str, amount_msat: i64, payment_hash: &str) -> Result<Credit> {
        if amount_msat <= 0 {
            return Err(PaymentError::InvalidAmount(format!(
                "credit must be positive, got {amount_msat}"
            )));
        }

        let _guard = self.lock(wallet_id).await;
        let (entry, created) =
            ledger::credit(self.db.pool(), wallet_id, payment_hash, amount_msat, now()).await?;
        Ok(Credit { entry, created })
    }

    /// Debit `amount_msat` if the balance covers it. Nothing is written
    /// otherwise.
    pub async fn debit(&self, wallet_id: &str, amount_msat: i64, payment_hash: &str) -> Result<LedgerEntry> {
        if amount_msat <= 0 {
            return Err(PaymentError::InvalidAmount(format!(
                "debit must be positive, got {amount_msat}"
            )));
        }

        let _guard = self.lock(wallet_id).await;
        ledger::debit(self.db.pool(), wallet_id, payment_hash, amount_msat, now())
            .await?
            .ok_or(PaymentError::InsufficientBalance {
                required_msat: amount_msat,
            })
    }

    /// Append the compensating credit for a hash's debit, at most once.
    pub async fn reverse(&self, payment_hash: &str) -> Result<LedgerEntry> {
        let debit = ledger::entries_for_hash(self.db.pool(), payment_hash)
            .await?
            .into_iter()
            .find(|entry| entry.kind == EntryKind::Debit)
            .ok_or_else(|| PaymentError::NotFound(format!("debit {payment_hash}")))?;

        let _guard = self.lock(&debit.wallet_id).await;
        let (reversal, _) = ledger::reverse(self.db.pool(), payment_hash, now())
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("debit {payment_hash}")))?;
        Ok(reversal)
    }

    /// Return unused fee reserve, at most once per hash.
    pub async fn refund_fee(&self, wallet_id: &str, amount_msat: i64, payment_hash: &str) -> Result<Credit> {
        if amount_msat <= 0 {
            return Err(PaymentError::InvalidAmount(format!(
                "refund must be positive, got {amount_msat}"
            )));
        }

        let _guard = self.lock(wallet_id).await;
        let (entry, created) =
            ledger::refund_fee(self.db.pool(), wallet_id, payment_hash, amount_msat, now()).await?;
        Ok(Credit { entry, created })
    }

    /// Hold `amount + fee reserve` and record the payment as sent.
    pub(crate) async fn open_outgoing(&self, outgoing: &NewOutgoing) -> Result<LedgerEntry> {
        let _guard = self.lock(&outgoing.wallet_id).await;
        let debit = payment::open_outgoing(self.db.pool(), outgoing, now())
            .await?
            .ok_or(PaymentError::InsufficientBalance {
                required_msat: outgoing.amount_msat + outgoing.fee_reserve_msat,
            })?;
        debug!(
            wallet_id = %outgoing.wallet_id,
            payment_hash = %outgoing.payment_hash,
            held_msat = -debit.amount_msat,
            "outgoing payment opened"
        );
        Ok(debit)
    }

    /// Apply the final outcome of an outgoing payment. `None` if it was
    /// already resolved.
    pub(crate) async fn resolve_outgoing(
        &self,
        wallet_id: &str,
        payment_hash: &str,
        resolution: &Resolution,
    ) -> Result<Option<Payment>> {
        let _guard = self.lock(wallet_id).await;
        Ok(payment::resolve_outgoing(self.db.pool(), payment_hash, resolution, now()).await?)
    }

    /// Credit an incoming invoice and mark it settled.
    pub(crate) async fn settle_invoice(
        &self,
        wallet_id: &str,
        payment_hash: &str,
        settled_amount_msat: i64,
    ) -> Result<Option<SettledInvoice>> {
        let _guard = self.lock(wallet_id).await;
        Ok(payment::settle_invoice(self.db.pool(), payment_hash, settled_amount_msat, now()).await?)
    }

    /// Settle a local invoice of `payee_wallet_id` from the payer's wallet.
    pub(crate) async fn transfer_internal(
        &self,
        payee_wallet_id: &str,
        outgoing: &NewOutgoing,
    ) -> Result<TransferOutcome> {
        let _guards = self.lock_pair(&outgoing.wallet_id, payee_wallet_id).await;
        Ok(payment::transfer_internal(self.db.pool(), outgoing, now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use database::models::{User, Wallet, WalletKeys};
    use database::user;

    async fn setup() -> (Ledger, String) {
        let db = Database::in_memory().await.unwrap();
        let user = User {
            id: "u1".to_string(),
            created_at: 0,
        };
        let wallet = Wallet {
            id: "w1".to_string(),
            user_id: "u1".to_string(),
            name: "main".to_string(),
            created_at: 0,
        };
        let keys = WalletKeys {
            admin_key: "a".repeat(64),
            invoice_key: "b".repeat(64),
        };
        user::register_user(db.pool(), &user, &wallet, &keys).await.unwrap();
        (Ledger::new(db), "w1".to_string())
    }

    #[tokio::test]
    async fn test_credit_is_idempotent() {
        let (ledger, wallet) = setup().await;

        let first = ledger.credit(&wallet, 5_000, "h1").await.unwrap();
        let second = ledger.credit(&wallet, 5_000, "h1").await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.entry.id, second.entry.id);
        assert_eq!(ledger.balance(&wallet).await.unwrap(), 5_000);
    }

    #[tokio::test]
    async fn test_debit_needs_cover() {
        let (ledger, wallet) = setup().await;
        ledger.credit(&wallet, 1_000, "in").await.unwrap();

        assert!(matches!(
            ledger.debit(&wallet, 1_001, "out").await,
            Err(PaymentError::InsufficientBalance { required_msat: 1_001 })
        ));
        assert_eq!(ledger.balance(&wallet).await.unwrap(), 1_000);

        ledger.debit(&wallet, 1_000, "out").await.unwrap();
        assert_eq!(ledger.balance(&wallet).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reverse_once() {
        let (ledger, wallet) = setup().await;
        ledger.credit(&wallet, 1_000, "in").await.unwrap();
        ledger.debit(&wallet, 600, "out").await.unwrap();

        let first = ledger.reverse("out").await.unwrap();
        let second = ledger.reverse("out").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.amount_msat, 600);
        assert_eq!(ledger.balance(&wallet).await.unwrap(), 1_000);

        assert!(matches!(
            ledger.reverse("missing").await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() {
        let (ledger, wallet) = setup().await;
        ledger.credit(&wallet, 1_000, "in").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..10 {
            let ledger = ledger.clone();
            let wallet = wallet.clone();
            tasks.push(tokio::spawn(async move {
                ledger.debit(&wallet, 300, &format!("out-{i}")).await.is_ok()
            }));
        }

        let mut succeeded = 0;
        for task in tasks {
            if task.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 3);
        assert_eq!(ledger.balance(&wallet).await.unwrap(), 100);
    }
}
