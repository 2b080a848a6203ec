//! SQLite persistence layer for the Lightning wallet service.
//!
//! This crate stores users, wallets, API keys, payments and the append-only
//! ledger using SQLx with SQLite. Wallet balances are never stored; they are
//! derived from ledger entries.
//!
//! # Example
//!
//! ```no_run
//! use database::{Database, ledger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and run migrations
//!     let db = Database::connect("sqlite:wallet.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     let balance = ledger::balance(db.pool(), "wallet-id").await?;
//!     println!("balance: {balance} msat");
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod ledger;
pub mod models;
pub mod payment;
pub mod user;
pub mod validation;
pub mod wallet;

pub use error::{DatabaseError, Result};
pub use models::{
    ApiKey, EntryKind, KeyScope, LedgerEntry, NewInvoice, NewOutgoing, Payment, PaymentState,
    User, UserApp, Wallet, WalletKeys,
};
pub use payment::{Resolution, SettledInvoice, TransferOutcome};
pub use validation::ValidationError;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Database connection wrapper.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Default pool size for database connections.
    const DEFAULT_POOL_SIZE: u32 = 20;

    /// Connect to a SQLite database.
    ///
    /// The URL should be in the format `sqlite:path/to/db.sqlite?mode=rwc`.
    /// Use `?mode=rwc` to create the database file if it doesn't exist.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example() -> database::Result<()> {
    /// // File database
    /// let db = database::Database::connect("sqlite:data/wallet.db?mode=rwc").await?;
    ///
    /// // In-memory database (for testing)
    /// let db = database::Database::connect_with_pool_size("sqlite::memory:", 1).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Connect to a SQLite database with a custom pool size.
    ///
    /// Every connection to `sqlite::memory:` opens its own empty database, so
    /// in-memory databases must use a pool size of 1.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!(
            "Connected to database: {} (pool size: {})",
            url,
            pool_size
        );

        Ok(Self { pool })
    }

    /// Connect to a fresh, migrated in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let db = Self::connect_with_pool_size("sqlite::memory:", 1).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Run database migrations.
    ///
    /// This should be called once after connecting to ensure the schema is up to date.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::in_memory().await.unwrap()
    }

    fn keys(tag: &str) -> WalletKeys {
        WalletKeys {
            admin_key: format!("{tag}-admin"),
            invoice_key: format!("{tag}-invoice"),
        }
    }

    async fn seed_wallet(db: &Database, user_id: &str, wallet_id: &str) -> Wallet {
        let user = User {
            id: user_id.to_string(),
            created_at: 1,
        };
        let wallet = Wallet {
            id: wallet_id.to_string(),
            user_id: user_id.to_string(),
            name: "Main".to_string(),
            created_at: 1,
        };
        user::register_user(db.pool(), &user, &wallet, &keys(wallet_id))
            .await
            .unwrap();
        wallet
    }

    fn invoice(hash: &str, wallet_id: &str, amount: i64) -> NewInvoice {
        NewInvoice {
            payment_hash: hash.to_string(),
            wallet_id: wallet_id.to_string(),
            amount_msat: amount,
            payment_request: format!("lnbcrt{hash}"),
            memo: String::new(),
            expires_at: Some(10_000),
        }
    }

    fn outgoing(hash: &str, wallet_id: &str, amount: i64, reserve: i64) -> NewOutgoing {
        NewOutgoing {
            payment_hash: hash.to_string(),
            wallet_id: wallet_id.to_string(),
            amount_msat: amount,
            fee_reserve_msat: reserve,
            payment_request: format!("lnbcrt{hash}"),
            memo: String::new(),
        }
    }

    #[tokio::test]
    async fn test_user_and_wallets() {
        let db = test_db().await;
        let wallet = seed_wallet(&db, "u1", "w1").await;

        let fetched = user::get_user(db.pool(), "u1").await.unwrap();
        assert_eq!(fetched.id, "u1");

        let second = Wallet {
            id: "w2".to_string(),
            name: "Savings".to_string(),
            ..wallet.clone()
        };
        wallet::create_wallet(db.pool(), &second, &keys("w2")).await.unwrap();

        let wallets = wallet::list_wallets(db.pool(), "u1").await.unwrap();
        assert_eq!(wallets.len(), 2);

        wallet::rename_wallet(db.pool(), "w2", "Rainy day").await.unwrap();
        assert_eq!(wallet::get_wallet(db.pool(), "w2").await.unwrap().name, "Rainy day");

        let missing = wallet::rename_wallet(db.pool(), "nope", "x").await;
        assert!(matches!(missing, Err(DatabaseError::NotFound { .. })));

        assert_eq!(user::count_users(db.pool()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_key_resolution_and_rotation() {
        let db = test_db().await;
        let wallet = seed_wallet(&db, "u1", "w1").await;

        let found = wallet::find_key(db.pool(), "w1-admin").await.unwrap().unwrap();
        assert_eq!(found.scope, KeyScope::Admin);
        assert_eq!(found.wallet_id, "w1");
        assert!(wallet::find_key(db.pool(), "W1-ADMIN").await.unwrap().is_none());

        wallet::rotate_keys(db.pool(), &wallet, &keys("rotated")).await.unwrap();
        assert!(wallet::find_key(db.pool(), "w1-admin").await.unwrap().is_none());
        let key = wallet::wallet_key(db.pool(), "w1", KeyScope::Invoice).await.unwrap();
        assert_eq!(key, "rotated-invoice");
    }

    #[tokio::test]
    async fn test_apps_are_deduplicated() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "w1").await;

        user::add_app(db.pool(), "u1", "https://a.example", 5).await.unwrap();
        user::add_app(db.pool(), "u1", "https://a.example", 6).await.unwrap();
        user::add_app(db.pool(), "u1", "https://b.example", 7).await.unwrap();

        let apps = user::list_apps(db.pool(), "u1").await.unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].app_url, "https://a.example");
    }

    #[tokio::test]
    async fn test_debit_requires_balance() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "w1").await;

        assert!(ledger::debit(db.pool(), "w1", "h0", 1, 1).await.unwrap().is_none());
        assert_eq!(ledger::balance(db.pool(), "w1").await.unwrap(), 0);

        ledger::credit(db.pool(), "w1", "h1", 1_000, 1).await.unwrap();
        let debit = ledger::debit(db.pool(), "w1", "h2", 1_000, 2).await.unwrap().unwrap();
        assert_eq!(debit.amount_msat, -1_000);
        assert_eq!(ledger::balance(db.pool(), "w1").await.unwrap(), 0);

        let again = ledger::debit(db.pool(), "w1", "h2", 0, 3).await;
        assert!(matches!(again, Err(DatabaseError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_credit_and_reversal_are_idempotent() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "w1").await;

        let (first, created) = ledger::credit(db.pool(), "w1", "h1", 500, 1).await.unwrap();
        assert!(created);
        let (second, created) = ledger::credit(db.pool(), "w1", "h1", 500, 2).await.unwrap();
        assert!(!created);
        assert_eq!(first, second);

        ledger::debit(db.pool(), "w1", "h2", 300, 3).await.unwrap().unwrap();
        let (_, created) = ledger::reverse(db.pool(), "h2", 4).await.unwrap().unwrap();
        assert!(created);
        let (_, created) = ledger::reverse(db.pool(), "h2", 5).await.unwrap().unwrap();
        assert!(!created);
        assert!(ledger::reverse(db.pool(), "unknown", 5).await.unwrap().is_none());

        assert_eq!(ledger::balance(db.pool(), "w1").await.unwrap(), 500);
        assert_eq!(ledger::entries_for_hash(db.pool(), "h2").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ledger_is_append_only() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "w1").await;
        ledger::credit(db.pool(), "w1", "h1", 500, 1).await.unwrap();

        let update = sqlx::query("UPDATE ledger_entries SET amount_msat = 1")
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM ledger_entries").execute(db.pool()).await;
        assert!(delete.is_err());
        assert_eq!(ledger::balance(db.pool(), "w1").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_settle_invoice_once() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "w1").await;
        payment::insert_invoice(db.pool(), &invoice("h1", "w1", 2_000), 1)
            .await
            .unwrap();

        let dup = payment::insert_invoice(db.pool(), &invoice("h1", "w1", 2_000), 1).await;
        assert!(matches!(dup, Err(DatabaseError::AlreadyExists { .. })));

        let first = payment::settle_invoice(db.pool(), "h1", 9_999, 2).await.unwrap().unwrap();
        assert!(first.newly_settled);
        assert_eq!(first.credit.amount_msat, 2_000);
        assert_eq!(first.payment.state, PaymentState::Settled);

        let second = payment::settle_invoice(db.pool(), "h1", 2_000, 3).await.unwrap().unwrap();
        assert!(!second.newly_settled);
        assert_eq!(ledger::balance(db.pool(), "w1").await.unwrap(), 2_000);

        assert!(payment::settle_invoice(db.pool(), "nope", 1, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_invoices_exclude_settled() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "w1").await;
        for hash in ["h1", "h2"] {
            payment::insert_invoice(db.pool(), &invoice(hash, "w1", 1_000), 1)
                .await
                .unwrap();
        }
        payment::settle_invoice(db.pool(), "h1", 1_000, 2).await.unwrap();

        let open = payment::list_open_invoices(db.pool()).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].payment_hash, "h2");
        assert!(!open[0].outgoing);
    }

    #[tokio::test]
    async fn test_zero_amount_invoice_takes_settled_amount() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "w1").await;
        payment::insert_invoice(db.pool(), &invoice("h1", "w1", 0), 1)
            .await
            .unwrap();

        let settled = payment::settle_invoice(db.pool(), "h1", 4_200, 2).await.unwrap().unwrap();
        assert_eq!(settled.payment.amount_msat, 4_200);
        assert_eq!(ledger::balance(db.pool(), "w1").await.unwrap(), 4_200);
    }

    #[tokio::test]
    async fn test_outgoing_confirm_refunds_unused_reserve() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "w1").await;
        ledger::credit(db.pool(), "w1", "funding", 10_000, 1).await.unwrap();

        let debit = payment::open_outgoing(db.pool(), &outgoing("p1", "w1", 5_000, 2_000), 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(debit.amount_msat, -7_000);

        let resolution = Resolution::Confirmed {
            fee_msat: 500,
            preimage: Some("00".repeat(32)),
        };
        let resolved = payment::resolve_outgoing(db.pool(), "p1", &resolution, 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.state, PaymentState::Confirmed);
        assert_eq!(resolved.fee_msat, 500);
        assert_eq!(ledger::balance(db.pool(), "w1").await.unwrap(), 4_500);

        // Second resolution is a no-op.
        let failed = Resolution::Failed {
            reason: "late".to_string(),
        };
        assert!(payment::resolve_outgoing(db.pool(), "p1", &failed, 4)
            .await
            .unwrap()
            .is_none());
        assert_eq!(ledger::balance(db.pool(), "w1").await.unwrap(), 4_500);
    }

    #[tokio::test]
    async fn test_outgoing_failure_restores_balance() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "w1").await;
        ledger::credit(db.pool(), "w1", "funding", 10_000, 1).await.unwrap();

        payment::open_outgoing(db.pool(), &outgoing("p1", "w1", 5_000, 2_000), 2)
            .await
            .unwrap()
            .unwrap();
        assert!(payment::mark_indeterminate(db.pool(), "p1", 3).await.unwrap());
        assert_eq!(payment::list_unresolved_outgoing(db.pool()).await.unwrap().len(), 1);

        let failed = Resolution::Failed {
            reason: "RouteNotFound".to_string(),
        };
        let resolved = payment::resolve_outgoing(db.pool(), "p1", &failed, 4)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.state, PaymentState::Failed);
        assert_eq!(ledger::balance(db.pool(), "w1").await.unwrap(), 10_000);
        assert!(payment::list_unresolved_outgoing(db.pool()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_outgoing_insufficient_writes_nothing() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "w1").await;
        ledger::credit(db.pool(), "w1", "funding", 6_000, 1).await.unwrap();

        let opened = payment::open_outgoing(db.pool(), &outgoing("p1", "w1", 5_000, 2_000), 2)
            .await
            .unwrap();
        assert!(opened.is_none());
        assert!(payment::get_payment(db.pool(), "p1", true).await.unwrap().is_none());
        assert_eq!(ledger::balance(db.pool(), "w1").await.unwrap(), 6_000);
    }

    #[tokio::test]
    async fn test_internal_transfer() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "payer").await;
        seed_wallet(&db, "u2", "payee").await;
        ledger::credit(db.pool(), "payer", "funding", 3_000, 1).await.unwrap();
        payment::insert_invoice(db.pool(), &invoice("h1", "payee", 2_000), 1)
            .await
            .unwrap();

        let outcome = payment::transfer_internal(db.pool(), &outgoing("h1", "payer", 2_000, 0), 2)
            .await
            .unwrap();
        assert!(matches!(outcome, TransferOutcome::Completed { .. }));
        assert_eq!(ledger::balance(db.pool(), "payer").await.unwrap(), 1_000);
        assert_eq!(ledger::balance(db.pool(), "payee").await.unwrap(), 2_000);

        let again = payment::transfer_internal(db.pool(), &outgoing("h1", "payer", 2_000, 0), 3)
            .await
            .unwrap();
        assert!(matches!(again, TransferOutcome::InvoiceNotOpen));
    }

    #[tokio::test]
    async fn test_internal_transfer_insufficient_rolls_back() {
        let db = test_db().await;
        seed_wallet(&db, "u1", "payer").await;
        seed_wallet(&db, "u2", "payee").await;
        payment::insert_invoice(db.pool(), &invoice("h1", "payee", 2_000), 1)
            .await
            .unwrap();

        let outcome = payment::transfer_internal(db.pool(), &outgoing("h1", "payer", 2_000, 0), 2)
            .await
            .unwrap();
        assert!(matches!(outcome, TransferOutcome::InsufficientBalance));

        let invoice = payment::get_payment(db.pool(), "h1", false).await.unwrap().unwrap();
        assert_eq!(invoice.state, PaymentState::Created);
    }
}
