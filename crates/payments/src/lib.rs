//! # Payments
//!
//! The payment engine of the wallet service.
//!
//! - [`access`]: API key → identity resolution and scope checks
//! - [`ledger`]: per-wallet serialized, balance-checked ledger access
//! - [`engine`]: invoices, outgoing payments, settlement handling
//! - [`lifecycle`]: derived payment statuses and fee reserves
//! - [`lnurl`]: lnurl-pay, lnurl-withdraw and lnurl-auth flows
//! - [`accounts`]: users, wallets, keys, apps
//!
//! Outgoing payments debit `amount + fee reserve` before the node is asked
//! to pay. A confirmed payment refunds the unused reserve; a definite failure
//! reverses the debit; an unknown outcome leaves the debit in place and is
//! reconciled against the node in the background.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use database::Database;
//! use lightning_backend::FakeBackend;
//! use payments::{Accounts, EngineConfig, PaymentEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::in_memory().await?;
//! let engine = PaymentEngine::new(db.clone(), Arc::new(FakeBackend::new()?), EngineConfig::default());
//! engine.start()?;
//!
//! let accounts = Accounts::new(db, engine.ledger().clone(), "Main");
//! let registration = accounts.register(None).await?;
//!
//! let invoice = engine
//!     .create_invoice(&registration.wallet.wallet.id, 21_000, "coffee", None)
//!     .await?;
//! println!("{}", invoice.payment_request);
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod accounts;
mod config;
pub mod engine;
mod error;
pub mod ledger;
pub mod lifecycle;
pub mod lnurl;
mod reconcile;
pub mod runtime;
mod settlement;

pub use crate::access::{AccessControl, Identity};
pub use crate::accounts::{Accounts, Registration, UserInfo, WalletCredentials, WalletInfo};
pub use crate::config::{EngineConfig, ReconcileConfig};
pub use crate::engine::PaymentEngine;
pub use crate::error::{PaymentError, Result};
pub use crate::ledger::{Credit, Ledger};
pub use crate::lifecycle::{PayResult, PaymentView, Status};
pub use crate::lnurl::{LnurlPayResult, LnurlService, LoginResult};
pub use crate::runtime::Shutdown;

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
