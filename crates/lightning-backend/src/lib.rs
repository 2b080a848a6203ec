//! # Lightning Backend
//!
//! One capability set over heterogeneous Lightning node implementations.
//! The wallet service talks to exactly one backend, chosen by name through a
//! [`BackendRegistry`] once at startup.
//!
//! ## Capabilities
//!
//! - `get_info()` - node alias, pubkey and spendable balance
//! - `create_invoice()` - issue a bolt11 invoice
//! - `pay_invoice()` - pay a bolt11 invoice with a fee ceiling
//! - `lookup_payment()` - outcome of an earlier payment attempt
//! - `lookup_invoice()` - whether an issued invoice has been paid
//! - `subscribe_settlements()` - lazy, infinite stream of incoming settlements
//!
//! ## Example
//!
//! ```no_run
//! use lightning_backend::{BackendConfig, BackendRegistry, CreateInvoiceParams};
//!
//! # async fn example() -> lightning_backend::Result<()> {
//! let registry = BackendRegistry::with_defaults();
//! let backend = registry.build("fake", &BackendConfig::default())?;
//!
//! let invoice = backend
//!     .create_invoice(CreateInvoiceParams {
//!         amount_msat: 21_000,
//!         memo: "coffee".to_string(),
//!         expiry_secs: 3600,
//!     })
//!     .await?;
//! println!("{}", invoice.payment_request);
//! # Ok(())
//! # }
//! ```

pub mod bolt11;
mod config;
mod error;
pub mod fake;
pub mod lnd;
mod registry;
mod void;

pub use bolt11::DecodedInvoice;
pub use config::{BackendConfig, LndConfig};
pub use error::{BackendError, Result};
pub use fake::{FakeBackend, FakePayBehavior};
pub use lnd::LndBackend;
pub use registry::{BackendConstructor, BackendRegistry};
pub use void::VoidBackend;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

/// Information about the connected node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub alias: String,
    pub pubkey: String,
    /// Spendable channel balance in millisatoshis.
    pub balance_msat: u64,
}

/// Parameters for creating an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInvoiceParams {
    /// Zero means "any amount".
    pub amount_msat: u64,
    pub memo: String,
    pub expiry_secs: u64,
}

/// An invoice issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInvoice {
    /// Hex-encoded payment hash.
    pub payment_hash: String,
    /// bolt11 string.
    pub payment_request: String,
    /// Unix timestamp (seconds).
    pub expires_at: i64,
}

/// Why a payment definitively did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureReason {
    RouteNotFound,
    InsufficientNodeLiquidity,
    Rejected,
    /// The request never reached the node.
    Unreachable,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::RouteNotFound => "RouteNotFound",
            FailureReason::InsufficientNodeLiquidity => "InsufficientNodeLiquidity",
            FailureReason::Rejected => "Rejected",
            FailureReason::Unreachable => "Unreachable",
        }
    }

    /// Best-effort classification of a node's failure message.
    pub fn from_message(message: &str) -> Self {
        let message = message.to_ascii_lowercase();
        if message.contains("no_route")
            || message.contains("no route")
            || message.contains("unable to find a path")
            || message.contains("failure_reason_no_route")
        {
            FailureReason::RouteNotFound
        } else if message.contains("insufficient") || message.contains("liquidity") {
            FailureReason::InsufficientNodeLiquidity
        } else {
            FailureReason::Rejected
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed `pay_invoice` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayOutcome {
    Succeeded {
        /// Hex-encoded preimage.
        preimage: String,
        fee_msat: u64,
    },
    Failed(FailureReason),
}

/// Outcome of an earlier payment attempt as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Succeeded { preimage: String, fee_msat: u64 },
    Failed(FailureReason),
    /// Still in flight.
    Pending,
    /// The node has no record of the payment.
    Unknown,
}

/// State of an invoice this node issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceStatus {
    /// Not paid yet.
    Open,
    Settled { amount_msat: u64 },
    /// Canceled by the node. It can no longer be paid.
    Canceled,
    /// The node has no record of the invoice.
    Unknown,
}

/// An incoming payment confirmed by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub payment_hash: String,
    pub amount_msat: u64,
    pub fee_msat: u64,
}

/// Lazy, infinite stream of settlements.
pub type SettlementStream = BoxStream<'static, Settlement>;

/// A Lightning node the wallet service can drive.
#[async_trait]
pub trait LightningBackend: Send + Sync {
    /// Registry name of this backend.
    fn name(&self) -> &str;

    /// Node information. Called once at startup to verify connectivity.
    async fn get_info(&self) -> Result<NodeInfo>;

    /// Issue an invoice.
    async fn create_invoice(&self, params: CreateInvoiceParams) -> Result<CreatedInvoice>;

    /// Pay a bolt11 invoice, spending at most `max_fee_msat` in fees.
    ///
    /// Callers bound this with their own timeout. An error for which
    /// [`BackendError::is_definite`] is false means the outcome is unknown.
    async fn pay_invoice(&self, payment_request: &str, max_fee_msat: u64) -> Result<PayOutcome>;

    /// Look up the outcome of an earlier `pay_invoice` call.
    async fn lookup_payment(&self, payment_hash: &str) -> Result<PaymentStatus>;

    /// Look up an invoice this node issued, for settlements the stream missed.
    async fn lookup_invoice(&self, payment_hash: &str) -> Result<InvoiceStatus>;

    /// Take the settlement stream. Can only be called once per backend.
    fn subscribe_settlements(&self) -> Result<SettlementStream>;
}

/// Get the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
