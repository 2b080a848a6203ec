//! Error types for payment engine operations.

use database::{DatabaseError, KeyScope, ValidationError};
use lightning_backend::{BackendError, FailureReason};
use lnurl::LnurlError;
use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Every variant has a stable [`PaymentError::kind`] that clients can match on.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Startup or wiring problem.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing, malformed or unknown key.
    #[error("invalid or missing api key")]
    Unauthorized,

    /// The key is valid but its scope is too narrow.
    #[error("this operation needs the {} key", .required.as_str())]
    Forbidden { required: KeyScope },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount outside a remote LNURL service's advertised bounds.
    #[error("amount {amount_msat} msat outside [{min_msat}, {max_msat}]")]
    AmountOutOfBounds {
        amount_msat: u64,
        min_msat: u64,
        max_msat: u64,
    },

    #[error("invalid payment request: {0}")]
    InvalidPaymentRequest(String),

    #[error("insufficient balance: {required_msat} msat required")]
    InsufficientBalance { required_msat: i64 },

    /// The payment hash was already paid by this service.
    #[error("payment {0} was already attempted")]
    DuplicatePayment(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The node definitively failed the payment. The debit was reversed.
    #[error("payment failed: {0}")]
    PaymentFailed(FailureReason),

    #[error("lightning backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("remote service unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("invalid remote response: {0}")]
    InvalidMetadata(String),

    #[error("remote service error: {0}")]
    Remote(String),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(DatabaseError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentError::Configuration(_) => "ConfigurationError",
            PaymentError::Unauthorized => "Unauthorized",
            PaymentError::Forbidden { .. } => "Forbidden",
            PaymentError::InvalidAmount(_) => "InvalidAmount",
            PaymentError::AmountOutOfBounds { .. } => "AmountOutOfBounds",
            PaymentError::InvalidPaymentRequest(_) => "InvalidPaymentRequest",
            PaymentError::InsufficientBalance { .. } => "InsufficientBalance",
            PaymentError::DuplicatePayment(_) => "DuplicatePayment",
            PaymentError::NotFound(_) => "NotFound",
            PaymentError::PaymentFailed(reason) => reason.as_str(),
            PaymentError::BackendUnavailable(_) => "BackendUnavailable",
            PaymentError::RemoteUnreachable(_) => "RemoteUnreachable",
            PaymentError::InvalidMetadata(_) => "InvalidMetadata",
            PaymentError::Remote(_) => "RemoteError",
            PaymentError::Validation(_) => "Validation",
            PaymentError::Storage(_) => "Storage",
            PaymentError::Internal(_) => "Internal",
        }
    }
}

impl From<DatabaseError> for PaymentError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, id } => PaymentError::NotFound(format!("{entity} {id}")),
            DatabaseError::AlreadyExists { id, .. } => PaymentError::DuplicatePayment(id),
            DatabaseError::Validation(e) => PaymentError::Validation(e),
            other => PaymentError::Storage(other),
        }
    }
}

impl From<BackendError> for PaymentError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::InvalidAmount(msg) => PaymentError::InvalidAmount(msg),
            BackendError::InvalidPaymentRequest(msg) => PaymentError::InvalidPaymentRequest(msg),
            BackendError::Config(msg) => PaymentError::Configuration(msg),
            BackendError::AlreadySubscribed => PaymentError::Configuration(e.to_string()),
            other => PaymentError::BackendUnavailable(other.to_string()),
        }
    }
}

impl From<LnurlError> for PaymentError {
    fn from(e: LnurlError) -> Self {
        match e {
            LnurlError::InvalidLnurl(msg) => PaymentError::InvalidPaymentRequest(msg),
            LnurlError::RemoteUnreachable(msg) => PaymentError::RemoteUnreachable(msg),
            LnurlError::InvalidMetadata(msg) => PaymentError::InvalidMetadata(msg),
            LnurlError::Remote(reason) => PaymentError::Remote(reason),
            LnurlError::AmountOutOfBounds {
                amount_msat,
                min_msat,
                max_msat,
            } => PaymentError::AmountOutOfBounds {
                amount_msat,
                min_msat,
                max_msat,
            },
            LnurlError::Signing(msg) => PaymentError::Internal(msg),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, PaymentError>;
