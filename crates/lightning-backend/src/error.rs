//! Error types for Lightning backends.

use thiserror::Error;

/// Errors that can occur when talking to a Lightning backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend could not be reached, or refused the request before
    /// acting on it.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the requested amount.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The payment request could not be decoded.
    #[error("Invalid payment request: {0}")]
    InvalidPaymentRequest(String),

    /// The settlement stream was already handed out.
    #[error("Settlement stream already subscribed")]
    AlreadySubscribed,

    /// The backend answered with something we could not interpret.
    #[error("Unexpected backend response: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport error after the request may have reached the backend.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BackendError {
    /// True when the request provably never took effect on the node.
    pub fn is_definite(&self) -> bool {
        matches!(
            self,
            BackendError::Unavailable(_)
                | BackendError::InvalidAmount(_)
                | BackendError::InvalidPaymentRequest(_)
                | BackendError::Config(_)
        )
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
