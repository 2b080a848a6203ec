//! LNURL error types.

use thiserror::Error;

/// Errors that can occur while resolving an LNURL flow.
#[derive(Debug, Error)]
pub enum LnurlError {
    /// The code is not a bech32 LNURL, LUD-17 URL or lightning address.
    #[error("invalid lnurl: {0}")]
    InvalidLnurl(String),

    /// The remote service could not be reached or timed out.
    #[error("remote service unreachable: {0}")]
    RemoteUnreachable(String),

    /// The remote service answered with something malformed.
    #[error("invalid lnurl response: {0}")]
    InvalidMetadata(String),

    /// The remote service answered `{"status":"ERROR"}`.
    #[error("remote service error: {0}")]
    Remote(String),

    /// Amount outside the remote's advertised bounds.
    #[error("amount {amount_msat} msat outside [{min_msat}, {max_msat}]")]
    AmountOutOfBounds {
        amount_msat: u64,
        min_msat: u64,
        max_msat: u64,
    },

    /// Key derivation or signing failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<reqwest::Error> for LnurlError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            LnurlError::InvalidMetadata(e.to_string())
        } else {
            LnurlError::RemoteUnreachable(e.to_string())
        }
    }
}

/// Result type for LNURL operations.
pub type Result<T> = std::result::Result<T, LnurlError>;
