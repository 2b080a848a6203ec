//! Configuration for the Lightning backends.

use std::time::Duration;

/// Settings for every backend the registry can build.
///
/// Only the section of the selected backend is read.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub lnd: Option<LndConfig>,
}

/// LND REST connection settings.
#[derive(Clone)]
pub struct LndConfig {
    /// Base URL, e.g. `https://127.0.0.1:8080`.
    pub url: String,
    /// Hex-encoded admin macaroon.
    pub macaroon_hex: String,
    /// Accept self-signed TLS certificates.
    pub accept_invalid_certs: bool,
    /// Timeout for non-streaming requests.
    pub http_timeout: Duration,
}

impl LndConfig {
    /// Settings with self-signed certificates accepted and a 60s request timeout.
    pub fn new(url: impl Into<String>, macaroon_hex: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            macaroon_hex: macaroon_hex.into(),
            accept_invalid_certs: true,
            http_timeout: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for LndConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LndConfig")
            .field("url", &self.url)
            .field("macaroon_hex", &"<redacted>")
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}
