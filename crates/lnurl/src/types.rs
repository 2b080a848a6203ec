//! LNURL request and response types.

use serde::{Deserialize, Serialize};

use crate::error::{LnurlError, Result};

/// A decoded LNURL, ready to be acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LnurlRequest {
    #[serde(rename = "payRequest")]
    Pay(PayRequest),
    #[serde(rename = "withdrawRequest")]
    Withdraw(WithdrawRequest),
    #[serde(rename = "login")]
    Login(LoginRequest),
}

impl LnurlRequest {
    pub fn tag(&self) -> &'static str {
        match self {
            LnurlRequest::Pay(_) => "payRequest",
            LnurlRequest::Withdraw(_) => "withdrawRequest",
            LnurlRequest::Login(_) => "login",
        }
    }
}

/// LUD-06 pay request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    pub callback: String,
    pub min_sendable: u64,
    pub max_sendable: u64,
    /// Raw metadata string; its sha256 must match the invoice description hash.
    pub metadata: String,
    /// Maximum comment length accepted by the service (LUD-12).
    #[serde(default)]
    pub comment_allowed: u32,
    /// Host the request was fetched from.
    #[serde(default)]
    pub domain: String,
}

impl PayRequest {
    /// Check an amount against the advertised bounds.
    pub fn check_amount(&self, amount_msat: u64) -> Result<()> {
        if amount_msat < self.min_sendable || amount_msat > self.max_sendable {
            return Err(LnurlError::AmountOutOfBounds {
                amount_msat,
                min_msat: self.min_sendable,
                max_msat: self.max_sendable,
            });
        }
        Ok(())
    }

    /// The `text/plain` entry of the metadata.
    pub fn description(&self) -> Result<String> {
        parse_metadata(&self.metadata)?
            .into_iter()
            .find(|(mime, _)| mime == "text/plain")
            .map(|(_, content)| content)
            .ok_or_else(|| LnurlError::InvalidMetadata("metadata has no text/plain entry".to_string()))
    }
}

/// LUD-03 withdraw request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub callback: String,
    pub k1: String,
    pub min_withdrawable: u64,
    pub max_withdrawable: u64,
    #[serde(default)]
    pub default_description: String,
    #[serde(default)]
    pub domain: String,
}

impl WithdrawRequest {
    /// Check an amount against the advertised bounds.
    pub fn check_amount(&self, amount_msat: u64) -> Result<()> {
        if amount_msat < self.min_withdrawable || amount_msat > self.max_withdrawable {
            return Err(LnurlError::AmountOutOfBounds {
                amount_msat,
                min_msat: self.min_withdrawable,
                max_msat: self.max_withdrawable,
            });
        }
        Ok(())
    }
}

/// LUD-04 login challenge, parsed from the URL itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Full URL including `tag=login` and `k1`.
    pub callback: String,
    /// Hex-encoded 32-byte challenge.
    pub k1: String,
    pub domain: String,
    /// Optional LUD-04 action (`register`, `login`, `link`, `auth`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// LUD-06 callback response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResponse {
    /// bolt11 payment request.
    pub pr: String,
    #[serde(default)]
    pub success_action: Option<SuccessAction>,
}

/// LUD-09 success action, passed through to the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "lowercase")]
pub enum SuccessAction {
    Message {
        message: String,
    },
    Url {
        description: String,
        url: String,
    },
    Aes {
        description: String,
        ciphertext: String,
        iv: String,
    },
}

/// `{"status": "OK" | "ERROR", "reason": ...}`
#[derive(Debug, Deserialize)]
pub(crate) struct StatusResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: String,
}

/// Parse LUD-06 metadata: a JSON array of `[mime, content]` pairs.
pub fn parse_metadata(metadata: &str) -> Result<Vec<(String, String)>> {
    let entries: Vec<Vec<serde_json::Value>> = serde_json::from_str(metadata)
        .map_err(|e| LnurlError::InvalidMetadata(format!("metadata is not a JSON array: {e}")))?;

    entries
        .into_iter()
        .map(|entry| match entry.as_slice() {
            [serde_json::Value::String(mime), serde_json::Value::String(content), ..] => {
                Ok((mime.clone(), content.clone()))
            }
            _ => Err(LnurlError::InvalidMetadata(
                "metadata entries must be [mime, content] pairs".to_string(),
            )),
        })
        .collect()
}
