//! HTTP client for remote LNURL services.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::SignedChallenge;
use crate::codec;
use crate::error::{LnurlError, Result};
use crate::types::{
    parse_metadata, InvoiceResponse, LnurlRequest, LoginRequest, PayRequest, StatusResponse,
    WithdrawRequest,
};

/// Client for remote LNURL services. Every request is bounded by the
/// configured timeout.
#[derive(Clone)]
pub struct LnurlClient {
    http: Client,
}

impl LnurlClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LnurlError::RemoteUnreachable(e.to_string()))?;
        Ok(Self { http })
    }

    /// Decode a code and resolve it into a typed request.
    ///
    /// Login challenges are read from the URL itself; other tags are fetched.
    pub async fn scan(&self, code: &str) -> Result<LnurlRequest> {
        let url = codec::decode(code)?;
        let domain = url.host_str().unwrap_or_default().to_string();

        if let Some(login) = login_from_url(&url, &domain)? {
            return Ok(LnurlRequest::Login(login));
        }

        debug!(domain = %domain, "fetching lnurl");
        let value: serde_json::Value = self.get_json(url).await?;

        let tag = value
            .get("tag")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        match tag.as_str() {
            "payRequest" => {
                let mut pay: PayRequest = from_value(value)?;
                parse_metadata(&pay.metadata)?;
                check_callback(&pay.callback)?;
                if pay.min_sendable > pay.max_sendable {
                    return Err(LnurlError::InvalidMetadata(
                        "minSendable exceeds maxSendable".to_string(),
                    ));
                }
                pay.domain = domain;
                Ok(LnurlRequest::Pay(pay))
            }
            "withdrawRequest" => {
                let mut withdraw: WithdrawRequest = from_value(value)?;
                check_callback(&withdraw.callback)?;
                if withdraw.min_withdrawable > withdraw.max_withdrawable {
                    return Err(LnurlError::InvalidMetadata(
                        "minWithdrawable exceeds maxWithdrawable".to_string(),
                    ));
                }
                withdraw.domain = domain;
                Ok(LnurlRequest::Withdraw(withdraw))
            }
            other => Err(LnurlError::InvalidMetadata(format!(
                "unsupported lnurl tag '{other}'"
            ))),
        }
    }

    /// Ask a pay service for an invoice of `amount_msat`.
    pub async fn fetch_invoice(
        &self,
        pay: &PayRequest,
        amount_msat: u64,
        comment: Option<&str>,
    ) -> Result<InvoiceResponse> {
        pay.check_amount(amount_msat)?;

        let mut url = check_callback(&pay.callback)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("amount", &amount_msat.to_string());
            if let Some(comment) = comment.filter(|c| !c.is_empty() && pay.comment_allowed > 0) {
                let limit = pay.comment_allowed as usize;
                let comment: String = comment.chars().take(limit).collect();
                query.append_pair("comment", &comment);
            }
        }

        self.get_json(url).await
    }

    /// Hand an invoice to a withdraw service.
    pub async fn submit_withdraw(
        &self,
        withdraw: &WithdrawRequest,
        payment_request: &str,
    ) -> Result<()> {
        let mut url = check_callback(&withdraw.callback)?;
        url.query_pairs_mut()
            .append_pair("k1", &withdraw.k1)
            .append_pair("pr", payment_request);

        let status: StatusResponse = self.get_json(url).await?;
        expect_ok(status)
    }

    /// Send a signed login challenge.
    pub async fn submit_login(&self, login: &LoginRequest, signed: &SignedChallenge) -> Result<()> {
        let mut url = check_callback(&login.callback)?;
        url.query_pairs_mut()
            .append_pair("sig", &signed.sig)
            .append_pair("key", &signed.key);

        let status: StatusResponse = self.get_json(url).await?;
        expect_ok(status)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let value: serde_json::Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(e) if status.is_success() => {
                return Err(LnurlError::InvalidMetadata(format!("response is not JSON: {e}")))
            }
            Err(_) => return Err(LnurlError::RemoteUnreachable(format!("HTTP {status}"))),
        };

        if value
            .get("status")
            .and_then(|s| s.as_str())
            .is_some_and(|s| s.eq_ignore_ascii_case("ERROR"))
        {
            let reason = value
                .get("reason")
                .and_then(|r| r.as_str())
                .unwrap_or("unspecified")
                .to_string();
            warn!("lnurl service returned error: {}", reason);
            return Err(LnurlError::Remote(reason));
        }

        if !status.is_success() {
            return Err(LnurlError::RemoteUnreachable(format!("HTTP {status}")));
        }

        from_value(value)
    }
}

fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| LnurlError::InvalidMetadata(e.to_string()))
}

fn expect_ok(status: StatusResponse) -> Result<()> {
    if status.status.eq_ignore_ascii_case("OK") {
        Ok(())
    } else {
        Err(LnurlError::Remote(if status.reason.is_empty() {
            format!("unexpected status '{}'", status.status)
        } else {
            status.reason
        }))
    }
}

fn check_callback(callback: &str) -> Result<Url> {
    codec::decode(callback).map_err(|e| LnurlError::InvalidMetadata(format!("bad callback: {e}")))
}

fn login_from_url(url: &Url, domain: &str) -> Result<Option<LoginRequest>> {
    let mut tag = None;
    let mut k1 = None;
    let mut action = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "tag" => tag = Some(value.into_owned()),
            "k1" => k1 = Some(value.into_owned()),
            "action" => action = Some(value.into_owned()),
            _ => {}
        }
    }

    if tag.as_deref() != Some("login") {
        return Ok(None);
    }

    let k1 = k1.ok_or_else(|| LnurlError::InvalidLnurl("login url without k1".to_string()))?;
    if k1.len() != 64 || hex::decode(&k1).is_err() {
        return Err(LnurlError::InvalidLnurl("k1 must be 32 hex-encoded bytes".to_string()));
    }

    Ok(Some(LoginRequest {
        callback: url.to_string(),
        k1,
        domain: domain.to_string(),
        action,
    }))
}
