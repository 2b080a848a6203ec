//! LNURL flows on top of the engine: pay, withdraw and login.

use database::validation::MAX_MEMO_LENGTH;
use database::{wallet, KeyScope};
use lightning_backend::bolt11;
use lnurl::auth::hashing_key;
use lnurl::{LinkingKey, LnurlClient, LnurlRequest, SuccessAction};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::engine::PaymentEngine;
use crate::error::{PaymentError, Result};
use crate::lifecycle::{PayResult, PaymentView};

/// Result of paying an lnurl-pay link.
#[derive(Debug, Clone, Serialize)]
pub struct LnurlPayResult {
    #[serde(flatten)]
    pub payment: PayResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_action: Option<SuccessAction>,
}

/// Result of an lnurl-auth login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginResult {
    pub domain: String,
    /// Linking public key presented to the service.
    pub key: String,
}

/// LNURL flows for wallets of this service.
#[derive(Clone)]
pub struct LnurlService {
    engine: PaymentEngine,
    client: LnurlClient,
}

impl LnurlService {
    pub fn new(engine: PaymentEngine) -> Result<Self> {
        let client = LnurlClient::new(engine.config().lnurl_timeout)?;
        Ok(Self { engine, client })
    }

    /// Decode and resolve a code without acting on it.
    pub async fn scan(&self, code: &str) -> Result<LnurlRequest> {
        Ok(self.client.scan(code).await?)
    }

    /// Pay `amount_msat` to an lnurl-pay link or lightning address.
    pub async fn pay(
        &self,
        wallet_id: &str,
        code: &str,
        amount_msat: u64,
        comment: Option<&str>,
    ) -> Result<LnurlPayResult> {
        let pay = match self.client.scan(code).await? {
            LnurlRequest::Pay(pay) => pay,
            other => {
                return Err(PaymentError::InvalidMetadata(format!(
                    "expected payRequest, got {}",
                    other.tag()
                )))
            }
        };
        pay.check_amount(amount_msat)?;

        let invoice = self.client.fetch_invoice(&pay, amount_msat, comment).await?;
        let decoded = bolt11::decode(&invoice.pr)
            .map_err(|e| PaymentError::InvalidMetadata(format!("callback returned {e}")))?;

        if decoded.amount_msat != Some(amount_msat) {
            return Err(PaymentError::InvalidMetadata(format!(
                "invoice amount {:?} does not match requested {amount_msat} msat",
                decoded.amount_msat
            )));
        }

        let expected_hash = hex::encode(Sha256::digest(pay.metadata.as_bytes()));
        if decoded.description_hash.as_deref() != Some(expected_hash.as_str()) {
            return Err(PaymentError::InvalidMetadata(
                "invoice description hash does not match metadata".to_string(),
            ));
        }

        info!(
            wallet_id = %wallet_id,
            domain = %pay.domain,
            amount_msat,
            "paying lnurl"
        );

        let payment = self.engine.pay_invoice(wallet_id, &invoice.pr).await?;
        Ok(LnurlPayResult {
            payment,
            success_action: invoice.success_action,
        })
    }

    /// Withdraw from an lnurl-withdraw link into `wallet_id`.
    ///
    /// Without an amount the link's maximum is withdrawn. The invoice is
    /// credited when the service pays it, through the normal settlement path.
    pub async fn withdraw(
        &self,
        wallet_id: &str,
        code: &str,
        amount_msat: Option<u64>,
    ) -> Result<PaymentView> {
        let withdraw = match self.client.scan(code).await? {
            LnurlRequest::Withdraw(withdraw) => withdraw,
            other => {
                return Err(PaymentError::InvalidMetadata(format!(
                    "expected withdrawRequest, got {}",
                    other.tag()
                )))
            }
        };

        let amount_msat = amount_msat.unwrap_or(withdraw.max_withdrawable);
        if amount_msat == 0 {
            return Err(PaymentError::InvalidAmount("nothing to withdraw".to_string()));
        }
        withdraw.check_amount(amount_msat)?;

        let memo: String = withdraw
            .default_description
            .chars()
            .take(MAX_MEMO_LENGTH)
            .collect();
        let invoice = self
            .engine
            .create_invoice(wallet_id, amount_msat, &memo, None)
            .await?;

        self.client
            .submit_withdraw(&withdraw, &invoice.payment_request)
            .await?;

        info!(
            wallet_id = %wallet_id,
            domain = %withdraw.domain,
            payment_hash = %invoice.payment_hash,
            amount_msat,
            "lnurl withdraw requested"
        );
        Ok(invoice)
    }

    /// Log in to an lnurl-auth service with the wallet's linking key.
    pub async fn auth(&self, wallet_id: &str, code: &str) -> Result<LoginResult> {
        let login = match self.client.scan(code).await? {
            LnurlRequest::Login(login) => login,
            other => {
                return Err(PaymentError::InvalidMetadata(format!(
                    "expected login, got {}",
                    other.tag()
                )))
            }
        };

        let admin_key = wallet::wallet_key(self.engine.db().pool(), wallet_id, KeyScope::Admin).await?;
        let linking_key = LinkingKey::derive(&hashing_key(admin_key.as_bytes()), &login.domain)?;
        let signed = linking_key.sign(&login.k1)?;

        self.client.submit_login(&login, &signed).await?;

        info!(wallet_id = %wallet_id, domain = %login.domain, "lnurl login");
        Ok(LoginResult {
            domain: login.domain,
            key: signed.key,
        })
    }
}
