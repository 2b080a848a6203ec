//! Local bolt11 decoding.

use std::str::FromStr;

use lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescription};

use crate::error::{BackendError, Result};

/// The parts of a bolt11 invoice the wallet service acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInvoice {
    /// Hex-encoded payment hash.
    pub payment_hash: String,
    /// `None` for "any amount" invoices.
    pub amount_msat: Option<u64>,
    pub description: Option<String>,
    /// Hex-encoded sha256 of the description, when committed by hash.
    pub description_hash: Option<String>,
    /// Unix timestamp (seconds).
    pub expires_at: i64,
    pub payee: String,
}

impl DecodedInvoice {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Decode a bolt11 payment request. A `lightning:` prefix is accepted.
pub fn decode(payment_request: &str) -> Result<DecodedInvoice> {
    let trimmed = payment_request.trim();
    let raw = trimmed
        .strip_prefix("lightning:")
        .or_else(|| trimmed.strip_prefix("LIGHTNING:"))
        .unwrap_or(trimmed);

    let invoice = Bolt11Invoice::from_str(raw)
        .map_err(|e| BackendError::InvalidPaymentRequest(e.to_string()))?;

    let (description, description_hash) = match invoice.description() {
        Bolt11InvoiceDescription::Direct(description) => (Some(description.to_string()), None),
        Bolt11InvoiceDescription::Hash(hash) => (None, Some(hash.0.to_string())),
    };

    let expires_at = invoice
        .expires_at()
        .map(|d| d.as_secs() as i64)
        .unwrap_or(i64::MAX);

    Ok(DecodedInvoice {
        payment_hash: invoice.payment_hash().to_string(),
        amount_msat: invoice.amount_milli_satoshis(),
        description,
        description_hash,
        expires_at,
        payee: invoice.recover_payee_pub_key().to_string(),
    })
}
