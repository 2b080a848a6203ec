//! Payment states as clients see them.
//!
//! Stored states only move forward through committed transitions. `Pending`
//! and `Expired` are derived from an open invoice's expiry at read time.

use database::{Payment, PaymentState};
use serde::Serialize;

/// Status of an invoice or outgoing payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Open invoice, not yet expired.
    Pending,
    /// Open invoice past its expiry. No ledger effect.
    Expired,
    /// Invoice paid and credited.
    Settled,
    /// Outgoing payment handed to the node, outcome not yet known.
    Sent,
    /// Outgoing payment completed.
    Confirmed,
    /// Outgoing payment definitively failed and reversed.
    Failed,
    /// Outgoing payment outcome unknown. The debit stands until reconciled.
    Indeterminate,
}

impl Status {
    /// Derive the status of a stored payment at `now`.
    pub fn of(payment: &Payment, now: i64) -> Self {
        match payment.state {
            PaymentState::Created => match payment.expires_at {
                Some(expires_at) if now >= expires_at => Status::Expired,
                _ => Status::Pending,
            },
            PaymentState::Settled => Status::Settled,
            PaymentState::Sent => Status::Sent,
            PaymentState::Confirmed => Status::Confirmed,
            PaymentState::Failed => Status::Failed,
            PaymentState::Indeterminate => Status::Indeterminate,
        }
    }

    /// Settled or confirmed.
    pub fn is_paid(&self) -> bool {
        matches!(self, Status::Settled | Status::Confirmed)
    }

    /// No further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Expired | Status::Settled | Status::Confirmed | Status::Failed
        )
    }
}

/// A payment as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentView {
    pub payment_hash: String,
    pub wallet_id: String,
    pub outgoing: bool,
    pub status: Status,
    /// lnbits-style flag: settled or confirmed.
    pub paid: bool,
    pub amount_msat: i64,
    pub fee_msat: i64,
    pub memo: String,
    pub payment_request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PaymentView {
    pub fn new(payment: Payment, now: i64) -> Self {
        let status = Status::of(&payment, now);
        Self {
            status,
            paid: status.is_paid(),
            payment_hash: payment.payment_hash,
            wallet_id: payment.wallet_id,
            outgoing: payment.outgoing,
            amount_msat: payment.amount_msat,
            fee_msat: payment.fee_msat,
            memo: payment.memo,
            payment_request: payment.payment_request,
            preimage: payment.preimage,
            failure_reason: payment.failure_reason,
            expires_at: payment.expires_at,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

/// Outcome of a pay call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayResult {
    pub payment_hash: String,
    /// `Confirmed`, or `Indeterminate` when the outcome is not yet known.
    pub status: Status,
    pub amount_msat: i64,
    pub fee_msat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    /// Settled against another wallet of this service without touching the node.
    pub internal: bool,
}

impl PayResult {
    pub fn is_confirmed(&self) -> bool {
        self.status == Status::Confirmed
    }
}

/// Fee reserve held back for an outgoing payment:
/// `max(min_msat, amount * percent / 100)`, rounded up.
pub fn fee_reserve(amount_msat: u64, min_msat: u64, percent: f64) -> u64 {
    let proportional = (amount_msat as f64 * percent.max(0.0) / 100.0).ceil() as u64;
    proportional.max(min_msat)
}
