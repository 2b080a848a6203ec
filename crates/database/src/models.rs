//! Database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An account holder. Owns one or more wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Random UUID assigned at registration.
    pub id: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

/// A named sub-account. The balance is derived from the ledger, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub created_at: i64,
}

/// What an API key may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    /// Full control over the account and the wallet the key is bound to.
    Admin,
    /// Wallet-level reads and invoice creation.
    Invoice,
}

impl KeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScope::Admin => "admin",
            KeyScope::Invoice => "invoice",
        }
    }
}

/// A stored API key binding.
#[derive(Clone, PartialEq, Eq, FromRow)]
pub struct ApiKey {
    pub key: String,
    pub user_id: String,
    pub wallet_id: String,
    pub scope: KeyScope,
    pub created_at: i64,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("key", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("wallet_id", &self.wallet_id)
            .field("scope", &self.scope)
            .finish()
    }
}

/// The admin/invoice key pair of a wallet.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct WalletKeys {
    pub admin_key: String,
    pub invoice_key: String,
}

impl std::fmt::Debug for WalletKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WalletKeys { .. }")
    }
}

/// An app URL registered on a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UserApp {
    pub user_id: String,
    pub app_url: String,
    pub created_at: i64,
}

/// Kind of a ledger entry. At most one entry of each kind per payment hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Confirmed incoming settlement (positive).
    Credit,
    /// Hold for an outgoing payment, amount plus fee reserve (negative).
    Debit,
    /// Compensating credit for a failed outgoing payment (positive).
    Reversal,
    /// Unused fee reserve returned after a confirmed payment (positive).
    FeeRefund,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Credit => "credit",
            EntryKind::Debit => "debit",
            EntryKind::Reversal => "reversal",
            EntryKind::FeeRefund => "fee_refund",
        }
    }
}

/// An immutable ledger row. `amount_msat` is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub wallet_id: String,
    pub payment_hash: String,
    pub kind: EntryKind,
    pub amount_msat: i64,
    pub created_at: i64,
}

/// Stored payment state.
///
/// Incoming invoices use `Created`/`Settled`; expiry is derived from
/// `expires_at`. Outgoing payments use the remaining states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Created,
    Settled,
    Sent,
    Confirmed,
    Failed,
    Indeterminate,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Created => "created",
            PaymentState::Settled => "settled",
            PaymentState::Sent => "sent",
            PaymentState::Confirmed => "confirmed",
            PaymentState::Failed => "failed",
            PaymentState::Indeterminate => "indeterminate",
        }
    }

    /// Whether no further transition can happen.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PaymentState::Settled | PaymentState::Confirmed | PaymentState::Failed
        )
    }
}

/// An incoming invoice or an outgoing payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_hash: String,
    pub outgoing: bool,
    pub wallet_id: String,
    pub amount_msat: i64,
    pub fee_reserve_msat: i64,
    pub fee_msat: i64,
    pub payment_request: String,
    pub memo: String,
    pub preimage: Option<String>,
    pub failure_reason: Option<String>,
    /// Unix timestamp (seconds) after which an unpaid invoice is expired.
    pub expires_at: Option<i64>,
    pub state: PaymentState,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields for recording a new incoming invoice.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub payment_hash: String,
    pub wallet_id: String,
    pub amount_msat: i64,
    pub payment_request: String,
    pub memo: String,
    pub expires_at: Option<i64>,
}

/// Fields for recording a new outgoing payment.
#[derive(Debug, Clone)]
pub struct NewOutgoing {
    pub payment_hash: String,
    pub wallet_id: String,
    pub amount_msat: i64,
    pub fee_reserve_msat: i64,
    pub payment_request: String,
    pub memo: String,
}

/// Current unix time in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
