//! API key resolution and scope checks.

use database::{wallet, Database, KeyScope};
use serde::Serialize;
use tracing::debug;

use crate::error::{PaymentError, Result};

/// Length of a hex-encoded API key.
pub const KEY_LENGTH: usize = 64;

/// Who a request acts as. Carries no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub wallet_id: String,
    pub scope: KeyScope,
}

impl Identity {
    /// Admin satisfies everything; invoice satisfies only invoice-scope operations.
    pub fn require(&self, scope: KeyScope) -> Result<()> {
        match (self.scope, scope) {
            (KeyScope::Admin, _) | (KeyScope::Invoice, KeyScope::Invoice) => Ok(()),
            (KeyScope::Invoice, KeyScope::Admin) => Err(PaymentError::Forbidden { required: scope }),
        }
    }
}

/// Resolves API keys to identities.
#[derive(Clone)]
pub struct AccessControl {
    db: Database,
}

impl AccessControl {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Resolve a key. Malformed and unknown keys are both `Unauthorized`.
    pub async fn resolve(&self, key: &str) -> Result<Identity> {
        if !is_well_formed(key) {
            debug!("rejected malformed api key");
            return Err(PaymentError::Unauthorized);
        }

        let found = wallet::find_key(self.db.pool(), key)
            .await?
            .ok_or(PaymentError::Unauthorized)?;

        Ok(Identity {
            user_id: found.user_id,
            wallet_id: found.wallet_id,
            scope: found.scope,
        })
    }

    /// Resolve a key and check it against the required scope.
    pub async fn authorize(&self, key: &str, scope: KeyScope) -> Result<Identity> {
        let identity = self.resolve(key).await?;
        identity.require(scope)?;
        Ok(identity)
    }
}

/// Generate a new random key.
pub fn generate_key() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

fn is_well_formed(key: &str) -> bool {
    key.len() == KEY_LENGTH && key.bytes().all(|b| b.is_ascii_hexdigit())
}
