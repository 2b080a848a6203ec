//! Users, wallets, keys and registered apps.

use database::models::now;
use database::validation::{validate_app_url, validate_wallet_name};
use database::{user, wallet, Database, User, Wallet, WalletKeys};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::access::generate_key;
use crate::error::Result;
use crate::ledger::Ledger;

/// A wallet with its derived balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletInfo {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub balance_msat: i64,
}

/// A wallet together with its keys. Only returned at creation and rotation.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct WalletCredentials {
    #[serde(flatten)]
    pub wallet: WalletInfo,
    #[serde(rename = "adminkey")]
    pub admin_key: String,
    #[serde(rename = "inkey")]
    pub invoice_key: String,
}

impl std::fmt::Debug for WalletCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletCredentials")
            .field("wallet", &self.wallet)
            .finish_non_exhaustive()
    }
}

/// A user, their wallets and their apps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub created_at: i64,
    pub wallets: Vec<WalletInfo>,
    pub apps: Vec<String>,
}

/// Result of registering a new user.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub user: User,
    pub wallet: WalletCredentials,
}

/// Account management.
#[derive(Clone)]
pub struct Accounts {
    db: Database,
    ledger: Ledger,
    default_wallet_name: String,
}

impl Accounts {
    pub fn new(db: Database, ledger: Ledger, default_wallet_name: impl Into<String>) -> Self {
        Self {
            db,
            ledger,
            default_wallet_name: default_wallet_name.into(),
        }
    }

    /// Create a user with a first wallet and its key pair.
    pub async fn register(&self, wallet_name: Option<&str>) -> Result<Registration> {
        let name = match wallet_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => validate_wallet_name(name)?,
            None => validate_wallet_name(&self.default_wallet_name)?,
        };

        let created_at = now();
        let user = User {
            id: new_id(),
            created_at,
        };
        let wallet = Wallet {
            id: new_id(),
            user_id: user.id.clone(),
            name,
            created_at,
        };
        let keys = new_keys();

        user::register_user(self.db.pool(), &user, &wallet, &keys).await?;
        info!(user_id = %user.id, wallet_id = %wallet.id, "user registered");

        Ok(Registration {
            wallet: credentials(wallet, 0, keys),
            user,
        })
    }

    /// A user with every wallet's balance and the registered apps.
    pub async fn user(&self, user_id: &str) -> Result<UserInfo> {
        let user = user::get_user(self.db.pool(), user_id).await?;

        let mut wallets = Vec::new();
        for wallet in wallet::list_wallets(self.db.pool(), user_id).await? {
            wallets.push(self.info(wallet).await?);
        }

        let apps = user::list_apps(self.db.pool(), user_id)
            .await?
            .into_iter()
            .map(|app| app.app_url)
            .collect();

        Ok(UserInfo {
            id: user.id,
            created_at: user.created_at,
            wallets,
            apps,
        })
    }

    /// Add a wallet with its own key pair to an existing user.
    pub async fn create_wallet(&self, user_id: &str, name: &str) -> Result<WalletCredentials> {
        let name = validate_wallet_name(name)?;
        let wallet = Wallet {
            id: new_id(),
            user_id: user_id.to_string(),
            name,
            created_at: now(),
        };
        let keys = new_keys();

        wallet::create_wallet(self.db.pool(), &wallet, &keys).await?;
        info!(user_id = %user_id, wallet_id = %wallet.id, "wallet created");

        Ok(credentials(wallet, 0, keys))
    }

    pub async fn wallet(&self, wallet_id: &str) -> Result<WalletInfo> {
        let wallet = wallet::get_wallet(self.db.pool(), wallet_id).await?;
        self.info(wallet).await
    }

    pub async fn rename_wallet(&self, wallet_id: &str, name: &str) -> Result<WalletInfo> {
        let name = validate_wallet_name(name)?;
        wallet::rename_wallet(self.db.pool(), wallet_id, &name).await?;
        self.wallet(wallet_id).await
    }

    /// Register an app URL for a user. Registering it again is a no-op.
    pub async fn add_app(&self, user_id: &str, url: &str) -> Result<Vec<String>> {
        let url = validate_app_url(url)?;
        user::add_app(self.db.pool(), user_id, &url, now()).await?;

        Ok(user::list_apps(self.db.pool(), user_id)
            .await?
            .into_iter()
            .map(|app| app.app_url)
            .collect())
    }

    /// Replace both keys of a wallet. The old keys stop working immediately.
    pub async fn rotate_keys(&self, wallet_id: &str) -> Result<WalletCredentials> {
        let wallet = wallet::get_wallet(self.db.pool(), wallet_id).await?;
        let keys = new_keys();

        wallet::rotate_keys(self.db.pool(), &wallet, &keys).await?;
        info!(wallet_id = %wallet_id, "wallet keys rotated");

        let balance = self.ledger.balance(wallet_id).await?;
        Ok(credentials(wallet, balance, keys))
    }

    async fn info(&self, wallet: Wallet) -> Result<WalletInfo> {
        let balance_msat = self.ledger.balance(&wallet.id).await?;
        Ok(WalletInfo {
            id: wallet.id,
            user_id: wallet.user_id,
            name: wallet.name,
            balance_msat,
        })
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_keys() -> WalletKeys {
    WalletKeys {
        admin_key: generate_key(),
        invoice_key: generate_key(),
    }
}

fn credentials(wallet: Wallet, balance_msat: i64, keys: WalletKeys) -> WalletCredentials {
    WalletCredentials {
        wallet: WalletInfo {
            id: wallet.id,
            user_id: wallet.user_id,
            name: wallet.name,
            balance_msat,
        },
        admin_key: keys.admin_key,
        invoice_key: keys.invoice_key,
    }
}
