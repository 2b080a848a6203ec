//! Application state shared across handlers.

use std::sync::Arc;

use payments::{AccessControl, Accounts, LnurlService, PaymentEngine};
use serde::Serialize;

use crate::config::SiteSettings;

/// Body of `/v/settings`.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    #[serde(flatten)]
    pub site: SiteSettings,
    pub lightning_backend: String,
    pub commit: String,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: PaymentEngine,
    pub accounts: Accounts,
    pub access: AccessControl,
    pub lnurl: LnurlService,
    pub settings: Arc<SettingsView>,
}

impl AppState {
    /// Wire the services around a running engine.
    pub fn new(engine: PaymentEngine, site: SiteSettings) -> payments::Result<Self> {
        let db = engine.db().clone();
        let accounts = Accounts::new(
            db.clone(),
            engine.ledger().clone(),
            site.default_wallet_name.clone(),
        );
        let settings = SettingsView {
            site,
            lightning_backend: engine.backend().name().to_string(),
            commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
        };

        Ok(Self {
            lnurl: LnurlService::new(engine.clone())?,
            access: AccessControl::new(db),
            accounts,
            engine,
            settings: Arc::new(settings),
        })
    }
}
