//! Configuration loaded from environment variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lightning_backend::{BackendConfig, LndConfig};
use payments::{EngineConfig, ReconcileConfig};
use serde::Serialize;

/// Site settings shown by `/v/settings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteSettings {
    pub site_title: String,
    pub site_tagline: String,
    pub site_description: String,
    pub theme_options: Vec<String>,
    pub default_wallet_name: String,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            site_title: "LNBitsLocal".to_string(),
            site_tagline: "Locally-hosted lightning wallet".to_string(),
            site_description: String::new(),
            theme_options: split_list("classic, flamingo, mint, salvador, monochrome, autumn"),
            default_wallet_name: "LNbits Wallet".to_string(),
        }
    }
}

/// Wallet server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address.
    pub addr: SocketAddr,
    /// SQLite database URL.
    pub database_url: String,
    pub site: SiteSettings,
    /// Registry name of the lightning backend.
    pub lightning_backend: String,
    pub engine: EngineConfig,
    pub backend: BackendConfig,
    /// Directory of a single-page client to serve, if any.
    pub static_dir: Option<PathBuf>,
    /// Emit JSON log lines instead of pretty ones.
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `HOST` / `PORT` | Bind address | `0.0.0.0` / `5000` |
    /// | `DATABASE` | SQLite URL or file path | (required) |
    /// | `LNBITS_SITE_TITLE` | Site title | `LNBitsLocal` |
    /// | `LNBITS_SITE_TAGLINE` | Site tagline | `Locally-hosted lightning wallet` |
    /// | `LNBITS_SITE_DESCRIPTION` | Site description | empty |
    /// | `LNBITS_THEME_OPTIONS` | Comma separated themes | `classic, flamingo, ...` |
    /// | `LNBITS_DEFAULT_WALLET_NAME` | First wallet name | `LNbits Wallet` |
    /// | `LNBITS_LIGHTNING_BACKEND` | `void`, `fake` or `lnd` | `void` |
    /// | `LND_REST_URL` / `LND_MACAROON_HEX` | LND REST access | unset |
    /// | `LND_ACCEPT_INVALID_CERTS` | Accept self-signed LND certs | `true` |
    /// | `PAYMENT_TIMEOUT_SECS` | Outgoing payment timeout | `60` |
    /// | `BACKEND_TIMEOUT_SECS` | Other backend calls | `15` |
    /// | `INVOICE_EXPIRY_SECS` | Default invoice expiry | `3600` |
    /// | `RESERVE_FEE_MIN_MSAT` / `RESERVE_FEE_PERCENT` | Fee reserve | `2000` / `1.0` |
    /// | `SETTLEMENT_QUEUE_SIZE` / `SETTLEMENT_WORKERS` | Settlement ingestion | `256` / `4` |
    /// | `NOTIFIER_BUFFER` | Per-wallet event buffer | `64` |
    /// | `RECONCILE_INITIAL_DELAY_MS` | First reconciliation lookup | `1000` |
    /// | `RECONCILE_MAX_DELAY_SECS` | Reconciliation backoff cap | `300` |
    /// | `RECONCILE_GIVE_UP_SECS` | Reconciliation horizon | `86400` |
    /// | `LNURL_TIMEOUT_SECS` | Remote LNURL requests | `10` |
    /// | `STATIC_DIR` | Client directory to serve | unset |
    /// | `LOG_JSON` | `1` for JSON logs | unset |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let host: IpAddr = env.parse("HOST", IpAddr::from([0, 0, 0, 0]))?;
        let port: u16 = env.parse("PORT", 5000)?;

        let database = env.get("DATABASE").ok_or(ConfigError::Missing("DATABASE"))?;

        let defaults = SiteSettings::default();
        let site = SiteSettings {
            site_title: env.get("LNBITS_SITE_TITLE").unwrap_or(defaults.site_title),
            site_tagline: env.get("LNBITS_SITE_TAGLINE").unwrap_or(defaults.site_tagline),
            site_description: env
                .get("LNBITS_SITE_DESCRIPTION")
                .unwrap_or(defaults.site_description),
            theme_options: env
                .get("LNBITS_THEME_OPTIONS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.theme_options),
            default_wallet_name: env
                .get("LNBITS_DEFAULT_WALLET_NAME")
                .unwrap_or(defaults.default_wallet_name),
        };

        let engine_defaults = EngineConfig::default();
        let reconcile_defaults = ReconcileConfig::default();
        let engine = EngineConfig {
            invoice_expiry: env.secs("INVOICE_EXPIRY_SECS", engine_defaults.invoice_expiry)?,
            payment_timeout: env.secs("PAYMENT_TIMEOUT_SECS", engine_defaults.payment_timeout)?,
            backend_timeout: env.secs("BACKEND_TIMEOUT_SECS", engine_defaults.backend_timeout)?,
            reserve_fee_min_msat: env
                .parse("RESERVE_FEE_MIN_MSAT", engine_defaults.reserve_fee_min_msat)?,
            reserve_fee_percent: env
                .parse("RESERVE_FEE_PERCENT", engine_defaults.reserve_fee_percent)?,
            settlement_queue_size: env
                .parse("SETTLEMENT_QUEUE_SIZE", engine_defaults.settlement_queue_size)?,
            settlement_workers: env.parse("SETTLEMENT_WORKERS", engine_defaults.settlement_workers)?,
            notifier_buffer: env.parse("NOTIFIER_BUFFER", engine_defaults.notifier_buffer)?,
            reconcile: ReconcileConfig {
                initial_delay: Duration::from_millis(env.parse(
                    "RECONCILE_INITIAL_DELAY_MS",
                    reconcile_defaults.initial_delay.as_millis() as u64,
                )?),
                max_delay: env.secs("RECONCILE_MAX_DELAY_SECS", reconcile_defaults.max_delay)?,
                give_up_after: env
                    .secs("RECONCILE_GIVE_UP_SECS", reconcile_defaults.give_up_after)?,
                ..reconcile_defaults
            },
            lnurl_timeout: env.secs("LNURL_TIMEOUT_SECS", engine_defaults.lnurl_timeout)?,
            default_wallet_name: site.default_wallet_name.clone(),
        };

        if !(engine.reserve_fee_percent.is_finite() && engine.reserve_fee_percent >= 0.0) {
            return Err(ConfigError::Invalid {
                var: "RESERVE_FEE_PERCENT",
                value: engine.reserve_fee_percent.to_string(),
            });
        }

        let lnd = match env.get("LND_REST_URL") {
            Some(url) => Some(LndConfig {
                url: url.trim_end_matches('/').to_string(),
                macaroon_hex: env
                    .get("LND_MACAROON_HEX")
                    .ok_or(ConfigError::Missing("LND_MACAROON_HEX"))?,
                accept_invalid_certs: env
                    .get("LND_ACCEPT_INVALID_CERTS")
                    .map(|v| !matches!(v.as_str(), "0" | "false" | "no"))
                    .unwrap_or(true),
                // Payments are bounded by the engine; the transport must outlast them.
                http_timeout: engine.payment_timeout + Duration::from_secs(5),
            }),
            None => None,
        };

        Ok(Self {
            addr: SocketAddr::new(host, port),
            database_url: database_url(&database),
            site,
            lightning_backend: env
                .get("LNBITS_LIGHTNING_BACKEND")
                .unwrap_or_else(|| "void".to_string())
                .to_lowercase(),
            engine,
            backend: BackendConfig { lnd },
            static_dir: env.get("STATIC_DIR").map(PathBuf::from),
            log_json: env.get("LOG_JSON").is_some_and(|v| v == "1"),
        })
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Trimmed, non-empty value.
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(var) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { var, value }),
            None => Ok(default),
        }
    }

    fn secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(var, default.as_secs()).map(Duration::from_secs)
    }
}

/// Accept both sqlx URLs and bare file paths.
fn database_url(value: &str) -> String {
    if value.starts_with("sqlite:") {
        value.to_string()
    } else {
        format!("sqlite:{value}?mode=rwc")
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE", "wallet.db")]).unwrap();
        assert_eq!(config.addr.to_string(), "0.0.0.0:5000");
        assert_eq!(config.database_url, "sqlite:wallet.db?mode=rwc");
        assert_eq!(config.lightning_backend, "void");
        assert_eq!(config.site.site_title, "LNBitsLocal");
        assert_eq!(config.site.theme_options.len(), 6);
        assert_eq!(config.engine.payment_timeout, Duration::from_secs(60));
        assert_eq!(config.engine.default_wallet_name, "LNbits Wallet");
        assert!(config.backend.lnd.is_none());
        assert!(config.static_dir.is_none());
        assert!(!config.log_json);
    }

    #[test]
    fn test_database_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("DATABASE"))));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE", "sqlite::memory:"),
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LNBITS_LIGHTNING_BACKEND", "LND"),
            ("LND_REST_URL", "https://127.0.0.1:8080/"),
            ("LND_MACAROON_HEX", "0201"),
            ("PAYMENT_TIMEOUT_SECS", "30"),
            ("LNBITS_THEME_OPTIONS", "mint,  autumn ,"),
            ("LNBITS_DEFAULT_WALLET_NAME", "Main"),
            ("LOG_JSON", "1"),
        ])
        .unwrap();

        assert_eq!(config.addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.lightning_backend, "lnd");
        assert_eq!(config.site.theme_options, vec!["mint", "autumn"]);
        assert_eq!(config.engine.default_wallet_name, "Main");
        assert!(config.log_json);

        let lnd = config.backend.lnd.unwrap();
        assert_eq!(lnd.url, "https://127.0.0.1:8080");
        assert_eq!(lnd.http_timeout, Duration::from_secs(35));
    }

    #[test]
    fn test_invalid_numbers() {
        let result = load(&[("DATABASE", "x.db"), ("PORT", "http")]);
        assert!(matches!(result, Err(ConfigError::Invalid { var: "PORT", .. })));

        let result = load(&[("DATABASE", "x.db"), ("RESERVE_FEE_PERCENT", "-1")]);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                var: "RESERVE_FEE_PERCENT",
                ..
            })
        ));
    }

    #[test]
    fn test_lnd_needs_macaroon() {
        let result = load(&[("DATABASE", "x.db"), ("LND_REST_URL", "https://lnd:8080")]);
        assert!(matches!(result, Err(ConfigError::Missing("LND_MACAROON_HEX"))));
    }
}
