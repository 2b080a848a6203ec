//! Engine configuration.

use std::time::Duration;

/// Tunables for the payment engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Expiry of invoices created without an explicit one.
    pub invoice_expiry: Duration,
    /// Bound on a single outgoing payment attempt. Independent of any HTTP
    /// transport timeout.
    pub payment_timeout: Duration,
    /// Bound on every other backend call.
    pub backend_timeout: Duration,
    /// Minimum fee reserve held back for an outgoing payment.
    pub reserve_fee_min_msat: u64,
    /// Fee reserve as a percentage of the amount.
    pub reserve_fee_percent: f64,
    /// Capacity of the queue between the settlement stream and the workers.
    pub settlement_queue_size: usize,
    /// Number of settlement workers.
    pub settlement_workers: usize,
    /// Per-wallet event buffer of the notifier.
    pub notifier_buffer: usize,
    pub reconcile: ReconcileConfig,
    /// Bound on each request to a remote LNURL service.
    pub lnurl_timeout: Duration,
    /// Name of the wallet created at registration when none is given.
    pub default_wallet_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invoice_expiry: Duration::from_secs(3600),
            payment_timeout: Duration::from_secs(60),
            backend_timeout: Duration::from_secs(15),
            reserve_fee_min_msat: 2000,
            reserve_fee_percent: 1.0,
            settlement_queue_size: 256,
            settlement_workers: 4,
            notifier_buffer: 64,
            reconcile: ReconcileConfig::default(),
            lnurl_timeout: Duration::from_secs(10),
            default_wallet_name: "LNbits Wallet".to_string(),
        }
    }
}

/// Backoff for re-checking payments whose outcome is unknown.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Delay before the first lookup.
    pub initial_delay: Duration,
    /// Maximum delay between lookups.
    pub max_delay: Duration,
    /// Backoff multiplier for each lookup.
    pub backoff_multiplier: f64,
    /// Stop looking up after this long. The payment stays indeterminate.
    pub give_up_after: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            give_up_after: Duration::from_secs(86_400),
        }
    }
}

impl ReconcileConfig {
    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(64) as i32);
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);
        delay.min(self.max_delay)
    }
}
