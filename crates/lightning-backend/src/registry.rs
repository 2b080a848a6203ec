//! Name → constructor registry for backends.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::{FakeBackend, LightningBackend, LndBackend, VoidBackend};

/// Builds a backend from the loaded settings.
pub type BackendConstructor = fn(&BackendConfig) -> Result<Arc<dyn LightningBackend>>;

/// Registry for backend implementations.
///
/// Maps a backend identifier (the `LNBITS_LIGHTNING_BACKEND` value) to a
/// constructor. Resolved once at startup.
pub struct BackendRegistry {
    constructors: HashMap<String, BackendConstructor>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Create a registry with the built-in backends: `void`, `fake` and `lnd`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("void", |_| Ok(Arc::new(VoidBackend::new())));
        registry.register("fake", |_| Ok(Arc::new(FakeBackend::new()?)));
        registry.register("lnd", |config| {
            let lnd = config.lnd.clone().ok_or_else(|| {
                BackendError::Config("lnd backend selected but LND_REST_URL is not set".to_string())
            })?;
            Ok(Arc::new(LndBackend::new(lnd)?))
        });
        registry
    }

    /// Register a constructor.
    ///
    /// If a backend with the same name already exists, it will be replaced.
    pub fn register(&mut self, name: &str, constructor: BackendConstructor) {
        info!("Registering backend: {}", name);
        self.constructors.insert(name.to_string(), constructor);
    }

    /// Get a sorted list of registered backend names.
    pub fn list_backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Build the backend registered under `name`.
    pub fn build(&self, name: &str, config: &BackendConfig) -> Result<Arc<dyn LightningBackend>> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            BackendError::Config(format!(
                "unknown lightning backend '{}' (available: {})",
                name,
                self.list_backends().join(", ")
            ))
        })?;

        info!("Creating {} lightning backend", name);
        constructor(config)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.list_backends(), vec!["fake", "lnd", "void"]);
        assert!(registry.has_backend("void"));
    }

    #[test]
    fn test_build_unknown_backend() {
        let registry = BackendRegistry::with_defaults();
        let result = registry.build("eclair", &BackendConfig::default());
        assert!(matches!(result, Err(BackendError::Config(msg)) if msg.contains("eclair")));
    }

    #[test]
    fn test_build_lnd_without_settings() {
        let registry = BackendRegistry::with_defaults();
        let result = registry.build("lnd", &BackendConfig::default());
        assert!(matches!(result, Err(BackendError::Config(_))));
    }

    #[test]
    fn test_build_void() {
        let registry = BackendRegistry::with_defaults();
        let backend = registry.build("void", &BackendConfig::default()).unwrap();
        assert_eq!(backend.name(), "void");
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = BackendRegistry::new();
        registry.register("custom", |_| Ok(Arc::new(VoidBackend::new())));
        assert_eq!(registry.list_backends(), vec!["custom"]);
    }
}
