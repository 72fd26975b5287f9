//! Backend registry
//!
//! Maps backend names to factories. Populated once at startup; a bad
//! registration is a programming error and panics rather than surfacing
//! as a runtime condition.

use std::collections::HashMap;

use crate::backend::{deluge, qbittorrent, transmission, TorrentBackend};
use crate::cli::Config;
use crate::error::KeyResetError;

/// Factory producing an unconnected backend client from the run config
pub type BackendFactory = fn(&Config) -> Result<Box<dyn TorrentBackend>, KeyResetError>;

/// Registry of available backend factories
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with all supported backends registered
    pub fn with_default_backends() -> Self {
        let mut registry = Self::new();
        registry.register("transmission", transmission::new_backend);
        registry.register("qbittorrent", qbittorrent::new_backend);
        registry.register("deluge", deluge::new_backend);
        registry
    }

    /// Register a backend factory under a unique name
    ///
    /// Panics on an empty or duplicate name; registration happens only at
    /// startup and a bad name indicates a programming error.
    pub fn register(&mut self, name: &str, factory: BackendFactory) {
        if name.is_empty() {
            panic!("backend: register called with empty name");
        }
        if self.factories.contains_key(name) {
            panic!("backend: register called twice for {}", name);
        }
        self.factories.insert(name.to_string(), factory);
    }

    /// Resolve a backend factory by name
    pub fn resolve(&self, name: &str) -> Result<BackendFactory, KeyResetError> {
        self.factories.get(name).copied().ok_or_else(|| {
            KeyResetError::config_error_with_field(
                format!("Unknown backend {:?}", name),
                "target",
            )
        })
    }

    /// Names of all registered backends, for diagnostics
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_default_backends()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backends_registered() {
        let registry = BackendRegistry::with_default_backends();
        assert_eq!(registry.names(), vec!["deluge", "qbittorrent", "transmission"]);
        assert!(registry.resolve("transmission").is_ok());
        assert!(registry.resolve("qbittorrent").is_ok());
        assert!(registry.resolve("deluge").is_ok());
    }

    #[test]
    fn test_resolve_unknown_backend() {
        let registry = BackendRegistry::with_default_backends();
        let err = registry.resolve("rtorrent").unwrap_err();
        assert!(matches!(err, KeyResetError::ConfigError { .. }));
        assert!(err.to_string().contains("rtorrent"));
    }

    #[test]
    #[should_panic(expected = "register called twice")]
    fn test_duplicate_registration_panics() {
        let mut registry = BackendRegistry::with_default_backends();
        registry.register("transmission", transmission::new_backend);
    }

    #[test]
    #[should_panic(expected = "empty name")]
    fn test_empty_name_panics() {
        let mut registry = BackendRegistry::new();
        registry.register("", transmission::new_backend);
    }
}
