//! CLI configuration module
//!
//! Manages the run configuration: resolution from flags or the saved
//! config file, validation, and persistence.

use crate::cli::args::CliArgs;
use crate::error::KeyResetError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Default backend when the target is left unset
pub const DEFAULT_TARGET: &str = "transmission";

/// Configuration for one key-reset run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target backend name
    pub target: String,
    /// Backend host
    pub host: String,
    /// Backend port
    pub port: u16,
    /// Connect to the backend over HTTPS
    pub secure: bool,
    /// Backend user name (empty when unused)
    pub user: String,
    /// Backend password (empty when unused)
    pub pass: String,
    /// U2 API key
    pub api_key: String,
    /// HTTP proxy for the U2 API (empty when unused)
    pub proxy: String,
}

impl Config {
    /// Build a configuration purely from command-line flags
    ///
    /// Returns `None` when the flags do not form a usable configuration,
    /// in which case the saved config file is consulted instead.
    pub fn from_args(args: &CliArgs) -> Option<Self> {
        let mut config = Config {
            target: args.target.clone().unwrap_or_default(),
            host: args.host.clone().unwrap_or_default(),
            port: args.port.unwrap_or(0),
            secure: args.secure,
            user: args.user.clone().unwrap_or_default(),
            pass: args.password.clone().unwrap_or_default(),
            api_key: args.api_key.clone().unwrap_or_default(),
            proxy: args.proxy.clone().unwrap_or_default(),
        };

        match config.validate() {
            Ok(()) => Some(config),
            Err(_) => None,
        }
    }

    /// Load a saved configuration from `path`
    ///
    /// A missing or unreadable file yields `None`; a file that does not
    /// parse is reported and also yields `None`.
    pub async fn load(path: &Path) -> Option<Self> {
        let data = fs::read(path).await.ok()?;
        match serde_json::from_slice::<Config>(&data) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Error while decoding saved config: {}", e);
                None
            }
        }
    }

    /// Serialize the configuration and overwrite `path`
    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec(self)
            .map_err(|e| KeyResetError::config_error(format!("Config serialization failed: {}", e)))?;
        fs::write(path, data).await.map_err(|e| {
            KeyResetError::config_error(format!(
                "Write config {} failed: {}",
                path.display(),
                e
            ))
        })?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate the configuration, applying defaults and sanitization
    ///
    /// An unset target defaults to transmission. Users habitually paste the
    /// whole endpoint URL into the API-key field, so the known URL fragments
    /// are stripped before use.
    pub fn validate(&mut self) -> Result<()> {
        if self.target.is_empty() {
            self.target = DEFAULT_TARGET.to_string();
        }
        if self.host.is_empty() {
            return Err(KeyResetError::config_error_with_field("Host cannot be empty", "host").into());
        }
        if self.port == 0 {
            return Err(KeyResetError::config_error_with_field("Port cannot be 0", "port").into());
        }
        if self.api_key.is_empty() {
            return Err(
                KeyResetError::config_error_with_field("API key cannot be empty", "api_key").into(),
            );
        }

        for fragment in [
            "https://",
            "u2.dmhy.org",
            "jsonrpc_torrentkey.php",
            "apikey=",
            "?",
            "/",
        ] {
            self.api_key = self.api_key.replace(fragment, "");
        }

        Ok(())
    }

    /// URL scheme used to reach the backend
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// Base URL of the backend, for wire clients and operator messages
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }

    /// Check if a proxy is configured for the U2 API
    pub fn has_proxy(&self) -> bool {
        !self.proxy.is_empty()
    }
}
