//! Error types for the key-reset tool
//!
//! This module defines the error taxonomy shared by all components:
//! configuration, backend connectivity, key-exchange, authorization,
//! and ledger persistence failures.

use std::fmt;

/// Error type for key-reset operations
#[derive(Debug, Clone)]
pub enum KeyResetError {
    /// Configuration errors (missing host/port/API key, unknown backend)
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Backend connectivity, compatibility, or wire-call errors
    BackendError {
        message: String,
        endpoint: Option<String>,
        source: Option<String>,
    },

    /// Key-exchange errors (retries exhausted, malformed response body)
    ExchangeError {
        message: String,
        status: Option<u16>,
        source: Option<String>,
    },

    /// Authorization failure from the key service (HTTP 403); never retried
    AuthorizationError {
        message: String,
    },

    /// Progress-ledger persistence errors
    LedgerError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },
}

impl KeyResetError {
    /// Create a new ConfigError
    pub fn config_error(message: impl Into<String>) -> Self {
        KeyResetError::ConfigError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        KeyResetError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new BackendError
    pub fn backend_error(message: impl Into<String>) -> Self {
        KeyResetError::BackendError {
            message: message.into(),
            endpoint: None,
            source: None,
        }
    }

    /// Create a new BackendError with endpoint
    pub fn backend_error_with_endpoint(
        message: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        KeyResetError::BackendError {
            message: message.into(),
            endpoint: Some(endpoint.into()),
            source: None,
        }
    }

    /// Create a new BackendError with endpoint and source
    pub fn backend_error_full(
        message: impl Into<String>,
        endpoint: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        KeyResetError::BackendError {
            message: message.into(),
            endpoint: Some(endpoint.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ExchangeError
    pub fn exchange_error(message: impl Into<String>) -> Self {
        KeyResetError::ExchangeError {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Create a new ExchangeError with HTTP status
    pub fn exchange_error_with_status(message: impl Into<String>, status: u16) -> Self {
        KeyResetError::ExchangeError {
            message: message.into(),
            status: Some(status),
            source: None,
        }
    }

    /// Create a new ExchangeError with source
    pub fn exchange_error_with_source(
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        KeyResetError::ExchangeError {
            message: message.into(),
            status: None,
            source: Some(source.into()),
        }
    }

    /// Create a new AuthorizationError
    pub fn authorization_error(message: impl Into<String>) -> Self {
        KeyResetError::AuthorizationError {
            message: message.into(),
        }
    }

    /// Create a new LedgerError
    pub fn ledger_error(message: impl Into<String>) -> Self {
        KeyResetError::LedgerError {
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create a new LedgerError with path and source
    pub fn ledger_error_full(
        message: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        KeyResetError::LedgerError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Whether this error must terminate the whole run rather than one batch
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KeyResetError::ConfigError { .. }
                | KeyResetError::BackendError { .. }
                | KeyResetError::AuthorizationError { .. }
                | KeyResetError::LedgerError { .. }
        )
    }
}

impl fmt::Display for KeyResetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyResetError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            KeyResetError::BackendError {
                message,
                endpoint,
                source,
            } => match (endpoint, source) {
                (Some(e), Some(s)) => {
                    write!(f, "Backend error: {} (endpoint: {}, source: {})", message, e, s)
                }
                (Some(e), None) => write!(f, "Backend error: {} (endpoint: {})", message, e),
                (None, Some(s)) => write!(f, "Backend error: {} (source: {})", message, s),
                (None, None) => write!(f, "Backend error: {}", message),
            },
            KeyResetError::ExchangeError {
                message,
                status,
                source,
            } => match (status, source) {
                (Some(c), Some(s)) => {
                    write!(f, "Exchange error: {} (status: {}, source: {})", message, c, s)
                }
                (Some(c), None) => write!(f, "Exchange error: {} (status: {})", message, c),
                (None, Some(s)) => write!(f, "Exchange error: {} (source: {})", message, s),
                (None, None) => write!(f, "Exchange error: {}", message),
            },
            KeyResetError::AuthorizationError { message } => {
                write!(f, "Authorization error: {}", message)
            }
            KeyResetError::LedgerError {
                message,
                path,
                source,
            } => match (path, source) {
                (Some(p), Some(s)) => {
                    write!(f, "Ledger error: {} (path: {}, source: {})", message, p, s)
                }
                (Some(p), None) => write!(f, "Ledger error: {} (path: {})", message, p),
                (None, Some(s)) => write!(f, "Ledger error: {} (source: {})", message, s),
                (None, None) => write!(f, "Ledger error: {}", message),
            },
        }
    }
}

impl std::error::Error for KeyResetError {}

// Implement From traits for common error types

impl From<reqwest::Error> for KeyResetError {
    fn from(err: reqwest::Error) -> Self {
        KeyResetError::exchange_error_with_source("HTTP request failed", err.to_string())
    }
}

impl From<serde_json::Error> for KeyResetError {
    fn from(err: serde_json::Error) -> Self {
        KeyResetError::exchange_error_with_source("Failed to process JSON data", err.to_string())
    }
}

impl From<std::io::Error> for KeyResetError {
    fn from(err: std::io::Error) -> Self {
        KeyResetError::ledger_error_full(err.to_string(), "unknown", err.kind().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let err = KeyResetError::config_error("Host cannot be empty");
        assert_eq!(err.to_string(), "Config error: Host cannot be empty");
    }

    #[test]
    fn test_config_error_with_field() {
        let err = KeyResetError::config_error_with_field("Value missing", "api_key");
        assert!(err.to_string().contains("Config error"));
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_backend_error_with_endpoint() {
        let err = KeyResetError::backend_error_with_endpoint(
            "Connection refused",
            "http://127.0.0.1:9091",
        );
        assert!(err.to_string().contains("Backend error"));
        assert!(err.to_string().contains("http://127.0.0.1:9091"));
    }

    #[test]
    fn test_exchange_error_with_status() {
        let err = KeyResetError::exchange_error_with_status("Retries exhausted", 503);
        assert!(err.to_string().contains("Exchange error"));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_authorization_error_is_fatal() {
        let err = KeyResetError::authorization_error("Wrong API key");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Authorization error"));
    }

    #[test]
    fn test_exchange_error_is_not_fatal() {
        let err = KeyResetError::exchange_error("Retries exhausted");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_ledger_error_full() {
        let err = KeyResetError::ledger_error_full("Write failed", "record.json", "disk full");
        assert!(err.to_string().contains("Ledger error"));
        assert!(err.to_string().contains("record.json"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: KeyResetError = io_err.into();
        assert!(matches!(err, KeyResetError::LedgerError { .. }));
    }
}
