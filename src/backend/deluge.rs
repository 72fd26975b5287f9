//! Deluge backend
//!
//! Drives the Deluge Web JSON API (`/json`). The web UI holds the daemon
//! connection; `check` logs in and verifies the daemon is attached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::backend::{BackendHandle, Torrent, TorrentBackend};
use crate::cli::Config;
use crate::error::KeyResetError;

/// Create an unconnected Deluge backend from the run config
pub fn new_backend(config: &Config) -> Result<Box<dyn TorrentBackend>, KeyResetError> {
    Ok(Box::new(DelugeBackend::new(config)?))
}

/// Deluge Web JSON API client
pub struct DelugeBackend {
    client: reqwest::Client,
    json_url: String,
    pass: String,
    request_id: AtomicI64,
}

#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<JsonError>,
}

#[derive(Debug, Deserialize)]
struct JsonError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TorrentStatus {
    #[serde(default)]
    name: String,
    #[serde(default)]
    trackers: Vec<TrackerStatus>,
}

#[derive(Debug, Deserialize)]
struct TrackerStatus {
    url: String,
}

impl DelugeBackend {
    /// Create a new Deluge backend client
    pub fn new(config: &Config) -> Result<Self, KeyResetError> {
        // The web UI issues a session cookie on login.
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| {
                KeyResetError::backend_error_full(
                    "Failed to build HTTP client",
                    config.base_url(),
                    e.to_string(),
                )
            })?;

        Ok(Self {
            client,
            json_url: format!("{}/json", config.base_url()),
            pass: config.pass.clone(),
            request_id: AtomicI64::new(1),
        })
    }

    /// Issue one Web JSON API call
    async fn json_call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, KeyResetError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "method": method, "params": params, "id": id });

        let response = self
            .client
            .post(&self.json_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                KeyResetError::backend_error_full(
                    format!("Deluge call {} failed", method),
                    self.json_url.clone(),
                    e.to_string(),
                )
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(KeyResetError::backend_error_full(
                format!("Deluge call {} returned {}", method, status),
                self.json_url.clone(),
                status.to_string(),
            ));
        }

        let envelope: JsonEnvelope = response.json().await.map_err(|e| {
            KeyResetError::backend_error_full(
                format!("Deluge call {} response unreadable", method),
                self.json_url.clone(),
                e.to_string(),
            )
        })?;

        if let Some(err) = envelope.error {
            return Err(KeyResetError::backend_error_with_endpoint(
                format!("Deluge call {} failed: {}", method, err.message),
                self.json_url.clone(),
            ));
        }

        Ok(envelope.result)
    }
}

#[async_trait]
impl TorrentBackend for DelugeBackend {
    async fn check(&self) -> Result<bool, KeyResetError> {
        let result = self
            .json_call("auth.login", json!([self.pass]))
            .await?;
        if result != json!(true) {
            return Err(KeyResetError::backend_error_with_endpoint(
                "Deluge web login rejected",
                self.json_url.clone(),
            ));
        }

        let connected = self.json_call("web.connected", json!([])).await?;
        if connected != json!(true) {
            info!("Deluge web UI is not connected to a daemon");
            return Ok(false);
        }

        info!("Connected to Deluge web UI");
        Ok(true)
    }

    async fn list_torrents(&self, tracker: &str) -> Result<Vec<Torrent>, KeyResetError> {
        let result = self
            .json_call(
                "core.get_torrents_status",
                json!([{}, ["name", "trackers"]]),
            )
            .await?;
        let statuses: HashMap<String, TorrentStatus> =
            serde_json::from_value(result).map_err(|e| {
                KeyResetError::backend_error_full(
                    "Deluge torrent list unreadable",
                    self.json_url.clone(),
                    e.to_string(),
                )
            })?;

        let mut torrents = Vec::new();
        for (hash, status) in statuses {
            let matching = status.trackers.iter().find(|t| t.url.contains(tracker));
            let Some(matching) = matching else {
                continue;
            };
            let matching_url = matching.url.clone();
            torrents.push(Torrent {
                hash,
                handle: BackendHandle::Deluge {
                    trackers: status.trackers.into_iter().map(|t| t.url).collect(),
                    matching_url,
                    name: status.name,
                },
            });
        }

        info!("Found {} torrent(s) from Deluge", torrents.len());
        Ok(torrents)
    }

    async fn apply_tracker(
        &self,
        torrent: &Torrent,
        new_tracker: &str,
    ) -> Result<bool, KeyResetError> {
        let BackendHandle::Deluge {
            trackers,
            matching_url,
            name,
        } = &torrent.handle
        else {
            return Err(KeyResetError::backend_error(format!(
                "Torrent {} does not belong to the Deluge backend",
                torrent.hash
            )));
        };

        // Deluge takes the whole tracker list at once, so remove-then-add
        // collapses into one replacement call.
        let rewritten = rewrite_tracker_list(trackers, matching_url, new_tracker);
        let result = self
            .json_call(
                "core.set_torrent_trackers",
                json!([torrent.hash, rewritten]),
            )
            .await;

        match result {
            Ok(_) => {
                info!("Change success! {} {}", torrent.hash, name);
                Ok(true)
            }
            Err(e) => {
                error!("Error while changing torrent {} {}: {}", torrent.hash, name, e);
                Ok(false)
            }
        }
    }

    fn name(&self) -> &str {
        "deluge"
    }
}

/// Build the replacement tracker list: the matching entry swapped for the
/// new URL, tiers renumbered from zero in list order
fn rewrite_tracker_list(
    trackers: &[String],
    matching_url: &str,
    new_tracker: &str,
) -> Vec<serde_json::Value> {
    trackers
        .iter()
        .enumerate()
        .map(|(tier, url)| {
            let url = if url == matching_url {
                new_tracker
            } else {
                url.as_str()
            };
            json!({ "url": url, "tier": tier })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            target: "deluge".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8112,
            secure: false,
            user: String::new(),
            pass: "deluge".to_string(),
            api_key: "key".to_string(),
            proxy: String::new(),
        }
    }

    #[test]
    fn test_json_url() {
        let backend = DelugeBackend::new(&test_config()).expect("build backend");
        assert_eq!(backend.json_url, "http://127.0.0.1:8112/json");
        assert_eq!(backend.name(), "deluge");
    }

    #[test]
    fn test_rewrite_tracker_list_replaces_matching() {
        let trackers = vec![
            "https://daydream.dmhy.best/announce?secure=old".to_string(),
            "https://other.example.org/announce".to_string(),
        ];
        let rewritten = rewrite_tracker_list(
            &trackers,
            "https://daydream.dmhy.best/announce?secure=old",
            "https://daydream.dmhy.best/announce?secure=new",
        );
        assert_eq!(
            rewritten[0],
            json!({ "url": "https://daydream.dmhy.best/announce?secure=new", "tier": 0 })
        );
        assert_eq!(
            rewritten[1],
            json!({ "url": "https://other.example.org/announce", "tier": 1 })
        );
    }

    #[test]
    fn test_torrent_status_parsing() {
        let data = json!({
            "name": "some.iso",
            "trackers": [{ "url": "https://daydream.dmhy.best/announce?secure=old", "tier": 0 }]
        });
        let status: TorrentStatus = serde_json::from_value(data).expect("parse status");
        assert_eq!(status.name, "some.iso");
        assert_eq!(status.trackers.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_tracker_rejects_foreign_handle() {
        let backend = DelugeBackend::new(&test_config()).expect("build backend");
        let torrent = Torrent {
            hash: "abc123".to_string(),
            handle: BackendHandle::Transmission {
                id: 1,
                tracker_id: 0,
                name: "foreign".to_string(),
            },
        };
        let err = backend
            .apply_tracker(&torrent, "https://example.org/announce?secure=x")
            .await
            .unwrap_err();
        assert!(matches!(err, KeyResetError::BackendError { .. }));
    }
}
