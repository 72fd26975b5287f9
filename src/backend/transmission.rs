//! Transmission backend
//!
//! Drives the Transmission RPC API (JSON over HTTP at `/transmission/rpc`),
//! including the `X-Transmission-Session-Id` renegotiation handshake.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendHandle, Torrent, TorrentBackend};
use crate::cli::Config;
use crate::error::KeyResetError;

/// Highest Transmission RPC version this client speaks
const SUPPORTED_RPC_VERSION: i64 = 15;

const SESSION_ID_HEADER: &str = "X-Transmission-Session-Id";

/// Create an unconnected Transmission backend from the run config
pub fn new_backend(config: &Config) -> Result<Box<dyn TorrentBackend>, KeyResetError> {
    Ok(Box::new(TransmissionBackend::new(config)?))
}

/// Transmission RPC client
pub struct TransmissionBackend {
    client: reqwest::Client,
    rpc_url: String,
    user: String,
    pass: String,
    session_id: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    #[serde(rename = "rpc-version")]
    rpc_version: i64,
    #[serde(rename = "rpc-version-minimum")]
    rpc_version_minimum: i64,
}

#[derive(Debug, Deserialize)]
struct TorrentList {
    #[serde(default)]
    torrents: Vec<TorrentEntry>,
}

#[derive(Debug, Deserialize)]
struct TorrentEntry {
    id: i64,
    #[serde(rename = "hashString")]
    hash_string: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    trackers: Vec<TrackerEntry>,
}

#[derive(Debug, Deserialize)]
struct TrackerEntry {
    id: i64,
    announce: String,
}

impl TransmissionBackend {
    /// Create a new Transmission backend client
    pub fn new(config: &Config) -> Result<Self, KeyResetError> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            KeyResetError::backend_error_full(
                "Failed to build HTTP client",
                config.base_url(),
                e.to_string(),
            )
        })?;

        Ok(Self {
            client,
            rpc_url: format!("{}/transmission/rpc", config.base_url()),
            user: config.user.clone(),
            pass: config.pass.clone(),
            session_id: Mutex::new(None),
        })
    }

    /// Issue one RPC call, renegotiating the session id on 409
    async fn rpc_call(
        &self,
        method: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, KeyResetError> {
        let body = json!({ "method": method, "arguments": arguments });

        for _ in 0..2 {
            let mut request = self.client.post(&self.rpc_url).json(&body);
            if !self.user.is_empty() {
                request = request.basic_auth(&self.user, Some(&self.pass));
            }
            if let Some(id) = self.session_id.lock().await.as_deref() {
                request = request.header(SESSION_ID_HEADER, id);
            }

            let response = request.send().await.map_err(|e| {
                KeyResetError::backend_error_full(
                    format!("Transmission RPC {} failed", method),
                    self.rpc_url.clone(),
                    e.to_string(),
                )
            })?;

            if response.status().as_u16() == 409 {
                let new_id = response
                    .headers()
                    .get(SESSION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                debug!("Negotiated new Transmission session id");
                *self.session_id.lock().await = new_id;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(KeyResetError::backend_error_full(
                    format!("Transmission RPC {} returned {}", method, status),
                    self.rpc_url.clone(),
                    text,
                ));
            }

            let envelope: RpcEnvelope = response.json().await.map_err(|e| {
                KeyResetError::backend_error_full(
                    format!("Transmission RPC {} response unreadable", method),
                    self.rpc_url.clone(),
                    e.to_string(),
                )
            })?;

            if envelope.result != "success" {
                return Err(KeyResetError::backend_error_with_endpoint(
                    format!("Transmission RPC {} failed: {}", method, envelope.result),
                    self.rpc_url.clone(),
                ));
            }

            return Ok(envelope.arguments);
        }

        Err(KeyResetError::backend_error_with_endpoint(
            "Transmission session-id negotiation failed",
            self.rpc_url.clone(),
        ))
    }
}

#[async_trait]
impl TorrentBackend for TransmissionBackend {
    async fn check(&self) -> Result<bool, KeyResetError> {
        let arguments = self.rpc_call("session-get", json!({})).await?;
        let session: SessionInfo = serde_json::from_value(arguments).map_err(|e| {
            KeyResetError::backend_error_full(
                "Transmission session info unreadable",
                self.rpc_url.clone(),
                e.to_string(),
            )
        })?;

        info!(
            "Connected to Transmission, RPC version {} (minimum {})",
            session.rpc_version, session.rpc_version_minimum
        );
        Ok(session.rpc_version_minimum <= SUPPORTED_RPC_VERSION)
    }

    async fn list_torrents(&self, tracker: &str) -> Result<Vec<Torrent>, KeyResetError> {
        let arguments = self
            .rpc_call(
                "torrent-get",
                json!({ "fields": ["id", "hashString", "name", "trackers"] }),
            )
            .await?;
        let list: TorrentList = serde_json::from_value(arguments).map_err(|e| {
            KeyResetError::backend_error_full(
                "Transmission torrent list unreadable",
                self.rpc_url.clone(),
                e.to_string(),
            )
        })?;

        let mut torrents = Vec::new();
        for entry in list.torrents {
            let matching = entry
                .trackers
                .iter()
                .find(|t| t.announce.contains(tracker));
            let Some(matching) = matching else {
                continue;
            };
            torrents.push(Torrent {
                hash: entry.hash_string.clone(),
                handle: BackendHandle::Transmission {
                    id: entry.id,
                    tracker_id: matching.id,
                    name: entry.name.clone(),
                },
            });
        }

        info!("Found {} torrent(s) from Transmission", torrents.len());
        Ok(torrents)
    }

    async fn apply_tracker(
        &self,
        torrent: &Torrent,
        new_tracker: &str,
    ) -> Result<bool, KeyResetError> {
        let BackendHandle::Transmission {
            id,
            tracker_id,
            name,
        } = &torrent.handle
        else {
            return Err(KeyResetError::backend_error(format!(
                "Torrent {} does not belong to the Transmission backend",
                torrent.hash
            )));
        };

        // Remove first; do not attempt the add when the remove fails.
        if let Err(e) = self
            .rpc_call(
                "torrent-set",
                json!({ "ids": [id], "trackerRemove": [tracker_id] }),
            )
            .await
        {
            error!("Error while changing torrent {} {} {}: {}", id, torrent.hash, name, e);
            return Ok(false);
        }

        if let Err(e) = self
            .rpc_call(
                "torrent-set",
                json!({ "ids": [id], "trackerAdd": [new_tracker] }),
            )
            .await
        {
            error!("Error while changing torrent {} {} {}: {}", id, torrent.hash, name, e);
            warn!(
                "Torrent {} {} lost its tracker tier; manual recovery may be needed",
                torrent.hash, name
            );
            return Ok(false);
        }

        info!("Change success! {} {} {}", id, torrent.hash, name);
        Ok(true)
    }

    fn name(&self) -> &str {
        "transmission"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            target: "transmission".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9091,
            secure: false,
            user: String::new(),
            pass: String::new(),
            api_key: "key".to_string(),
            proxy: String::new(),
        }
    }

    #[test]
    fn test_rpc_url() {
        let backend = TransmissionBackend::new(&test_config()).expect("build backend");
        assert_eq!(backend.rpc_url, "http://127.0.0.1:9091/transmission/rpc");
        assert_eq!(backend.name(), "transmission");
    }

    #[test]
    fn test_session_info_parsing() {
        let arguments = json!({ "rpc-version": 17, "rpc-version-minimum": 14 });
        let session: SessionInfo = serde_json::from_value(arguments).expect("parse session");
        assert_eq!(session.rpc_version, 17);
        assert_eq!(session.rpc_version_minimum, 14);
    }

    #[test]
    fn test_torrent_list_parsing() {
        let arguments = json!({
            "torrents": [
                {
                    "id": 3,
                    "hashString": "abc123",
                    "name": "some.iso",
                    "trackers": [
                        { "id": 0, "announce": "https://daydream.dmhy.best/announce?secure=old" }
                    ]
                }
            ]
        });
        let list: TorrentList = serde_json::from_value(arguments).expect("parse list");
        assert_eq!(list.torrents.len(), 1);
        assert_eq!(list.torrents[0].hash_string, "abc123");
        assert_eq!(list.torrents[0].trackers[0].id, 0);
    }

    #[tokio::test]
    async fn test_apply_tracker_rejects_foreign_handle() {
        let backend = TransmissionBackend::new(&test_config()).expect("build backend");
        let torrent = Torrent {
            hash: "abc123".to_string(),
            handle: BackendHandle::QBittorrent {
                tracker_url: "https://example.org/announce".to_string(),
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
