//! qBittorrent backend
//!
//! Drives the qBittorrent Web API v2. Authentication is cookie-based;
//! `check` performs the login, so it must run before listing or editing.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::backend::{BackendHandle, Torrent, TorrentBackend};
use crate::cli::Config;
use crate::error::KeyResetError;

/// Create an unconnected qBittorrent backend from the run config
pub fn new_backend(config: &Config) -> Result<Box<dyn TorrentBackend>, KeyResetError> {
    Ok(Box::new(QBittorrentBackend::new(config)?))
}

/// qBittorrent Web API client
pub struct QBittorrentBackend {
    client: reqwest::Client,
    base_url: String,
    user: String,
    pass: String,
}

#[derive(Debug, Deserialize)]
struct TorrentEntry {
    hash: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct TrackerEntry {
    url: String,
}

impl QBittorrentBackend {
    /// Create a new qBittorrent backend client
    pub fn new(config: &Config) -> Result<Self, KeyResetError> {
        // The SID session cookie must survive across calls.
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
            base_url: config.base_url(),
            user: config.user.clone(),
            pass: config.pass.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, path)
    }

    async fn login(&self) -> Result<(), KeyResetError> {
        let response = self
            .client
            .post(self.api_url("auth/login"))
            .form(&[("username", self.user.as_str()), ("password", self.pass.as_str())])
            .send()
            .await
            .map_err(|e| {
                KeyResetError::backend_error_full(
                    "Error while connecting to qBittorrent",
                    self.base_url.clone(),
                    e.to_string(),
                )
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() || body.trim() != "Ok." {
            return Err(KeyResetError::backend_error_full(
                "qBittorrent login rejected",
                self.base_url.clone(),
                format!("{} {}", status, body),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TorrentBackend for QBittorrentBackend {
    async fn check(&self) -> Result<bool, KeyResetError> {
        if !self.user.is_empty() {
            self.login().await?;
        }

        let response = self
            .client
            .get(self.api_url("app/webapiVersion"))
            .send()
            .await
            .map_err(|e| {
                KeyResetError::backend_error_full(
                    "Error while connecting to qBittorrent",
                    self.base_url.clone(),
                    e.to_string(),
                )
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(KeyResetError::backend_error_full(
                "qBittorrent API version query failed",
                self.base_url.clone(),
                status.to_string(),
            ));
        }

        let version = response.text().await.unwrap_or_default();
        info!("Current qBittorrent API version {}", version);
        Ok(true)
    }

    async fn list_torrents(&self, tracker: &str) -> Result<Vec<Torrent>, KeyResetError> {
        let response = self
            .client
            .get(self.api_url("torrents/info"))
            .send()
            .await
            .map_err(|e| {
                KeyResetError::backend_error_full(
                    "Error while getting torrent list from qBittorrent",
                    self.base_url.clone(),
                    e.to_string(),
                )
            })?;
        let entries: Vec<TorrentEntry> = response.json().await.map_err(|e| {
            KeyResetError::backend_error_full(
                "qBittorrent torrent list unreadable",
                self.base_url.clone(),
                e.to_string(),
            )
        })?;

        let mut torrents = Vec::new();
        for entry in entries {
            // Trackers come from a separate call per torrent; a failure
            // here skips the torrent, it does not fail the listing.
            let trackers = match self.fetch_trackers(&entry.hash).await {
                Ok(trackers) => trackers,
                Err(e) => {
                    warn!(
                        "Getting tracker of torrent {} {} failed: {}",
                        entry.hash, entry.name, e
                    );
                    continue;
                }
            };

            if let Some(matching) = trackers.iter().find(|t| t.url.contains(tracker)) {
                torrents.push(Torrent {
                    hash: entry.hash.clone(),
                    handle: BackendHandle::QBittorrent {
                        tracker_url: matching.url.clone(),
                        name: entry.name.clone(),
                    },
                });
            }
        }

        info!("Found {} torrent(s) from qBittorrent", torrents.len());
        Ok(torrents)
    }

    async fn apply_tracker(
        &self,
        torrent: &Torrent,
        new_tracker: &str,
    ) -> Result<bool, KeyResetError> {
        let BackendHandle::QBittorrent { tracker_url, name } = &torrent.handle else {
            return Err(KeyResetError::backend_error(format!(
                "Torrent {} does not belong to the qBittorrent backend",
                torrent.hash
            )));
        };

        let response = self
            .client
            .post(self.api_url("torrents/editTracker"))
            .form(&[
                ("hash", torrent.hash.as_str()),
                ("origUrl", tracker_url.as_str()),
                ("newUrl", new_tracker),
            ])
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                info!("Change success! {} {}", torrent.hash, name);
                Ok(true)
            }
            Ok(response) => {
                error!(
                    "Error while changing torrent {} {}: status {}",
                    torrent.hash,
                    name,
                    response.status()
                );
                Ok(false)
            }
            Err(e) => {
                error!("Error while changing torrent {} {}: {}", torrent.hash, name, e);
                Ok(false)
            }
        }
    }

    fn name(&self) -> &str {
        "qbittorrent"
    }
}

impl QBittorrentBackend {
    async fn fetch_trackers(&self, hash: &str) -> Result<Vec<TrackerEntry>, KeyResetError> {
        let response = self
            .client
            .get(self.api_url("torrents/trackers"))
            .query(&[("hash", hash)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(KeyResetError::backend_error_full(
                "qBittorrent tracker query failed",
                self.base_url.clone(),
                response.status().to_string(),
            ));
        }

        Ok(response.json().await.map_err(|e| {
            KeyResetError::backend_error_full(
                "qBittorrent tracker list unreadable",
                self.base_url.clone(),
                e.to_string(),
            )
        })?)
    }
}
