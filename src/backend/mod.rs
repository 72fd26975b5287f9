//! Torrent-client backend abstraction
//!
//! This module provides a trait-based abstraction over the supported
//! torrent clients, normalizing their heterogeneous APIs into one
//! capability set: connectivity check, tracker-filtered enumeration,
//! and tracker rewrite.

pub mod deluge;
pub mod qbittorrent;
pub mod registry;
pub mod transmission;

use async_trait::async_trait;

use crate::error::KeyResetError;

pub use registry::BackendRegistry;

/// One torrent known to a backend
///
/// Valid only for the lifetime of the backend session that produced it;
/// never cached across runs.
#[derive(Debug, Clone)]
pub struct Torrent {
    /// Stable content hash assigned by the backend
    pub hash: String,
    /// Backend-specific data needed to apply a tracker change later
    pub handle: BackendHandle,
}

/// Backend-specific payload carried alongside a torrent
///
/// Each variant holds exactly what that backend's `apply_tracker` needs.
/// Only the backend that produced a handle ever inspects it.
#[derive(Debug, Clone)]
pub enum BackendHandle {
    Transmission {
        id: i64,
        tracker_id: i64,
        name: String,
    },
    QBittorrent {
        tracker_url: String,
        name: String,
    },
    Deluge {
        trackers: Vec<String>,
        matching_url: String,
        name: String,
    },
}

impl BackendHandle {
    /// Torrent display name, for log lines
    pub fn name(&self) -> &str {
        match self {
            BackendHandle::Transmission { name, .. } => name,
            BackendHandle::QBittorrent { name, .. } => name,
            BackendHandle::Deluge { name, .. } => name,
        }
    }
}

/// Abstract torrent-client backend
///
/// Implementations translate the capability set into the client's native
/// RPC/HTTP calls. `check` must be called (and succeed) before the other
/// operations; it performs any login the backend requires.
#[async_trait]
pub trait TorrentBackend: Send + Sync {
    /// Verify the backend is reachable and compatible
    ///
    /// `Ok(false)` means reachable but incompatible (e.g. RPC version too
    /// new); `Err` means unreachable. Callers treat both as fatal.
    async fn check(&self) -> Result<bool, KeyResetError>;

    /// List every torrent whose announce URL contains `tracker`
    ///
    /// Plain substring match. A single torrent whose metadata cannot be
    /// inspected is skipped with a warning; only the listing call itself
    /// failing is an error.
    async fn list_torrents(&self, tracker: &str) -> Result<Vec<Torrent>, KeyResetError>;

    /// Replace the torrent's matching tracker with `new_tracker`
    ///
    /// Remove-then-add semantics; when the remove step fails the add step
    /// is not attempted. Safe to retry with the same arguments from a
    /// fresh listing.
    async fn apply_tracker(
        &self,
        torrent: &Torrent,
        new_tracker: &str,
    ) -> Result<bool, KeyResetError>;

    /// Backend name, for log lines
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_name() {
        let handle = BackendHandle::Transmission {
            id: 7,
            tracker_id: 0,
            name: "ubuntu.iso".to_string(),
        };
        assert_eq!(handle.name(), "ubuntu.iso");

        let handle = BackendHandle::Deluge {
            trackers: vec!["https://example.org/announce".to_string()],
            matching_url: "https://example.org/announce".to_string(),
            name: "fedora.iso".to_string(),
        };
        assert_eq!(handle.name(), "fedora.iso");
    }
}
