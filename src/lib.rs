//! u2-key-reset
//!
//! Batch secret-key reset for U2 private-tracker torrents across
//! Transmission, qBittorrent, and Deluge backends.

pub mod backend;
pub mod cli;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod ledger;

pub use error::KeyResetError;

pub use backend::{BackendHandle, BackendRegistry, Torrent, TorrentBackend};
pub use cli::{CliArgs, Config};
pub use engine::{KeyResetClient, RunSummary, Scheduler, TRACKER_MATCH};
pub use exchange::{
    Batch, KeyError, KeyExchangeClient, KeyRequest, KeyResponse, KeySource, DEFAULT_ENDPOINT,
    NEW_TRACKER_PREFIX,
};
pub use ledger::{ProgressLedger, LEDGER_FILE};
