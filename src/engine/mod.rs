//! Key-reset orchestration engine
//!
//! Composes a backend client, the key-exchange client, and the progress
//! ledger into one resumable batch operation:
//! enumerate → exchange → apply → record.

pub mod client;
pub mod scheduler;

/// Substring identifying the tracker whose torrents get new keys
pub const TRACKER_MATCH: &str = "dmhy";

pub use client::KeyResetClient;
pub use scheduler::{RunSummary, Scheduler};
