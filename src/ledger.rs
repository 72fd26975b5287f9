//! Progress ledger
//!
//! Persisted set of torrent hashes whose keys have already been reset.
//! Consulted before scheduling and saved after every batch, so a re-run
//! never resubmits a processed torrent and a crash loses at most one
//! batch's unsaved successes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::KeyResetError;

/// Default ledger file name
pub const LEDGER_FILE: &str = "record.json";

/// Persisted hash → marker map
///
/// Missing or corrupt state degrades to an empty ledger (reprocess
/// everything); a failed save is fatal to the run, since silently losing
/// progress would risk duplicate key consumption.
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    records: HashMap<String, u32>,
}

impl ProgressLedger {
    /// Load the ledger from `path`
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match fs::read(&path).await {
            Ok(data) => match serde_json::from_slice::<HashMap<String, u32>>(&data) {
                Ok(records) => records,
                Err(e) => {
                    warn!(
                        "Ledger {} is corrupt ({}); reprocessing everything",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        debug!(
            "Loaded ledger {} with {} record(s)",
            path.display(),
            records.len()
        );
        Self { path, records }
    }

    /// Whether `hash` has already been processed
    pub fn contains(&self, hash: &str) -> bool {
        self.records.contains_key(hash)
    }

    /// Mark `hash` processed; marking twice is a no-op
    pub fn mark_processed(&mut self, hash: &str) {
        self.records.entry(hash.to_string()).or_insert(1);
    }

    /// Number of processed hashes
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the ledger is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize the full map and overwrite the persisted state
    pub async fn save(&self) -> Result<(), KeyResetError> {
        let data = serde_json::to_vec(&self.records).map_err(|e| {
            KeyResetError::ledger_error_full(
                "Ledger serialization failed",
                self.path.display().to_string(),
                e.to_string(),
            )
        })?;
        fs::write(&self.path, data).await.map_err(|e| {
            KeyResetError::ledger_error_full(
                "Write ledger failed",
                self.path.display().to_string(),
                e.to_string(),
            )
        })?;
        debug!("Saved ledger {} ({} record(s))", self.path.display(), self.records.len());
        Ok(())
    }

    /// Path of the persisted state
    pub fn path(&self) -> &Path {
        &self.path
    }
}
