//! Batch scheduler
//!
//! Partitions the unprocessed working set into fixed-size batches, drives
//! one key exchange per batch with a fixed pause between rounds, applies
//! the issued keys through the backend, and persists the ledger after
//! every batch. Per-torrent and per-batch failures are absorbed here;
//! only authorization and ledger errors abort the run.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::backend::{Torrent, TorrentBackend};
use crate::error::KeyResetError;
use crate::exchange::{Batch, KeyResponse, KeySource, NEW_TRACKER_PREFIX};
use crate::ledger::ProgressLedger;

/// Default number of torrents per key-exchange call
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default pause between successive batches
pub const BATCH_PAUSE: Duration = Duration::from_secs(5);

/// Outcome of one scheduled run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Torrents matching the tracker filter
    pub candidates: usize,
    /// Candidates skipped because the ledger already holds them
    pub already_processed: usize,
    /// Torrents whose new tracker was applied and recorded
    pub applied: usize,
    /// Torrents skipped on per-item errors (eligible next run)
    pub skipped: usize,
    /// Batches abandoned after exchange failures
    pub abandoned_batches: usize,
}

/// Drives batched key exchanges over a working set of torrents
pub struct Scheduler {
    batch_size: usize,
    batch_pause: Duration,
}

impl Scheduler {
    /// Create a scheduler with the default batch size and pause
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: BATCH_PAUSE,
        }
    }

    /// Override the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        self.batch_size = batch_size;
        self
    }

    /// Override the inter-batch pause
    pub fn with_batch_pause(mut self, batch_pause: Duration) -> Self {
        self.batch_pause = batch_pause;
        self
    }

    /// Process the working set: filter, batch, exchange, apply, record
    ///
    /// The ledger is saved after every completed batch. Exchange failures
    /// other than authorization abandon the affected batch and continue.
    pub async fn process(
        &self,
        backend: &dyn TorrentBackend,
        keys: &dyn KeySource,
        ledger: &mut ProgressLedger,
        torrents: Vec<Torrent>,
    ) -> Result<RunSummary, KeyResetError> {
        let mut summary = RunSummary {
            candidates: torrents.len(),
            ..RunSummary::default()
        };

        let pending: Vec<Torrent> = torrents
            .into_iter()
            .filter(|t| !ledger.contains(&t.hash))
            .collect();
        summary.already_processed = summary.candidates - pending.len();

        info!("Found {} torrent(s) to process", pending.len());
        if pending.is_empty() {
            return Ok(summary);
        }

        let mut chunks = Vec::new();
        let mut rest = pending;
        while rest.len() > self.batch_size {
            let tail = rest.split_off(self.batch_size);
            chunks.push(rest);
            rest = tail;
        }
        chunks.push(rest);

        let total_batches = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            if index > 0 {
                info!("Wait {} seconds for next batch", self.batch_pause.as_secs());
                tokio::time::sleep(self.batch_pause).await;
            }

            let batch_len = chunk.len();
            let batch = match Batch::build(chunk) {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Failed to build batch {}/{}: {}", index + 1, total_batches, e);
                    summary.abandoned_batches += 1;
                    summary.skipped += batch_len;
                    continue;
                }
            };

            let responses = match keys.exchange(&batch).await {
                Ok(responses) => responses,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "Abandoning batch {}/{} ({} torrent(s)): {}",
                        index + 1,
                        total_batches,
                        batch.len(),
                        e
                    );
                    summary.abandoned_batches += 1;
                    summary.skipped += batch.len();
                    continue;
                }
            };

            self.apply_responses(backend, ledger, &batch, responses, &mut summary)
                .await;
            ledger.save().await?;
        }

        Ok(summary)
    }

    /// Apply a completed batch's responses through the backend
    async fn apply_responses(
        &self,
        backend: &dyn TorrentBackend,
        ledger: &mut ProgressLedger,
        batch: &Batch,
        responses: Vec<KeyResponse>,
        summary: &mut RunSummary,
    ) {
        for response in responses {
            if !response.is_success() {
                info!("Skip torrent because of response error!");
                info!("{} {}", response.error.code, response.error.message);
                summary.skipped += 1;
                continue;
            }

            let Some(torrent) = batch.torrent_for(response.id) else {
                warn!("Response id {} matches no request in this batch", response.id);
                summary.skipped += 1;
                continue;
            };

            let new_tracker = format!("{}{}", NEW_TRACKER_PREFIX, response.result);
            match backend.apply_tracker(torrent, &new_tracker).await {
                Ok(true) => {
                    ledger.mark_processed(&torrent.hash);
                    summary.applied += 1;
                }
                Ok(false) => {
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!("Error while edit torrent {}: {}", torrent.hash, e);
                    summary.skipped += 1;
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
