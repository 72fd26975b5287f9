//! Orchestrating client
//!
//! Owns the selected backend, the key-exchange client, and the ledger
//! location for one run; drives the whole operation from connectivity
//! check to final tally.

use std::path::PathBuf;

use tracing::{error, info};

use crate::backend::{BackendRegistry, TorrentBackend};
use crate::cli::Config;
use crate::engine::scheduler::{RunSummary, Scheduler};
use crate::engine::TRACKER_MATCH;
use crate::error::KeyResetError;
use crate::exchange::KeyExchangeClient;
use crate::ledger::{ProgressLedger, LEDGER_FILE};

/// One configured key-reset run
pub struct KeyResetClient {
    backend: Box<dyn TorrentBackend>,
    exchange: KeyExchangeClient,
    scheduler: Scheduler,
    ledger_path: PathBuf,
    backend_url: String,
}

impl std::fmt::Debug for KeyResetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResetClient")
            .field("backend", &self.backend.name())
            .field("ledger_path", &self.ledger_path)
            .field("backend_url", &self.backend_url)
            .finish_non_exhaustive()
    }
}

impl KeyResetClient {
    /// Build a run from a validated config and the backend registry
    pub fn new(config: &Config, registry: &BackendRegistry) -> Result<Self, KeyResetError> {
        let factory = registry.resolve(&config.target)?;
        let backend = factory(config)?;
        let exchange = KeyExchangeClient::new(config)?;

        Ok(Self {
            backend,
            exchange,
            scheduler: Scheduler::new(),
            ledger_path: PathBuf::from(LEDGER_FILE),
            backend_url: config.base_url(),
        })
    }

    /// Override the ledger file location
    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    /// Override the scheduler (batch size / pacing)
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Execute the run: check → enumerate → exchange → apply → record
    pub async fn run(&mut self) -> Result<RunSummary, KeyResetError> {
        match self.backend.check().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(KeyResetError::backend_error_with_endpoint(
                    format!("{} server is not compatible", self.backend.name()),
                    self.backend_url.clone(),
                ));
            }
            Err(e) => {
                error!(
                    "Please check your {} server {}",
                    self.backend.name(),
                    self.backend_url
                );
                return Err(e);
            }
        }

        let torrents = self.backend.list_torrents(TRACKER_MATCH).await?;
        let mut ledger = ProgressLedger::load(&self.ledger_path).await;

        let summary = self
            .scheduler
            .process(self.backend.as_ref(), &self.exchange, &mut ledger, torrents)
            .await?;

        info!(
            "Finished: {} candidate(s), {} already processed, {} applied, {} skipped, {} batch(es) abandoned",
            summary.candidates,
            summary.already_processed,
            summary.applied,
            summary.skipped,
            summary.abandoned_batches
        );
        Ok(summary)
    }
}
