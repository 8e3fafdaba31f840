//! Auto mode: no job queue. Every due contract is ingested from its cursors
//! up to the chain head, contracts running side by side.

use crate::config::Config;
use crate::ingest::{IngestContext, TokenMetadataCache};
use crate::jobs::{applicable_job_types, ingest, initial_last_processed};
use crate::repository::{Contract, Repository};
use crate::rpc::ClientRegistry;
use anyhow::{Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cursor holding the RFC 3339 time of a contract's last auto run.
pub const LAST_RUN_KEY: &str = "auto.last_run_at";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AutoRound {
    pub ingested: usize,
    /// Contracts still inside their cooldown.
    pub cooling_down: usize,
    pub failed: usize,
}

pub struct AutoIngestor {
    repository: Arc<dyn Repository>,
    registry: Arc<ClientRegistry>,
    tokens: Arc<TokenMetadataCache>,
    cooldown: Duration,
    interval: Duration,
    max_batch_attempts: usize,
}

impl AutoIngestor {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: Arc<ClientRegistry>,
        tokens: Arc<TokenMetadataCache>,
        config: &Config,
    ) -> Self {
        Self {
            repository,
            registry,
            tokens,
            cooldown: config.auto_cooldown,
            interval: config.job_poll_interval,
            max_batch_attempts: config.max_batch_attempts,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Auto ingestion started, cooldown {:?}", self.cooldown);

        while !shutdown.is_cancelled() {
            match self.run_round(&shutdown).await {
                Ok(round) if round.ingested + round.failed > 0 => info!(
                    ingested = round.ingested,
                    cooling_down = round.cooling_down,
                    failed = round.failed,
                    "Auto round finished"
                ),
                Ok(_) => debug!("No contract due"),
                Err(err) => error!("Auto round failed: {:#}", err),
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Auto ingestion stopped");
        Ok(())
    }

    /// Ingests every contract whose cooldown has elapsed, concurrently, and
    /// waits for all of them.
    pub async fn run_round(&self, shutdown: &CancellationToken) -> Result<AutoRound> {
        let mut round = AutoRound::default();
        let mut tasks = JoinSet::new();

        for contract in self.repository.list_contracts().await? {
            if !self.is_due(&contract).await? {
                round.cooling_down += 1;
                continue;
            }

            let run = ContractRun {
                repository: self.repository.clone(),
                registry: self.registry.clone(),
                tokens: self.tokens.clone(),
                max_batch_attempts: self.max_batch_attempts,
                shutdown: shutdown.child_token(),
            };
            tasks.spawn(async move {
                let id = contract.id;
                (id, run.ingest_contract(contract).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => round.ingested += 1,
                Ok((id, Err(err))) => {
                    round.failed += 1;
                    error!(contract = id, "Auto ingestion failed: {:#}", err);
                }
                Err(err) => {
                    round.failed += 1;
                    error!("Auto ingestion task panicked: {}", err);
                }
            }
        }

        Ok(round)
    }

    /// A missing or unreadable marker counts as due.
    async fn is_due(&self, contract: &Contract) -> Result<bool> {
        let Some(last_run) = self
            .repository
            .get_metadata_for_contract(LAST_RUN_KEY, contract.id)
            .await?
        else {
            return Ok(true);
        };

        let last_run = match DateTime::parse_from_rfc3339(&last_run) {
            Ok(last_run) => last_run.with_timezone(&Utc),
            Err(err) => {
                warn!(contract = contract.id, value = %last_run, "Ignoring invalid {}: {}", LAST_RUN_KEY, err);
                return Ok(true);
            }
        };
        let elapsed = (Utc::now() - last_run).to_std().unwrap_or_default();
        Ok(elapsed >= self.cooldown)
    }
}

/// What one contract's task owns.
struct ContractRun {
    repository: Arc<dyn Repository>,
    registry: Arc<ClientRegistry>,
    tokens: Arc<TokenMetadataCache>,
    max_batch_attempts: usize,
    shutdown: CancellationToken,
}

impl ContractRun {
    /// Catches every job type up to the head. The run marker is written even
    /// when some type failed, so a failing contract also waits out its
    /// cooldown.
    async fn ingest_contract(self, contract: Contract) -> Result<()> {
        let id = contract.id;
        let result = self.ingest_job_types(contract).await;

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.repository
            .update_metadata_for_contract(LAST_RUN_KEY, id, &now)
            .await?;
        result
    }

    async fn ingest_job_types(&self, contract: Contract) -> Result<()> {
        let job_types = applicable_job_types(&contract)?;
        let network = self.registry.get(contract.chain)?;
        let latest = network.client.block_number().await?;
        let id = contract.id;

        let ctx = IngestContext {
            contract,
            network: network.clone(),
            repository: self.repository.clone(),
            max_batch_attempts: self.max_batch_attempts,
            shutdown: self.shutdown.clone(),
        };

        let mut failures = Vec::new();
        for job_type in job_types {
            let cursor = self
                .repository
                .get_metadata_for_contract(job_type.cursor_key(), id)
                .await?
                .and_then(|value| value.parse::<u64>().ok());
            let start = cursor.unwrap_or_else(|| initial_last_processed(&network, latest)) + 1;
            if start > latest {
                debug!(contract = id, %job_type, latest, "Caught up");
                continue;
            }

            match ingest(ctx.clone(), job_type, start, latest, self.tokens.clone(), None).await {
                Ok(summary) => info!(
                    contract = id,
                    %job_type,
                    start,
                    end = latest,
                    inserted = summary.inserted,
                    dropped = summary.dropped,
                    "Auto ingestion caught up"
                ),
                Err(err) => {
                    warn!(contract = id, %job_type, start, end = latest, "Auto ingestion failed: {:#}", err);
                    failures.push(format!("{job_type} ingestion of {start}-{latest} failed: {err:#}"));
                }
            }
        }

        if !failures.is_empty() {
            bail!("{}", failures.join("; "));
        }
        Ok(())
    }
}
