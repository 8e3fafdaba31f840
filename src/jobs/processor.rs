use super::ingest;
use crate::ingest::{IngestContext, IngestSummary, ProgressReporter, TokenMetadataCache};
use crate::repository::{CURRENT_BLOCK, Job, JobStatus, Repository, TOTAL_BLOCKS};
use crate::rpc::ClientRegistry;
use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pauses of the processor loop.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorTimings {
    /// After each job, successful or not.
    pub job_delay: Duration,
    /// When the queue is empty.
    pub poll_interval: Duration,
    /// After the loop itself failed.
    pub error_backoff: Duration,
}

/// Error recorded on jobs a previous worker left RUNNING.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by restart before completion";

/// Single worker draining the job queue oldest-first.
pub struct JobProcessor {
    repository: Arc<dyn Repository>,
    registry: Arc<ClientRegistry>,
    tokens: Arc<TokenMetadataCache>,
    max_batch_attempts: usize,
    timings: ProcessorTimings,
}

impl JobProcessor {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: Arc<ClientRegistry>,
        tokens: Arc<TokenMetadataCache>,
        max_batch_attempts: usize,
        timings: ProcessorTimings,
    ) -> Self {
        Self {
            repository,
            registry,
            tokens,
            max_batch_attempts,
            timings,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Job processor started");

        if let Err(err) = self.recover_interrupted_jobs().await {
            error!("Failed to recover interrupted jobs: {:#}", err);
        }

        while !shutdown.is_cancelled() {
            let wait = match self.process_next(&shutdown).await {
                Ok(Some(_)) => self.timings.job_delay,
                Ok(None) => self.timings.poll_interval,
                Err(err) => {
                    error!("Job processor loop failed: {:#}", err);
                    self.timings.error_backoff
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Job processor stopped");
        Ok(())
    }

    /// Fails jobs left RUNNING by a worker that never finished them, so their
    /// contracts can be scheduled again. The cursor keeps the rerun from
    /// repeating landed batches.
    pub async fn recover_interrupted_jobs(&self) -> Result<usize> {
        let recovered = self
            .repository
            .fail_interrupted_jobs(INTERRUPTED_MESSAGE)
            .await?;
        if recovered > 0 {
            warn!(recovered, "Marked interrupted jobs as failed");
        }
        Ok(recovered)
    }

    /// Claims the oldest pending job and runs it to a terminal state.
    /// Returns the finished job, or `None` when the queue is empty.
    pub async fn process_next(&self, shutdown: &CancellationToken) -> Result<Option<Job>> {
        let Some(job) = self.repository.get_next_pending_job().await? else {
            return Ok(None);
        };

        let job = self
            .repository
            .update_job_status(job.id, JobStatus::Running, None)
            .await?;
        info!(
            job_id = job.id,
            contract = job.contract_id,
            job_type = %job.job_type,
            start_block = ?job.start_block(),
            end_block = ?job.end_block(),
            "Job started"
        );

        let finished = match self.execute(&job, shutdown).await {
            Ok(summary) => {
                info!(
                    job_id = job.id,
                    batches = summary.batches,
                    inserted = summary.inserted,
                    dropped = summary.dropped,
                    "Job completed"
                );
                self.repository
                    .update_job_status(job.id, JobStatus::Completed, None)
                    .await?
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(job_id = job.id, "Job failed: {}", message);
                self.repository
                    .update_job_status(job.id, JobStatus::Failed, Some(message))
                    .await?
            }
        };

        Ok(Some(finished))
    }

    async fn execute(&self, job: &Job, shutdown: &CancellationToken) -> Result<IngestSummary> {
        let (start, end) = job.block_range()?;
        let contract = self
            .repository
            .get_contract(job.contract_id)
            .await?
            .ok_or_else(|| anyhow!("Contract {} not found", job.contract_id))?;
        let network = self
            .registry
            .get(contract.chain)
            .with_context(|| format!("Cannot run job {}", job.id))?;

        let ctx = IngestContext {
            contract,
            network,
            repository: self.repository.clone(),
            max_batch_attempts: self.max_batch_attempts,
            shutdown: shutdown.child_token(),
        };
        let progress: Arc<dyn ProgressReporter> = Arc::new(JobProgress {
            repository: self.repository.clone(),
            job_id: job.id,
        });

        ingest(ctx, job.job_type, start, end, self.tokens.clone(), Some(progress)).await
    }
}

/// Mirrors ingestion progress into the job's metadata.
struct JobProgress {
    repository: Arc<dyn Repository>,
    job_id: i64,
}

#[async_trait::async_trait]
impl ProgressReporter for JobProgress {
    async fn report(&self, current_block: u64, total_blocks: u64) {
        let mut patch = Map::new();
        patch.insert(CURRENT_BLOCK.to_string(), Value::from(current_block));
        patch.insert(TOTAL_BLOCKS.to_string(), Value::from(total_blocks));

        if let Err(err) = self.repository.update_job_metadata(self.job_id, patch).await {
            warn!(job_id = self.job_id, "Failed to record progress: {:#}", err);
        }
    }
}
