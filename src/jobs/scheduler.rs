use super::{applicable_job_types, initial_last_processed, last_processed_block};
use crate::repository::{Contract, Job, Repository, range_metadata};
use crate::rpc::ClientRegistry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub created: usize,
    /// Contracts with an active job already.
    pub busy: usize,
    /// Contracts whose scheduling failed this tick.
    pub failed: usize,
}

/// Enqueues one job per contract and data kind covering the blocks since the
/// last completed range.
pub struct JobScheduler {
    repository: Arc<dyn Repository>,
    registry: Arc<ClientRegistry>,
    interval: Duration,
}

impl JobScheduler {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: Arc<ClientRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            repository,
            registry,
            interval,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Job scheduler started, ticking every {:?}", self.interval);

        loop {
            match self.tick().await {
                Ok(summary) if summary.created > 0 => info!(
                    created = summary.created,
                    busy = summary.busy,
                    failed = summary.failed,
                    "Scheduled jobs"
                ),
                Ok(_) => debug!("Nothing to schedule"),
                Err(err) => error!("Scheduler tick failed: {:#}", err),
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Job scheduler stopped");
        Ok(())
    }

    /// One pass over every registered contract. A contract that fails to
    /// schedule is logged and skipped.
    pub async fn tick(&self) -> Result<TickSummary> {
        let mut summary = TickSummary::default();

        for contract in self.repository.list_contracts().await? {
            if self
                .repository
                .has_running_or_pending_jobs_for_contract(contract.id)
                .await?
            {
                debug!(contract = contract.id, "Contract has an active job");
                summary.busy += 1;
                continue;
            }

            match self.schedule_contract(&contract).await {
                Ok(jobs) => summary.created += jobs.len(),
                Err(err) => {
                    summary.failed += 1;
                    error!(
                        contract = contract.id,
                        address = %contract.address,
                        chain = %contract.chain,
                        "Failed to schedule contract: {:#}",
                        err
                    );
                }
            }
        }

        Ok(summary)
    }

    async fn schedule_contract(&self, contract: &Contract) -> Result<Vec<Job>> {
        let job_types = applicable_job_types(contract)?;
        let network = self.registry.get(contract.chain)?;
        let latest = network.client.block_number().await?;

        let mut created = Vec::new();
        for job_type in job_types {
            let last_processed =
                match last_processed_block(self.repository.as_ref(), contract.id, job_type).await? {
                    Some(block) => block,
                    None => initial_last_processed(&network, latest),
                };

            if last_processed >= latest {
                debug!(contract = contract.id, %job_type, last_processed, latest, "Caught up");
                continue;
            }

            let job = self
                .repository
                .create_job(job_type, contract.id, range_metadata(last_processed + 1, latest))
                .await?;
            info!(
                job_id = job.id,
                contract = contract.id,
                %job_type,
                start_block = last_processed + 1,
                end_block = latest,
                "Created job"
            );
            created.push(job);
        }

        Ok(created)
    }
}
