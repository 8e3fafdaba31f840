//! Block-range ingestors. Each walks `[start, end]` in fixed-size batches,
//! persists one batch at a time and advances the contract's cursor only after
//! the batch has landed, so a restart resumes at the last batch boundary.

pub mod event_logs;
pub mod invocations;
pub mod token_cache;
pub mod transfers;

pub use event_logs::EventLogIngestor;
pub use invocations::RawInvocationIngestor;
pub use token_cache::{TokenMetadata, TokenMetadataCache};
pub use transfers::{ProgressReporter, TokenTransferIngestor};

use crate::repository::{Contract, JobType, Repository};
use crate::rpc::{Network, RetryingChainClient, RpcError};
use anyhow::{Result, bail};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything one ingestion run needs.
#[derive(Clone)]
pub struct IngestContext {
    pub contract: Contract,
    pub network: Arc<Network>,
    pub repository: Arc<dyn Repository>,
    /// Attempts per batch before the run gives up.
    pub max_batch_attempts: usize,
    pub shutdown: CancellationToken,
}

impl IngestContext {
    pub fn client(&self) -> &RetryingChainClient {
        &self.network.client
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows actually written; duplicates are not counted.
    pub inserted: usize,
    /// Items that failed to parse or decode and were skipped.
    pub dropped: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub batches: usize,
    pub inserted: usize,
    pub dropped: usize,
    /// Highest block covered, `None` if the cursor was already past `end`.
    pub last_block: Option<u64>,
}

/// One ingestor's per-batch work. The walker owns batching, retries and the
/// cursor.
#[async_trait::async_trait]
pub(crate) trait BatchIngestor: Send + Sync {
    fn job_type(&self) -> JobType;

    fn batch_size(&self) -> u64;

    /// Fetches, transforms and persists `[from, to]`.
    async fn ingest_batch(&self, from: u64, to: u64) -> Result<BatchOutcome>;

    /// Called after a batch and its cursor have been persisted.
    async fn batch_landed(&self, _start: u64, _landed: u64, _end: u64) {}
}

/// Drives `ingestor` over `[start, end]`, resuming after the stored cursor.
pub(crate) async fn run_batches(
    ctx: &IngestContext,
    ingestor: &dyn BatchIngestor,
    start: u64,
    end: u64,
) -> Result<IngestSummary> {
    let contract = &ctx.contract;
    let cursor_key = ingestor.job_type().cursor_key();
    let mut summary = IngestSummary::default();

    let cursor = ctx
        .repository
        .get_metadata_for_contract(cursor_key, contract.id)
        .await?
        .and_then(|value| value.parse::<u64>().ok());

    let from = match cursor {
        Some(cursor) if cursor >= start => cursor.saturating_add(1),
        _ => start,
    };
    if from > end {
        info!(
            contract = contract.id,
            job_type = %ingestor.job_type(),
            cursor = ?cursor,
            end,
            "Range already ingested"
        );
        return Ok(summary);
    }
    if from > start {
        info!(contract = contract.id, job_type = %ingestor.job_type(), from, "Resuming after cursor");
    }

    let batch_size = ingestor.batch_size().max(1);
    let mut from = from;
    loop {
        let to = from.saturating_add(batch_size - 1).min(end);

        let outcome = run_batch_with_retries(ctx, ingestor, from, to).await?;
        ctx.repository
            .update_metadata_for_contract(cursor_key, contract.id, &to.to_string())
            .await?;
        ingestor.batch_landed(start, to, end).await;

        summary.batches += 1;
        summary.inserted += outcome.inserted;
        summary.dropped += outcome.dropped;
        summary.last_block = Some(to);

        info!(
            contract = contract.id,
            job_type = %ingestor.job_type(),
            from,
            to,
            inserted = outcome.inserted,
            dropped = outcome.dropped,
            "Batch landed"
        );

        if to >= end {
            break;
        }
        from = to + 1;
    }

    Ok(summary)
}

async fn run_batch_with_retries(
    ctx: &IngestContext,
    ingestor: &dyn BatchIngestor,
    from: u64,
    to: u64,
) -> Result<BatchOutcome> {
    let max_attempts = ctx.max_batch_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => bail!("Ingestion cancelled before batch {}-{} completed", from, to),
            result = ingestor.ingest_batch(from, to) => result,
        };

        let err = match result {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };

        if is_fatal(&err) {
            return Err(err.context(format!("Batch {from}-{to} failed with a fatal RPC error")));
        }
        if attempt >= max_attempts {
            return Err(err.context(format!("Batch {from}-{to} failed after {attempt} attempts")));
        }

        let wait = ctx.network.config.polling_interval;
        warn!(
            contract = ctx.contract.id,
            job_type = %ingestor.job_type(),
            from,
            to,
            attempt,
            error = %err,
            "Batch failed, retrying after {:?}",
            wait
        );

        tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => bail!("Ingestion cancelled while waiting to retry batch {}-{}", from, to),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<RpcError>())
        .any(RpcError::is_fatal)
}

/// Why one fetched item did not become a record.
#[derive(Debug)]
pub(crate) enum ItemError {
    /// The item itself is malformed. It is logged and dropped.
    Malformed(anyhow::Error),
    /// A lookup the item needed failed. The whole batch fails with it.
    Rpc(RpcError),
}

impl From<anyhow::Error> for ItemError {
    fn from(err: anyhow::Error) -> Self {
        ItemError::Malformed(err)
    }
}

impl From<RpcError> for ItemError {
    fn from(err: RpcError) -> Self {
        ItemError::Rpc(err)
    }
}

/// Splits transformed items into records and a count of malformed ones.
/// The first RPC failure aborts the batch.
pub(crate) fn partition_items<T>(
    contract_id: i64,
    from: u64,
    to: u64,
    results: Vec<Result<T, ItemError>>,
) -> Result<(Vec<T>, usize)> {
    let mut records = Vec::with_capacity(results.len());
    let mut dropped = 0;
    for result in results {
        match result {
            Ok(record) => records.push(record),
            Err(ItemError::Malformed(err)) => {
                dropped += 1;
                warn!(contract = contract_id, from, to, error = %format!("{err:#}"), "Dropping malformed item");
            }
            Err(ItemError::Rpc(err)) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("Lookup for batch {from}-{to} failed")));
            }
        }
    }
    Ok((records, dropped))
}

/// Block timestamps looked up during one batch.
pub(crate) struct BlockTimestamps<'a> {
    client: &'a RetryingChainClient,
    cache: Mutex<HashMap<u64, u64>>,
}

impl<'a> BlockTimestamps<'a> {
    pub fn new(client: &'a RetryingChainClient) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Concurrent misses on the same block may both fetch it.
    pub async fn get(&self, block: u64) -> Result<u64, RpcError> {
        if let Some(timestamp) = self.cached(block) {
            return Ok(timestamp);
        }

        let timestamp = self.client.block_timestamp(block).await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(block, timestamp);
        }
        debug!(block, timestamp, "Fetched block timestamp");
        Ok(timestamp)
    }

    fn cached(&self, block: u64) -> Option<u64> {
        self.cache.lock().ok()?.get(&block).copied()
    }
}
