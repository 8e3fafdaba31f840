use super::{
    BatchIngestor, BatchOutcome, BlockTimestamps, IngestContext, IngestSummary, ItemError,
    partition_items, run_batches,
};
use crate::abi::AbiDecoder;
use crate::repository::{EventLogRecord, JobType};
use alloy::rpc::types::{Filter, Log};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tracing::debug;

const LOG_CHUNK_SIZE: usize = 1_500;
const DECODE_CONCURRENCY: usize = 24;

/// Ingests every log emitted by the contract, decoded against its ABI when a
/// matching event exists and stored raw otherwise.
pub struct EventLogIngestor {
    ctx: IngestContext,
    decoder: AbiDecoder,
}

impl EventLogIngestor {
    pub fn new(ctx: IngestContext) -> Result<Self> {
        let decoder = AbiDecoder::new(&ctx.contract.abi)
            .with_context(|| format!("Invalid ABI for contract {}", ctx.contract.id))?;
        Ok(Self { ctx, decoder })
    }

    pub async fn ingest(&self, start: u64, end: u64) -> Result<IngestSummary> {
        run_batches(&self.ctx, self, start, end).await
    }

    async fn transform(
        &self,
        log: &Log,
        timestamps: &BlockTimestamps<'_>,
    ) -> Result<EventLogRecord, ItemError> {
        let tx_hash = log.transaction_hash.context("Log has no transaction hash")?;
        let log_index = log.log_index.context("Log has no log index")?;
        let block_number = log.block_number.context("Log has no block number")?;
        let block_timestamp = match log.block_timestamp {
            Some(timestamp) => timestamp,
            None => timestamps.get(block_number).await?,
        };

        let decoded = self.decoder.decode_log(log);
        let topics = log.topics().to_vec();

        Ok(EventLogRecord {
            contract_address: self.ctx.contract.address,
            tx_hash,
            log_index,
            block_number,
            block_timestamp,
            topic0: topics.first().copied(),
            topics,
            data: log.data().data.clone(),
            event_name: decoded.as_ref().map(|event| event.event_name.clone()),
            decoded: decoded.map(|event| event.params),
        })
    }
}

#[async_trait::async_trait]
impl BatchIngestor for EventLogIngestor {
    fn job_type(&self) -> JobType {
        JobType::Events
    }

    fn batch_size(&self) -> u64 {
        self.ctx.network.config.event_batch_size
    }

    async fn ingest_batch(&self, from: u64, to: u64) -> Result<BatchOutcome> {
        let client = self.ctx.client();
        let filter = Filter::new()
            .address(self.ctx.contract.address)
            .from_block(from)
            .to_block(to);
        let logs = client.get_logs(&filter).await?;
        debug!(contract = self.ctx.contract.id, from, to, logs = logs.len(), "Fetched logs");

        let timestamps = BlockTimestamps::new(client);
        let mut outcome = BatchOutcome::default();

        for chunk in logs.chunks(LOG_CHUNK_SIZE) {
            let mut pending: Vec<BoxFuture<'_, Result<EventLogRecord, ItemError>>> =
                Vec::with_capacity(chunk.len());
            for log in chunk {
                pending.push(Box::pin(self.transform(log, &timestamps)));
            }
            let results: Vec<_> = stream::iter(pending)
                .buffer_unordered(DECODE_CONCURRENCY)
                .collect()
                .await;

            let (records, dropped) = partition_items(self.ctx.contract.id, from, to, results)?;
            outcome.dropped += dropped;

            outcome.inserted += self.ctx.repository.insert_event_logs(records).await?;
        }

        Ok(outcome)
    }
}
