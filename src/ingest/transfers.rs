use super::{BatchIngestor, BatchOutcome, IngestContext, IngestSummary, TokenMetadataCache, run_batches};
use crate::events::{Transfer, decode_transfer_event};
use crate::repository::{JobType, TransferRecord};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives `(current_block, total_blocks)` after each landed batch.
#[async_trait::async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, current_block: u64, total_blocks: u64);
}

/// Ingests ERC-20 transfers into or out of the contract for the network's
/// token watch-list.
pub struct TokenTransferIngestor {
    ctx: IngestContext,
    tokens: Arc<TokenMetadataCache>,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl TokenTransferIngestor {
    pub fn new(ctx: IngestContext, tokens: Arc<TokenMetadataCache>) -> Self {
        Self {
            ctx,
            tokens,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn ingest(&self, start: u64, end: u64) -> Result<IngestSummary> {
        run_batches(&self.ctx, self, start, end).await
    }

    fn base_filter(&self, from: u64, to: u64) -> Filter {
        let filter = Filter::new()
            .event_signature(Transfer::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);

        let watched = &self.ctx.network.config.watched_tokens;
        if watched.is_empty() {
            filter
        } else {
            filter.address(watched.clone())
        }
    }

    /// Transfers from the contract and to it, each log once.
    async fn fetch_logs(&self, from: u64, to: u64) -> Result<Vec<Log>> {
        let client = self.ctx.client();
        let subject = self.ctx.contract.address.into_word();
        let base = self.base_filter(from, to);

        let outgoing = client.get_logs(&base.clone().topic1(subject)).await?;
        let incoming = client.get_logs(&base.topic2(subject)).await?;

        let mut seen = HashSet::new();
        let mut logs: Vec<Log> = outgoing
            .into_iter()
            .chain(incoming)
            .filter(|log| seen.insert((log.transaction_hash, log.log_index)))
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    fn to_record(&self, log: &Log) -> Result<TransferRecord> {
        let event = decode_transfer_event(log)?;

        Ok(TransferRecord {
            network: self.ctx.network.chain(),
            tx_hash: log.transaction_hash.context("Log has no transaction hash")?,
            log_index: log.log_index.context("Log has no log index")?,
            block_number: log.block_number.context("Log has no block number")?,
            token_address: log.address(),
            contract_address: self.ctx.contract.address,
            from_address: event.from,
            to_address: event.to,
            amount: event.value,
            token_symbol: None,
            token_decimals: None,
        })
    }
}

#[async_trait::async_trait]
impl BatchIngestor for TokenTransferIngestor {
    fn job_type(&self) -> JobType {
        JobType::TokenTransfers
    }

    fn batch_size(&self) -> u64 {
        self.ctx.network.config.transfer_batch_size
    }

    async fn ingest_batch(&self, from: u64, to: u64) -> Result<BatchOutcome> {
        let logs = self.fetch_logs(from, to).await?;
        debug!(contract = self.ctx.contract.id, from, to, logs = logs.len(), "Fetched transfer logs");

        let mut records = Vec::with_capacity(logs.len());
        let mut dropped = 0;
        for log in &logs {
            match self.to_record(log) {
                Ok(record) => records.push(record),
                Err(err) => {
                    dropped += 1;
                    warn!(contract = self.ctx.contract.id, from, to, error = %format!("{err:#}"), "Dropping transfer log");
                }
            }
        }

        let chain = self.ctx.network.chain();
        let tokens: BTreeSet<_> = records.iter().map(|record| record.token_address).collect();
        let mut metadata = HashMap::with_capacity(tokens.len());
        for token in tokens {
            let resolved = self.tokens.resolve(chain, self.ctx.client(), token).await;
            metadata.insert(token, resolved);
        }
        for record in &mut records {
            if let Some(token) = metadata.get(&record.token_address) {
                record.token_symbol = token.symbol.clone();
                record.token_decimals = token.decimals;
            }
        }

        let inserted = self.ctx.repository.insert_transfers(records).await?;
        Ok(BatchOutcome { inserted, dropped })
    }

    async fn batch_landed(&self, start: u64, landed: u64, end: u64) {
        if let Some(progress) = &self.progress {
            progress.report(landed, end - start + 1).await;
        }
    }
}
