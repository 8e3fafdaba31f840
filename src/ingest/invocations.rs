use super::{
    BatchIngestor, BatchOutcome, BlockTimestamps, IngestContext, IngestSummary, ItemError,
    partition_items, run_batches,
};
use crate::repository::{JobType, RawInvocationRecord};
use alloy_primitives::{Address, B256, Bytes, U64, U256, hex};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const TRANSFORM_CONCURRENCY: usize = 8;

/// Parity-style `trace_filter` entry. Only the fields stored are read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TraceEntry {
    action: TraceAction,
    block_number: u64,
    transaction_hash: Option<B256>,
    #[serde(default)]
    trace_address: Vec<u64>,
    #[serde(rename = "type")]
    trace_type: String,
    result: Option<TraceResult>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TraceAction {
    call_type: Option<String>,
    from: Option<Address>,
    to: Option<Address>,
    gas: Option<U64>,
    input: Option<Bytes>,
    /// Creation code of `create` traces.
    init: Option<Bytes>,
    value: Option<U256>,
    /// Self-destructed contract of `suicide` traces.
    address: Option<Address>,
    refund_address: Option<Address>,
    balance: Option<U256>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TraceResult {
    gas_used: Option<U64>,
    output: Option<Bytes>,
    /// Deployed address of `create` traces.
    address: Option<Address>,
    code: Option<Bytes>,
}

/// Ingests every call frame that targets the contract.
pub struct RawInvocationIngestor {
    ctx: IngestContext,
}

impl RawInvocationIngestor {
    pub fn new(ctx: IngestContext) -> Self {
        Self { ctx }
    }

    pub async fn ingest(&self, start: u64, end: u64) -> Result<IngestSummary> {
        run_batches(&self.ctx, self, start, end).await
    }

    async fn transform(
        &self,
        trace: Value,
        timestamps: &BlockTimestamps<'_>,
    ) -> Result<RawInvocationRecord, ItemError> {
        let entry: TraceEntry = serde_json::from_value(trace).context("Unparseable trace")?;
        let tx_hash = entry
            .transaction_hash
            .context("Trace has no transaction hash")?;
        let block_timestamp = timestamps.get(entry.block_number).await?;

        let action = entry.action;
        let result = entry.result.unwrap_or_default();

        let input = action.input.or(action.init);
        let function_selector = match (&input, entry.trace_type.as_str()) {
            (Some(input), "call") if input.len() >= 4 => Some(hex::encode_prefixed(&input[..4])),
            _ => None,
        };

        Ok(RawInvocationRecord {
            network: self.ctx.network.chain(),
            tx_hash,
            trace_path: format!(
                "[{}]",
                entry
                    .trace_address
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            block_number: entry.block_number,
            block_timestamp,
            contract_address: self.ctx.contract.address,
            depth: entry.trace_address.len() as u32,
            call_type: action.call_type,
            trace_type: entry.trace_type,
            from_address: action.from.or(action.address),
            to_address: action.to.or(result.address).or(action.refund_address),
            value_wei: action.value.or(action.balance).unwrap_or_default(),
            gas: action.gas.map(|gas| gas.to::<u64>()),
            gas_used: result.gas_used.map(|gas| gas.to::<u64>()),
            function_selector,
            input,
            output: result.output.or(result.code),
            error: entry.error,
        })
    }
}

#[async_trait::async_trait]
impl BatchIngestor for RawInvocationIngestor {
    fn job_type(&self) -> JobType {
        JobType::RawInvocations
    }

    fn batch_size(&self) -> u64 {
        self.ctx.network.config.batch_size
    }

    async fn ingest_batch(&self, from: u64, to: u64) -> Result<BatchOutcome> {
        let client = self.ctx.client();
        let traces = client
            .trace_filter(from, to, &[self.ctx.contract.address])
            .await?;
        debug!(contract = self.ctx.contract.id, from, to, traces = traces.len(), "Fetched traces");

        let timestamps = BlockTimestamps::new(client);
        let results: Vec<Result<RawInvocationRecord, ItemError>> = stream::iter(traces)
            .map(|trace| self.transform(trace, &timestamps))
            .buffer_unordered(TRANSFORM_CONCURRENCY)
            .collect()
            .await;
        let (records, dropped) = partition_items(self.ctx.contract.id, from, to, results)?;

        let inserted = self.ctx.repository.insert_raw_invocations(records).await?;
        Ok(BatchOutcome { inserted, dropped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::test_support::harness;
    use crate::repository::Repository;
    use crate::rpc::RpcError;
    use crate::rpc::testing::{StubChain, block_timestamp};
    use alloy_primitives::address;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SAFE: Address = address!("00000000000000000000000000000000000000aa");

    fn call_trace(block: u64, tx: u8, path: &[u64]) -> Value {
        json!({
            "action": {
                "callType": "call",
                "from": "0x1111111111111111111111111111111111111111",
                "to": SAFE,
                "gas": "0x5208",
                "input": "0xa9059cbb0000000000000000000000002222222222222222222222222222222222222222",
                "value": "0xde0b6b3a7640000"
            },
            "blockHash": B256::ZERO,
            "blockNumber": block,
            "result": { "gasUsed": "0x5000", "output": "0x" },
            "subtraces": 0,
            "traceAddress": path,
            "transactionHash": B256::with_last_byte(tx),
            "transactionPosition": 0,
            "type": "call"
        })
    }

    fn chain_with_traces() -> StubChain {
        StubChain::new(1_000).with_traces(|from, to| {
            Ok([
                call_trace(5, 1, &[]),
                call_trace(5, 1, &[0, 1]),
                call_trace(12, 2, &[]),
                json!({ "action": {}, "type": "reward", "blockNumber": 12 }),
                json!("garbage"),
            ]
            .into_iter()
            .filter(|trace| {
                trace["blockNumber"]
                    .as_u64()
                    .is_none_or(|block| (from..=to).contains(&block))
            })
            .collect())
        })
    }

    #[tokio::test]
    async fn transforms_traces_and_drops_bad_items() {
        let h = harness(chain_with_traces(), SAFE, "[]", |n| n.with_batch_size(100)).await;

        let summary = RawInvocationIngestor::new(h.ctx.clone()).ingest(1, 20).await.unwrap();

        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.dropped, 2);
        assert_eq!(h.repository.count_raw_invocations(SAFE).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn rerunning_a_range_stores_no_duplicates() {
        let h = harness(chain_with_traces(), SAFE, "[]", |n| n.with_batch_size(10)).await;
        let ingestor = RawInvocationIngestor::new(h.ctx.clone());

        ingestor.ingest(1, 20).await.unwrap();
        // Rewind the cursor so the same range is fetched again.
        h.repository
            .update_metadata_for_contract(JobType::RawInvocations.cursor_key(), h.ctx.contract.id, "0")
            .await
            .unwrap();
        let again = ingestor.ingest(1, 20).await.unwrap();

        assert_eq!(again.inserted, 0);
        assert_eq!(h.repository.count_raw_invocations(SAFE).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn maps_call_frames() {
        let h = harness(StubChain::new(100), SAFE, "[]", |n| n).await;
        let ingestor = RawInvocationIngestor::new(h.ctx.clone());
        let timestamps = BlockTimestamps::new(h.ctx.client());

        let record = ingestor
            .transform(call_trace(7, 9, &[0, 2]), &timestamps)
            .await
            .unwrap();

        assert_eq!(record.trace_path, "[0,2]");
        assert_eq!(record.depth, 2);
        assert_eq!(record.block_timestamp, block_timestamp(7));
        assert_eq!(record.function_selector.as_deref(), Some("0xa9059cbb"));
        assert_eq!(record.value_wei, U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(record.gas, Some(21_000));
        assert_eq!(record.gas_used, Some(0x5000));
        assert_eq!(record.to_address, Some(SAFE));
        assert_eq!(record.call_type.as_deref(), Some("call"));
    }

    #[tokio::test]
    async fn failed_timestamp_lookup_fails_the_batch_instead_of_dropping() {
        let stub = chain_with_traces()
            .with_blocks(|_| Err(RpcError::Transport("Monthly capacity limit exceeded".into())));
        let h = harness(stub, SAFE, "[]", |n| n.with_batch_size(100)).await;

        let err = RawInvocationIngestor::new(h.ctx.clone())
            .ingest(1, 20)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("capacity exceeded"));
        assert_eq!(h.repository.count_raw_invocations(SAFE).await.unwrap(), 0);
        assert_eq!(
            h.repository
                .get_metadata_for_contract(JobType::RawInvocations.cursor_key(), h.ctx.contract.id)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn transient_timestamp_failures_retry_the_batch() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let stub = chain_with_traces().with_blocks({
            let lookups = lookups.clone();
            move |number| {
                if lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(RpcError::Transport("header not found".into()));
                }
                Ok(Some(crate::rpc::BlockSummary {
                    number,
                    hash: alloy_primitives::B256::ZERO,
                    timestamp: block_timestamp(number),
                }))
            }
        });
        let h = harness(stub, SAFE, "[]", |n| n.with_batch_size(100)).await;

        let summary = RawInvocationIngestor::new(h.ctx.clone()).ingest(1, 20).await.unwrap();

        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.dropped, 2);
        assert_eq!(h.repository.count_raw_invocations(SAFE).await.unwrap(), 3);
    }
}
