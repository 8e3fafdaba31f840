//! Job queue: the scheduler decides what range each contract still needs,
//! the processor runs one job at a time through the matching ingestor.

pub mod processor;
pub mod scheduler;

pub use processor::{JobProcessor, ProcessorTimings};
pub use scheduler::{JobScheduler, TickSummary};

use crate::abi::AbiDecoder;
use crate::ingest::{
    EventLogIngestor, IngestContext, IngestSummary, ProgressReporter, RawInvocationIngestor,
    TokenMetadataCache, TokenTransferIngestor,
};
use crate::repository::{Contract, JobType, Repository};
use crate::rpc::Network;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// How far back a contract's first range reaches.
pub const INITIAL_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Job types that make sense for `contract`: traces always, events when the
/// ABI declares any, transfers for Safe wallets.
pub fn applicable_job_types(contract: &Contract) -> Result<Vec<JobType>> {
    let decoder = AbiDecoder::new(&contract.abi)
        .with_context(|| format!("Invalid ABI for contract {}", contract.id))?;

    let mut types = vec![JobType::RawInvocations];
    if !decoder.events().is_empty() {
        types.push(JobType::Events);
    }
    if contract.is_safe() {
        types.push(JobType::TokenTransfers);
    }
    Ok(types)
}

/// Last block already covered for `(contract, job_type)`: the furthest of the
/// highest completed job and the ingestion cursor.
pub async fn last_processed_block(
    repository: &dyn Repository,
    contract_id: i64,
    job_type: JobType,
) -> Result<Option<u64>> {
    let completed = repository
        .get_job_with_highest_end_block_by_type_and_contract(job_type, contract_id)
        .await?
        .and_then(|job| job.end_block());
    let cursor = repository
        .get_metadata_for_contract(job_type.cursor_key(), contract_id)
        .await?
        .and_then(|value| value.parse::<u64>().ok());

    Ok(completed.max(cursor))
}

/// Fallback start for a contract with no history on this network.
pub fn initial_last_processed(network: &Network, latest: u64) -> u64 {
    latest.saturating_sub(network.config.blocks_in(INITIAL_LOOKBACK))
}

/// Runs the ingestor for `job_type` over `[start, end]`.
pub async fn ingest(
    ctx: IngestContext,
    job_type: JobType,
    start: u64,
    end: u64,
    tokens: Arc<TokenMetadataCache>,
    progress: Option<Arc<dyn ProgressReporter>>,
) -> Result<IngestSummary> {
    match job_type {
        JobType::RawInvocations => RawInvocationIngestor::new(ctx).ingest(start, end).await,
        JobType::Events => EventLogIngestor::new(ctx)?.ingest(start, end).await,
        JobType::TokenTransfers => {
            let mut ingestor = TokenTransferIngestor::new(ctx, tokens);
            if let Some(progress) = progress {
                ingestor = ingestor.with_progress(progress);
            }
            ingestor.ingest(start, end).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;

    fn contract(abi: &str, contract_type: &str) -> Contract {
        Contract {
            id: 1,
            address: alloy_primitives::Address::ZERO,
            chain: Chain::Ethereum,
            abi: abi.to_string(),
            contract_type: contract_type.to_string(),
            name: "test".to_string(),
        }
    }

    const WITH_EVENT: &str = r#"[{"type":"event","name":"Ping","anonymous":false,"inputs":[]}]"#;

    #[test]
    fn job_types_follow_abi_and_contract_type() {
        assert_eq!(
            applicable_job_types(&contract("[]", "generic")).unwrap(),
            vec![JobType::RawInvocations]
        );
        assert_eq!(
            applicable_job_types(&contract(WITH_EVENT, "generic")).unwrap(),
            vec![JobType::RawInvocations, JobType::Events]
        );
        assert_eq!(
            applicable_job_types(&contract("[]", "safe")).unwrap(),
            vec![JobType::RawInvocations, JobType::TokenTransfers]
        );
    }

    #[test]
    fn invalid_abi_is_an_error() {
        assert!(applicable_job_types(&contract("not json", "safe")).is_err());
    }
}
