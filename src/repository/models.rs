use crate::chain::Chain;
use alloy_primitives::{Address, B256, Bytes, U256};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A monitored contract. Registered by an external admin workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub id: i64,
    pub address: Address,
    pub chain: Chain,
    /// Raw ABI JSON.
    pub abi: String,
    /// Free-form tag such as `generic` or `safe`.
    pub contract_type: String,
    pub name: String,
}

impl Contract {
    pub fn is_safe(&self) -> bool {
        self.contract_type.eq_ignore_ascii_case("safe")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    RawInvocations,
    Events,
    TokenTransfers,
}

impl JobType {
    pub const ALL: [JobType; 3] = [
        JobType::RawInvocations,
        JobType::Events,
        JobType::TokenTransfers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::RawInvocations => "RAW_INVOCATIONS",
            JobType::Events => "EVENTS",
            JobType::TokenTransfers => "TOKEN_TRANSFERS",
        }
    }

    /// Key of the block cursor this job type advances in `contract_metadata`.
    pub fn cursor_key(&self) -> &'static str {
        match self {
            JobType::RawInvocations => "raw_invocations.last_block",
            JobType::Events => "events.last_block",
            JobType::TokenTransfers => "token_transfers.last_block",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|job_type| job_type.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("Unknown job type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// PENDING -> RUNNING -> COMPLETED | FAILED. A pending job may also fail
    /// outright (e.g. its contract disappeared).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("Unknown job status: {}", s))
    }
}

pub const START_BLOCK: &str = "startBlock";
pub const END_BLOCK: &str = "endBlock";
pub const CURRENT_BLOCK: &str = "currentBlock";
pub const TOTAL_BLOCKS: &str = "totalBlocks";

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    pub contract_id: i64,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn start_block(&self) -> Option<u64> {
        self.metadata.get(START_BLOCK).and_then(block_value)
    }

    pub fn end_block(&self) -> Option<u64> {
        self.metadata.get(END_BLOCK).and_then(block_value)
    }

    pub fn block_range(&self) -> anyhow::Result<(u64, u64)> {
        match (self.start_block(), self.end_block()) {
            (Some(start), Some(end)) => Ok((start, end)),
            _ => Err(anyhow!(
                "Job {} has no valid {}/{} metadata",
                self.id,
                START_BLOCK,
                END_BLOCK
            )),
        }
    }
}

/// Metadata for a job covering `[start, end]`.
pub fn range_metadata(start: u64, end: u64) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(START_BLOCK.to_string(), Value::from(start));
    metadata.insert(END_BLOCK.to_string(), Value::from(end));
    metadata
}

/// Block numbers may have been written as numbers or decimal strings.
fn block_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataCursor {
    pub contract_id: i64,
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// One call frame from `trace_filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInvocationRecord {
    pub network: Chain,
    pub tx_hash: B256,
    /// Position in the call tree, e.g. `[0,1]`.
    pub trace_path: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub contract_address: Address,
    pub depth: u32,
    pub call_type: Option<String>,
    pub trace_type: String,
    pub from_address: Option<Address>,
    pub to_address: Option<Address>,
    pub value_wei: U256,
    pub gas: Option<u64>,
    pub gas_used: Option<u64>,
    pub function_selector: Option<String>,
    pub input: Option<Bytes>,
    pub output: Option<Bytes>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventLogRecord {
    pub contract_address: Address,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub topic0: Option<B256>,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub event_name: Option<String>,
    pub decoded: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub network: Chain,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub token_address: Address,
    /// The monitored contract on either side of the transfer.
    pub contract_address: Address,
    pub from_address: Address,
    pub to_address: Address,
    pub amount: U256,
    pub token_symbol: Option<String>,
    pub token_decimals: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_transitions() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Pending));
        for terminal in [Completed, Failed] {
            for next in JobStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn parses_enum_names() {
        assert_eq!("TOKEN_TRANSFERS".parse::<JobType>().unwrap(), JobType::TokenTransfers);
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn reads_block_range_from_metadata() {
        let mut metadata = range_metadata(10, 20);
        let job = Job {
            id: 1,
            job_type: JobType::Events,
            status: JobStatus::Pending,
            contract_id: 1,
            metadata: metadata.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        };
        assert_eq!(job.block_range().unwrap(), (10, 20));

        metadata.insert(END_BLOCK.into(), Value::from("25"));
        let job = Job { metadata, ..job };
        assert_eq!(job.end_block(), Some(25));

        let job = Job { metadata: Map::new(), ..job };
        assert!(job.block_range().is_err());
    }
}
