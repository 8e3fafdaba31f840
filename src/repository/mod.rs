pub mod contract_repository;
pub mod database;
pub mod event_log_repository;
pub mod invocation_repository;
pub mod job_repository;
pub mod metadata_repository;
pub mod models;
pub mod sqlite;
pub mod transfer_repository;

pub use contract_repository::ContractRepository;
pub use database::Database;
pub use event_log_repository::EventLogRepository;
pub use invocation_repository::InvocationRepository;
pub use job_repository::JobRepository;
pub use metadata_repository::MetadataRepository;
pub use models::{
    CURRENT_BLOCK, Contract, END_BLOCK, EventLogRecord, Job, JobStatus, JobType, MetadataCursor,
    RawInvocationRecord, START_BLOCK, TOTAL_BLOCKS, TransferRecord, range_metadata,
};
pub use sqlite::SqliteRepository;
pub use transfer_repository::TransferRepository;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::Row;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Storage port used by the scheduler, processor and ingestors.
///
/// Batch inserts ignore rows whose identity key already exists and return the
/// number of rows actually written.
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    async fn insert_raw_invocations(&self, records: Vec<RawInvocationRecord>) -> Result<usize>;

    async fn insert_event_logs(&self, records: Vec<EventLogRecord>) -> Result<usize>;

    async fn insert_transfers(&self, records: Vec<TransferRecord>) -> Result<usize>;

    async fn get_metadata_for_contract(&self, key: &str, contract_id: i64)
    -> Result<Option<String>>;

    async fn update_metadata_for_contract(
        &self,
        key: &str,
        contract_id: i64,
        value: &str,
    ) -> Result<()>;

    async fn create_job(
        &self,
        job_type: JobType,
        contract_id: i64,
        metadata: Map<String, Value>,
    ) -> Result<Job>;

    async fn get_next_pending_job(&self) -> Result<Option<Job>>;

    async fn update_job_status(
        &self,
        job_id: i64,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<Job>;

    /// Fails every job still marked RUNNING. Called before a worker starts.
    async fn fail_interrupted_jobs(&self, error_message: &str) -> Result<usize>;

    /// Merges `patch` into the stored metadata.
    async fn update_job_metadata(&self, job_id: i64, patch: Map<String, Value>) -> Result<()>;

    async fn has_running_or_pending_jobs_for_contract(&self, contract_id: i64) -> Result<bool>;

    async fn get_job_with_highest_end_block_by_type_and_contract(
        &self,
        job_type: JobType,
        contract_id: i64,
    ) -> Result<Option<Job>>;

    async fn get_contract(&self, contract_id: i64) -> Result<Option<Contract>>;

    async fn list_contracts(&self) -> Result<Vec<Contract>>;
}

/// RFC 3339 UTC with fixed precision so stored timestamps sort as text.
pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

pub(crate) fn parse_optional_column<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|text| {
        text.parse().map_err(|e: T::Err| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
        })
    })
    .transpose()
}
