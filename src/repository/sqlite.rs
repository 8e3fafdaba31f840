use super::{
    Contract, ContractRepository, Database, EventLogRecord, EventLogRepository,
    InvocationRepository, Job, JobRepository, JobStatus, JobType, MetadataCursor, MetadataRepository,
    RawInvocationRecord, Repository, TransferRecord, TransferRepository,
};
use crate::chain::Chain;
use alloy_primitives::Address;
use anyhow::{Result, anyhow};
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// [`Repository`] over a single SQLite connection. Statements run on the
/// blocking pool so async callers never stall the runtime.
#[derive(Clone)]
pub struct SqliteRepository {
    db: Arc<Mutex<Database>>,
}

impl SqliteRepository {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(database_url: &str) -> Result<Self> {
        Ok(Self::new(Database::new(database_url)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::in_memory()?))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db.lock().map_err(|_| anyhow!("Database mutex poisoned"))?;
            f(&db.conn)
        })
        .await?
    }

    pub async fn register_contract(
        &self,
        address: Address,
        chain: Chain,
        abi: &str,
        contract_type: &str,
        name: &str,
    ) -> Result<i64> {
        let (abi, contract_type, name) = (abi.to_string(), contract_type.to_string(), name.to_string());
        self.with_conn(move |conn| {
            ContractRepository::new(conn).upsert(&address, chain, &abi, &contract_type, &name)
        })
        .await
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        self.with_conn(move |conn| JobRepository::new(conn).get(job_id))
            .await
    }

    pub async fn list_jobs(&self, contract_id: Option<i64>) -> Result<Vec<Job>> {
        self.with_conn(move |conn| JobRepository::new(conn).list(contract_id, None, 1_000))
            .await
    }

    pub async fn count_raw_invocations(&self, contract_address: Address) -> Result<usize> {
        self.with_conn(move |conn| InvocationRepository::new(conn).count_for_contract(&contract_address))
            .await
    }

    pub async fn count_event_logs(&self, contract_address: Address) -> Result<usize> {
        self.with_conn(move |conn| EventLogRepository::new(conn).count_for_contract(&contract_address))
            .await
    }

    pub async fn count_undecoded_event_logs(&self, contract_address: Address) -> Result<usize> {
        self.with_conn(move |conn| {
            EventLogRepository::new(conn).count_undecoded_for_contract(&contract_address)
        })
        .await
    }

    pub async fn count_transfers(&self, contract_address: Address) -> Result<usize> {
        self.with_conn(move |conn| TransferRepository::new(conn).count_for_contract(&contract_address))
            .await
    }

    pub async fn list_cursors(&self, contract_id: Option<i64>) -> Result<Vec<MetadataCursor>> {
        self.with_conn(move |conn| MetadataRepository::new(conn).list(contract_id))
            .await
    }

    pub async fn transfers_for_contract(&self, contract_address: Address) -> Result<Vec<TransferRecord>> {
        self.with_conn(move |conn| TransferRepository::new(conn).for_contract(&contract_address, 10_000))
            .await
    }
}

#[async_trait::async_trait]
impl Repository for SqliteRepository {
    async fn insert_raw_invocations(&self, records: Vec<RawInvocationRecord>) -> Result<usize> {
        self.with_conn(move |conn| InvocationRepository::new(conn).insert_batch(&records))
            .await
    }

    async fn insert_event_logs(&self, records: Vec<EventLogRecord>) -> Result<usize> {
        self.with_conn(move |conn| EventLogRepository::new(conn).insert_batch(&records))
            .await
    }

    async fn insert_transfers(&self, records: Vec<TransferRecord>) -> Result<usize> {
        self.with_conn(move |conn| TransferRepository::new(conn).insert_batch(&records))
            .await
    }

    async fn get_metadata_for_contract(&self, key: &str, contract_id: i64) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| MetadataRepository::new(conn).get(&key, contract_id))
            .await
    }

    async fn update_metadata_for_contract(&self, key: &str, contract_id: i64, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| MetadataRepository::new(conn).set(&key, contract_id, &value))
            .await
    }

    async fn create_job(
        &self,
        job_type: JobType,
        contract_id: i64,
        metadata: Map<String, Value>,
    ) -> Result<Job> {
        self.with_conn(move |conn| JobRepository::new(conn).create(job_type, contract_id, &metadata))
            .await
    }

    async fn get_next_pending_job(&self) -> Result<Option<Job>> {
        self.with_conn(|conn| JobRepository::new(conn).next_pending())
            .await
    }

    async fn update_job_status(
        &self,
        job_id: i64,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<Job> {
        self.with_conn(move |conn| {
            JobRepository::new(conn).update_status(job_id, status, error_message.as_deref())
        })
        .await
    }

    async fn fail_interrupted_jobs(&self, error_message: &str) -> Result<usize> {
        let error_message = error_message.to_string();
        self.with_conn(move |conn| JobRepository::new(conn).fail_running(&error_message))
            .await
    }

    async fn update_job_metadata(&self, job_id: i64, patch: Map<String, Value>) -> Result<()> {
        self.with_conn(move |conn| JobRepository::new(conn).merge_metadata(job_id, &patch))
            .await
    }

    async fn has_running_or_pending_jobs_for_contract(&self, contract_id: i64) -> Result<bool> {
        self.with_conn(move |conn| JobRepository::new(conn).has_active_for_contract(contract_id))
            .await
    }

    async fn get_job_with_highest_end_block_by_type_and_contract(
        &self,
        job_type: JobType,
        contract_id: i64,
    ) -> Result<Option<Job>> {
        self.with_conn(move |conn| {
            JobRepository::new(conn).highest_completed_end_block(job_type, contract_id)
        })
        .await
    }

    async fn get_contract(&self, contract_id: i64) -> Result<Option<Contract>> {
        self.with_conn(move |conn| ContractRepository::new(conn).get(contract_id))
            .await
    }

    async fn list_contracts(&self) -> Result<Vec<Contract>> {
        self.with_conn(|conn| ContractRepository::new(conn).list())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::models::range_metadata;
    use alloy_primitives::{B256, Bytes, U256, address};

    const SAFE: Address = address!("00000000000000000000000000000000000000aa");

    async fn repository_with_contract() -> (SqliteRepository, i64) {
        let repository = SqliteRepository::in_memory().unwrap();
        let id = repository
            .register_contract(SAFE, Chain::Ethereum, "[]", "safe", "treasury")
            .await
            .unwrap();
        (repository, id)
    }

    fn invocation(tx: u8, path: &str) -> RawInvocationRecord {
        RawInvocationRecord {
            network: Chain::Ethereum,
            tx_hash: B256::with_last_byte(tx),
            trace_path: path.to_string(),
            block_number: 100,
            block_timestamp: 1_700_000_000,
            contract_address: SAFE,
            depth: 1,
            call_type: Some("call".into()),
            trace_type: "call".into(),
            from_address: Some(Address::with_last_byte(1)),
            to_address: Some(SAFE),
            value_wei: U256::ZERO,
            gas: Some(21_000),
            gas_used: Some(21_000),
            function_selector: Some("0xa9059cbb".into()),
            input: Some(Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb])),
            output: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn contracts_round_trip() {
        let (repository, id) = repository_with_contract().await;

        let contract = repository.get_contract(id).await.unwrap().unwrap();
        assert_eq!(contract.address, SAFE);
        assert_eq!(contract.chain, Chain::Ethereum);
        assert!(contract.is_safe());

        let again = repository
            .register_contract(SAFE, Chain::Ethereum, "[]", "generic", "treasury")
            .await
            .unwrap();
        assert_eq!(again, id);
        assert_eq!(repository.list_contracts().await.unwrap().len(), 1);
        assert!(repository.get_contract(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_inserts_ignore_duplicates() {
        let (repository, _) = repository_with_contract().await;

        let batch = vec![invocation(1, "[]"), invocation(1, "[0]"), invocation(2, "[]")];
        assert_eq!(repository.insert_raw_invocations(batch.clone()).await.unwrap(), 3);
        assert_eq!(repository.insert_raw_invocations(batch).await.unwrap(), 0);
        assert_eq!(repository.count_raw_invocations(SAFE).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn job_lifecycle_stamps_timestamps() {
        let (repository, id) = repository_with_contract().await;

        let job = repository
            .create_job(JobType::Events, id, range_metadata(1, 10))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());

        let running = repository
            .update_job_status(job.id, JobStatus::Running, None)
            .await
            .unwrap();
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        let failed = repository
            .update_job_status(job.id, JobStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        assert!(failed.completed_at.is_some());
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        let err = repository
            .update_job_status(job.id, JobStatus::Running, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot move from FAILED to RUNNING"));
    }

    #[tokio::test]
    async fn only_one_active_job_per_contract_and_type() {
        let (repository, id) = repository_with_contract().await;

        repository
            .create_job(JobType::Events, id, range_metadata(1, 10))
            .await
            .unwrap();
        assert!(
            repository
                .create_job(JobType::Events, id, range_metadata(11, 20))
                .await
                .is_err()
        );
        // Another type is independent.
        repository
            .create_job(JobType::RawInvocations, id, range_metadata(1, 10))
            .await
            .unwrap();
        assert!(repository.has_running_or_pending_jobs_for_contract(id).await.unwrap());
    }

    #[tokio::test]
    async fn pending_jobs_are_dequeued_in_creation_order() {
        let (repository, id) = repository_with_contract().await;

        let first = repository
            .create_job(JobType::RawInvocations, id, range_metadata(1, 10))
            .await
            .unwrap();
        let second = repository
            .create_job(JobType::Events, id, range_metadata(1, 10))
            .await
            .unwrap();

        assert_eq!(repository.get_next_pending_job().await.unwrap().unwrap().id, first.id);
        repository
            .update_job_status(first.id, JobStatus::Running, None)
            .await
            .unwrap();
        assert_eq!(repository.get_next_pending_job().await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn highest_end_block_ignores_failed_jobs() {
        let (repository, id) = repository_with_contract().await;

        for (range, outcome) in [
            ((1, 100), JobStatus::Completed),
            ((101, 900), JobStatus::Completed),
            ((901, 5_000), JobStatus::Failed),
        ] {
            let job = repository
                .create_job(JobType::Events, id, range_metadata(range.0, range.1))
                .await
                .unwrap();
            repository
                .update_job_status(job.id, JobStatus::Running, None)
                .await
                .unwrap();
            repository.update_job_status(job.id, outcome, None).await.unwrap();
        }

        let highest = repository
            .get_job_with_highest_end_block_by_type_and_contract(JobType::Events, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(highest.end_block(), Some(900));
        assert!(
            repository
                .get_job_with_highest_end_block_by_type_and_contract(JobType::RawInvocations, id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn interrupted_jobs_are_failed_and_free_the_contract() {
        let (repository, id) = repository_with_contract().await;
        let running = repository
            .create_job(JobType::Events, id, range_metadata(1, 10))
            .await
            .unwrap();
        repository
            .update_job_status(running.id, JobStatus::Running, None)
            .await
            .unwrap();
        let pending = repository
            .create_job(JobType::RawInvocations, id, range_metadata(1, 10))
            .await
            .unwrap();

        assert_eq!(repository.fail_interrupted_jobs("interrupted").await.unwrap(), 1);

        let failed = repository.get_job(running.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("interrupted"));
        assert!(failed.completed_at.is_some());
        let untouched = repository.get_job(pending.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Pending);
        // The type is free for a new job again.
        repository
            .create_job(JobType::Events, id, range_metadata(1, 10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn metadata_patches_merge() {
        let (repository, id) = repository_with_contract().await;
        let job = repository
            .create_job(JobType::TokenTransfers, id, range_metadata(1, 10))
            .await
            .unwrap();

        let mut patch = Map::new();
        patch.insert("currentBlock".into(), Value::from(5));
        repository.update_job_metadata(job.id, patch).await.unwrap();

        let job = repository.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.block_range().unwrap(), (1, 10));
        assert_eq!(job.metadata["currentBlock"], 5);
    }

    #[tokio::test]
    async fn cursors_upsert() {
        let (repository, id) = repository_with_contract().await;

        assert!(repository.get_metadata_for_contract("events.last_block", id).await.unwrap().is_none());
        repository.update_metadata_for_contract("events.last_block", id, "10").await.unwrap();
        repository.update_metadata_for_contract("events.last_block", id, "20").await.unwrap();
        assert_eq!(
            repository.get_metadata_for_contract("events.last_block", id).await.unwrap().as_deref(),
            Some("20")
        );
    }
}
