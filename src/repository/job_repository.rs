use super::models::{END_BLOCK, Job, JobStatus, JobType};
use super::{now, parse_column, parse_optional_column};
use anyhow::{Context, Result, anyhow, bail};
use rusqlite::{OptionalExtension, Row, params};
use serde_json::{Map, Value};

pub struct JobRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> JobRepository<'a> {
    const INSERT_JOB: &'static str = "INSERT INTO jobs (
            job_type, status, contract_id, metadata, created_at, updated_at
        ) VALUES (?1, 'PENDING', ?2, ?3, ?4, ?4)";

    const SELECT_JOB: &'static str = "SELECT id, job_type, status, contract_id, metadata,
            created_at, updated_at, started_at, completed_at, error_message FROM jobs";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Fails if the contract already has an active job of this type.
    pub fn create(
        &self,
        job_type: JobType,
        contract_id: i64,
        metadata: &Map<String, Value>,
    ) -> Result<Job> {
        self.conn
            .execute(
                Self::INSERT_JOB,
                params![
                    job_type.as_str(),
                    contract_id,
                    serde_json::to_string(metadata)?,
                    now()
                ],
            )
            .with_context(|| {
                format!("Failed to create {job_type} job for contract {contract_id}")
            })?;

        let id = self.conn.last_insert_rowid();
        self.get(id)?
            .ok_or_else(|| anyhow!("Job {} vanished after insert", id))
    }

    pub fn get(&self, id: i64) -> Result<Option<Job>> {
        let job = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", Self::SELECT_JOB),
                params![id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Oldest pending job, FIFO by creation time.
    pub fn next_pending(&self) -> Result<Option<Job>> {
        let job = self
            .conn
            .query_row(
                &format!(
                    "{} WHERE status = 'PENDING' ORDER BY created_at, id LIMIT 1",
                    Self::SELECT_JOB
                ),
                [],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn update_status(
        &self,
        id: i64,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job> {
        let tx = self.conn.unchecked_transaction()?;

        let current: String = tx
            .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| anyhow!("Job {} not found", id))?;
        let current: JobStatus = current.parse()?;

        if !current.can_transition_to(status) {
            bail!("Job {} cannot move from {} to {}", id, current, status);
        }

        let timestamp = now();
        tx.execute(
            "UPDATE jobs SET
                status = ?1,
                updated_at = ?2,
                started_at = CASE WHEN ?1 = 'RUNNING' THEN ?2 ELSE started_at END,
                completed_at = CASE WHEN ?1 IN ('COMPLETED', 'FAILED') THEN ?2 ELSE completed_at END,
                error_message = ?3
             WHERE id = ?4",
            params![status.as_str(), timestamp, error_message, id],
        )?;
        tx.commit()?;

        self.get(id)?
            .ok_or_else(|| anyhow!("Job {} not found", id))
    }

    /// Moves every RUNNING job to FAILED. Only a worker that died mid-job
    /// leaves one behind. Returns the number of jobs moved.
    pub fn fail_running(&self, error_message: &str) -> Result<usize> {
        let timestamp = now();
        let moved = self.conn.execute(
            "UPDATE jobs SET
                status = 'FAILED',
                updated_at = ?1,
                completed_at = ?1,
                error_message = ?2
             WHERE status = 'RUNNING'",
            params![timestamp, error_message],
        )?;
        Ok(moved)
    }

    /// Merges `patch` into the job's metadata.
    pub fn merge_metadata(&self, id: i64, patch: &Map<String, Value>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        let raw: String = tx
            .query_row("SELECT metadata FROM jobs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| anyhow!("Job {} not found", id))?;
        let mut metadata: Map<String, Value> = serde_json::from_str(&raw)?;
        metadata.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));

        tx.execute(
            "UPDATE jobs SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&metadata)?, now(), id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn has_active_for_contract(&self, contract_id: i64) -> Result<bool> {
        let active: bool = self.conn.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM jobs WHERE contract_id = ?1 AND status IN ('PENDING', 'RUNNING')
            )",
            params![contract_id],
            |row| row.get(0),
        )?;
        Ok(active)
    }

    /// Completed job of `job_type` reaching furthest. Failed jobs never count
    /// as coverage.
    pub fn highest_completed_end_block(
        &self,
        job_type: JobType,
        contract_id: i64,
    ) -> Result<Option<Job>> {
        let job = self
            .conn
            .query_row(
                &format!(
                    "{} WHERE job_type = ?1 AND contract_id = ?2 AND status = 'COMPLETED'
                     ORDER BY CAST(json_extract(metadata, '$.{END_BLOCK}') AS INTEGER) DESC, id DESC
                     LIMIT 1",
                    Self::SELECT_JOB
                ),
                params![job_type.as_str(), contract_id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn list(
        &self,
        contract_id: Option<i64>,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        let mut query = Self::SELECT_JOB.to_string();
        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(contract_id) = contract_id {
            conditions.push("contract_id = ?");
            values.push(Box::new(contract_id));
        }
        if let Some(status) = status {
            conditions.push("status = ?");
            values.push(Box::new(status.as_str()));
        }
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(&format!(" ORDER BY id DESC LIMIT {limit}"));

        let mut stmt = self.conn.prepare(&query)?;
        let jobs = stmt
            .query_map(rusqlite::params_from_iter(values), Self::row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
        let metadata: String = row.get(4)?;
        let metadata = serde_json::from_str(&metadata).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Job {
            id: row.get(0)?,
            job_type: parse_column(row, 1)?,
            status: parse_column(row, 2)?,
            contract_id: row.get(3)?,
            metadata,
            created_at: parse_column(row, 5)?,
            updated_at: parse_column(row, 6)?,
            started_at: parse_optional_column(row, 7)?,
            completed_at: parse_optional_column(row, 8)?,
            error_message: row.get(9)?,
        })
    }
}
