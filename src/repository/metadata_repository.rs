use super::models::MetadataCursor;
use super::{now, parse_column};
use anyhow::Result;
use rusqlite::{OptionalExtension, params};

/// Per-contract cursors, e.g. the last block ingested per job type.
pub struct MetadataRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> MetadataRepository<'a> {
    const UPSERT: &'static str =
        "INSERT INTO contract_metadata (contract_id, key, value, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (contract_id, key) DO UPDATE SET
            value = excluded.value, updated_at = excluded.updated_at";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str, contract_id: i64) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM contract_metadata WHERE contract_id = ?1 AND key = ?2",
                params![contract_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, contract_id: i64, value: &str) -> Result<()> {
        self.conn
            .execute(Self::UPSERT, params![contract_id, key, value, now()])?;
        Ok(())
    }

    pub fn list(&self, contract_id: Option<i64>) -> Result<Vec<MetadataCursor>> {
        let mut stmt = self.conn.prepare(
            "SELECT contract_id, key, value, updated_at FROM contract_metadata
             WHERE ?1 IS NULL OR contract_id = ?1
             ORDER BY contract_id, key",
        )?;
        let cursors = stmt
            .query_map(params![contract_id], |row| {
                Ok(MetadataCursor {
                    contract_id: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                    updated_at: parse_column(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cursors)
    }
}
