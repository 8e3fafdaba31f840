use super::models::EventLogRecord;
use alloy_primitives::{Address, hex};
use anyhow::Result;
use rusqlite::params;

pub struct EventLogRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> EventLogRepository<'a> {
    const INSERT_EVENT_LOG: &'static str = "INSERT OR IGNORE INTO event_logs (
            contract_address, tx_hash, log_index, block_number, block_timestamp,
            topic0, topics, data, event_name, decoded
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn insert_batch(&self, records: &[EventLogRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;

        {
            let mut stmt = tx.prepare(Self::INSERT_EVENT_LOG)?;

            for record in records {
                let topics: Vec<String> = record
                    .topics
                    .iter()
                    .map(|topic| format!("{topic:#x}"))
                    .collect();
                let decoded = record
                    .decoded
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;

                count += stmt.execute(params![
                    format!("{:#x}", record.contract_address),
                    format!("{:#x}", record.tx_hash),
                    record.log_index,
                    record.block_number,
                    record.block_timestamp,
                    record.topic0.map(|topic| format!("{topic:#x}")),
                    serde_json::to_string(&topics)?,
                    hex::encode_prefixed(&record.data),
                    record.event_name,
                    decoded,
                ])?;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    pub fn count_for_contract(&self, contract_address: &Address) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM event_logs WHERE contract_address = ?1",
            params![format!("{contract_address:#x}")],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Logs that matched no ABI event.
    pub fn count_undecoded_for_contract(&self, contract_address: &Address) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM event_logs WHERE contract_address = ?1 AND event_name IS NULL",
            params![format!("{contract_address:#x}")],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
