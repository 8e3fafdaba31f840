use super::models::RawInvocationRecord;
use alloy_primitives::{Address, hex};
use anyhow::Result;
use rusqlite::params;

pub struct InvocationRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> InvocationRepository<'a> {
    const INSERT_INVOCATION: &'static str = "INSERT OR IGNORE INTO raw_invocations (
            network, tx_hash, trace_path, block_number, block_timestamp, contract_address,
            depth, call_type, trace_type, from_address, to_address, value_wei,
            gas, gas_used, function_selector, input, output, error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Inserts in one transaction; rows already present are skipped.
    pub fn insert_batch(&self, records: &[RawInvocationRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;

        {
            let mut stmt = tx.prepare(Self::INSERT_INVOCATION)?;

            for record in records {
                count += stmt.execute(params![
                    record.network.slug(),
                    format!("{:#x}", record.tx_hash),
                    record.trace_path,
                    record.block_number,
                    record.block_timestamp,
                    format!("{:#x}", record.contract_address),
                    record.depth,
                    record.call_type,
                    record.trace_type,
                    record.from_address.map(|a| format!("{a:#x}")),
                    record.to_address.map(|a| format!("{a:#x}")),
                    record.value_wei.to_string(),
                    record.gas,
                    record.gas_used,
                    record.function_selector,
                    record.input.as_ref().map(hex::encode_prefixed),
                    record.output.as_ref().map(hex::encode_prefixed),
                    record.error,
                ])?;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    pub fn count_for_contract(&self, contract_address: &Address) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM raw_invocations WHERE contract_address = ?1",
            params![format!("{contract_address:#x}")],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
