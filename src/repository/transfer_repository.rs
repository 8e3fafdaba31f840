use super::models::TransferRecord;
use super::parse_column;
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{Row, params};

pub struct TransferRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> TransferRepository<'a> {
    const INSERT_TRANSFER: &'static str = "INSERT OR IGNORE INTO token_transfers (
            network, tx_hash, log_index, block_number, token_address, contract_address,
            from_address, to_address, amount, token_symbol, token_decimals
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

    const SELECT_TRANSFER: &'static str = "SELECT network, tx_hash, log_index, block_number,
            token_address, contract_address, from_address, to_address, amount,
            token_symbol, token_decimals FROM token_transfers";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn insert_batch(&self, transfers: &[TransferRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;

        {
            let mut stmt = tx.prepare(Self::INSERT_TRANSFER)?;

            for transfer in transfers {
                count += stmt.execute(params![
                    transfer.network.slug(),
                    format!("{:#x}", transfer.tx_hash),
                    transfer.log_index,
                    transfer.block_number,
                    format!("{:#x}", transfer.token_address),
                    format!("{:#x}", transfer.contract_address),
                    format!("{:#x}", transfer.from_address),
                    format!("{:#x}", transfer.to_address),
                    transfer.amount.to_string(),
                    transfer.token_symbol,
                    transfer.token_decimals,
                ])?;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    pub fn for_contract(&self, contract_address: &Address, limit: usize) -> Result<Vec<TransferRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE contract_address = ?1 ORDER BY block_number, log_index LIMIT {limit}",
            Self::SELECT_TRANSFER
        ))?;
        let transfers = stmt
            .query_map(params![format!("{contract_address:#x}")], Self::row_to_transfer)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(transfers)
    }

    pub fn count_for_contract(&self, contract_address: &Address) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM token_transfers WHERE contract_address = ?1",
            params![format!("{contract_address:#x}")],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_transfer(row: &Row) -> rusqlite::Result<TransferRecord> {
        Ok(TransferRecord {
            network: parse_column(row, 0)?,
            tx_hash: parse_column(row, 1)?,
            log_index: row.get(2)?,
            block_number: row.get(3)?,
            token_address: parse_column(row, 4)?,
            contract_address: parse_column(row, 5)?,
            from_address: parse_column(row, 6)?,
            to_address: parse_column(row, 7)?,
            amount: parse_column(row, 8)?,
            token_symbol: row.get(9)?,
            token_decimals: row.get(10)?,
        })
    }
}
