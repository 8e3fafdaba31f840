use super::models::Contract;
use super::parse_column;
use crate::chain::Chain;
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

pub struct ContractRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> ContractRepository<'a> {
    const INSERT_CONTRACT: &'static str =
        "INSERT INTO contracts (address, chain, abi, contract_type, name)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (address, chain) DO UPDATE SET
            abi = excluded.abi, contract_type = excluded.contract_type, name = excluded.name";

    const SELECT_CONTRACT: &'static str =
        "SELECT id, address, chain, abi, contract_type, name FROM contracts";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Registers or updates a contract, keyed by (address, chain).
    pub fn upsert(
        &self,
        address: &Address,
        chain: Chain,
        abi: &str,
        contract_type: &str,
        name: &str,
    ) -> Result<i64> {
        self.conn.execute(
            Self::INSERT_CONTRACT,
            params![format!("{address:#x}"), chain.slug(), abi, contract_type, name],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM contracts WHERE address = ?1 AND chain = ?2",
            params![format!("{address:#x}"), chain.slug()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<Option<Contract>> {
        let contract = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", Self::SELECT_CONTRACT),
                params![id],
                Self::row_to_contract,
            )
            .optional()?;
        Ok(contract)
    }

    pub fn list(&self) -> Result<Vec<Contract>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY id", Self::SELECT_CONTRACT))?;
        let contracts = stmt
            .query_map([], Self::row_to_contract)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contracts)
    }

    fn row_to_contract(row: &Row) -> rusqlite::Result<Contract> {
        Ok(Contract {
            id: row.get(0)?,
            address: parse_column(row, 1)?,
            chain: parse_column(row, 2)?,
            abi: row.get(3)?,
            contract_type: row.get(4)?,
            name: row.get(5)?,
        })
    }
}
