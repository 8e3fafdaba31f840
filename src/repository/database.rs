use anyhow::{Context, Result};
use rusqlite::Connection;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {db_path}"))?;

        Self::initialize(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS contracts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                chain TEXT NOT NULL,
                abi TEXT NOT NULL DEFAULT '[]',
                contract_type TEXT NOT NULL DEFAULT 'generic',
                name TEXT NOT NULL DEFAULT '',
                UNIQUE (address, chain)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_type TEXT NOT NULL,
                status TEXT NOT NULL,
                contract_id INTEGER NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                FOREIGN KEY (contract_id) REFERENCES contracts(id)
            )",
            [],
        )?;

        // At most one PENDING or RUNNING job per (contract, type).
        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_single_active
             ON jobs(contract_id, job_type) WHERE status IN ('PENDING', 'RUNNING')",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_status_created
             ON jobs(status, created_at, id)",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS contract_metadata (
                contract_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (contract_id, key),
                FOREIGN KEY (contract_id) REFERENCES contracts(id)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS raw_invocations (
                network TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                trace_path TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL,
                contract_address TEXT NOT NULL,
                depth INTEGER NOT NULL,
                call_type TEXT,
                trace_type TEXT NOT NULL,
                from_address TEXT,
                to_address TEXT,
                value_wei TEXT NOT NULL,
                gas INTEGER,
                gas_used INTEGER,
                function_selector TEXT,
                input TEXT,
                output TEXT,
                error TEXT,
                PRIMARY KEY (network, tx_hash, trace_path)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_raw_invocations_contract_block
             ON raw_invocations(contract_address, block_number)",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS event_logs (
                contract_address TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL,
                topic0 TEXT,
                topics TEXT NOT NULL,
                data TEXT NOT NULL,
                event_name TEXT,
                decoded TEXT,
                PRIMARY KEY (contract_address, tx_hash, log_index)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_event_logs_block
             ON event_logs(contract_address, block_number)",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS token_transfers (
                network TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                token_address TEXT NOT NULL,
                contract_address TEXT NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                amount TEXT NOT NULL,
                token_symbol TEXT,
                token_decimals INTEGER,
                PRIMARY KEY (network, tx_hash, log_index)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_token_transfers_contract_block
             ON token_transfers(contract_address, block_number)",
            [],
        )?;

        Ok(())
    }
}
