use crate::chain::Chain;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BATCH_SIZE: u64 = 2_000;
const DEFAULT_EVENT_BATCH_SIZE: u64 = 5_000;
const DEFAULT_TRANSFER_BATCH_SIZE: u64 = 5_000;
const DEFAULT_POLLING_INTERVAL_MS: u64 = 15_000;

/// Per-network ingestion settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub chain: Chain,
    pub rpc_url: String,
    /// Blocks per `trace_filter` batch.
    pub batch_size: u64,
    /// Blocks per `eth_getLogs` batch for contract events.
    pub event_batch_size: u64,
    /// Blocks per batch for ERC-20 transfer scans.
    pub transfer_batch_size: u64,
    /// Wait before retrying a failed batch.
    pub polling_interval: Duration,
    pub block_time_seconds: u64,
    /// Tokens whose `Transfer` logs are scanned. Empty means any token.
    pub watched_tokens: Vec<Address>,
}

impl NetworkConfig {
    pub fn new(chain: Chain, rpc_url: impl Into<String>) -> Self {
        Self {
            chain,
            rpc_url: rpc_url.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            event_batch_size: DEFAULT_EVENT_BATCH_SIZE,
            transfer_batch_size: DEFAULT_TRANSFER_BATCH_SIZE,
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            block_time_seconds: chain.default_block_time_seconds(),
            watched_tokens: chain.default_watched_tokens(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_event_batch_size(mut self, event_batch_size: u64) -> Self {
        self.event_batch_size = event_batch_size;
        self
    }

    pub fn with_transfer_batch_size(mut self, transfer_batch_size: u64) -> Self {
        self.transfer_batch_size = transfer_batch_size;
        self
    }

    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    pub fn with_watched_tokens(mut self, watched_tokens: Vec<Address>) -> Self {
        self.watched_tokens = watched_tokens;
        self
    }

    /// Rough number of blocks produced in `window`.
    pub fn blocks_in(&self, window: Duration) -> u64 {
        window.as_secs() / self.block_time_seconds.max(1)
    }

    fn from_env(chain: Chain) -> Result<Option<Self>> {
        let prefix = chain.slug().to_uppercase().replace('-', "_");
        let Ok(rpc_url) = std::env::var(format!("{prefix}_RPC_URL")) else {
            return Ok(None);
        };

        let mut network = NetworkConfig::new(chain, rpc_url);
        network.batch_size = env_or(&format!("{prefix}_BATCH_SIZE"), network.batch_size)?;
        network.event_batch_size =
            env_or(&format!("{prefix}_EVENT_BATCH_SIZE"), network.event_batch_size)?;
        network.transfer_batch_size = env_or(
            &format!("{prefix}_TRANSFER_BATCH_SIZE"),
            network.transfer_batch_size,
        )?;
        network.polling_interval = Duration::from_millis(env_or(
            &format!("{prefix}_POLLING_INTERVAL_MS"),
            DEFAULT_POLLING_INTERVAL_MS,
        )?);
        network.block_time_seconds = env_or(
            &format!("{prefix}_BLOCK_TIME_SECONDS"),
            network.block_time_seconds,
        )?;

        if let Ok(tokens) = std::env::var(format!("{prefix}_WATCHED_TOKENS")) {
            network.watched_tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(|token| {
                    Address::from_str(token)
                        .with_context(|| format!("Invalid token address in {prefix}_WATCHED_TOKENS: {token}"))
                })
                .collect::<Result<Vec<_>>>()?;
        }

        if network.batch_size == 0 || network.event_batch_size == 0 || network.transfer_batch_size == 0 {
            anyhow::bail!("Batch sizes for {} must be greater than zero", chain);
        }

        Ok(Some(network))
    }
}

/// Retry policy applied to every outbound RPC call.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub max_tries: usize,
    pub throttle_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_tries: 3,
            throttle_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub networks: BTreeMap<Chain, NetworkConfig>,
    pub rpc: RpcConfig,
    /// Idle poll of the job queue, also the scheduler tick.
    pub job_poll_interval: Duration,
    /// Pause after each processed job.
    pub job_delay: Duration,
    /// Pause after the processor loop itself fails.
    pub job_error_backoff: Duration,
    /// Minimum time between two auto-mode runs for one contract.
    pub auto_cooldown: Duration,
    /// Attempts per batch before an ingestor gives up on the job.
    pub max_batch_attempts: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./indexer.db".to_string(),
            networks: BTreeMap::new(),
            rpc: RpcConfig::default(),
            job_poll_interval: Duration::from_secs(5),
            job_delay: Duration::from_secs(1),
            job_error_backoff: Duration::from_secs(30),
            auto_cooldown: Duration::from_secs(30 * 60),
            max_batch_attempts: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Config::default();

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| defaults.database_url.clone());

        let mut networks = BTreeMap::new();
        for chain in Chain::ALL {
            if let Some(network) = NetworkConfig::from_env(chain)? {
                networks.insert(chain, network);
            }
        }
        if networks.is_empty() {
            anyhow::bail!("No network configured; set at least one <CHAIN>_RPC_URL (e.g. ETHEREUM_RPC_URL)");
        }

        let rpc = RpcConfig {
            max_tries: env_or("RPC_MAX_RETRIES", defaults.rpc.max_tries)?,
            throttle_delay: Duration::from_millis(env_or("RPC_THROTTLE_DELAY_MS", 1_000)?),
            call_timeout: Duration::from_secs(env_or("RPC_TIMEOUT_SECS", 30)?),
        };

        Ok(Config {
            database_url,
            networks,
            rpc,
            job_poll_interval: Duration::from_millis(env_or("JOB_POLL_INTERVAL_MS", 5_000)?),
            job_delay: Duration::from_millis(env_or("JOB_DELAY_MS", 1_000)?),
            job_error_backoff: Duration::from_millis(env_or("JOB_ERROR_BACKOFF_MS", 30_000)?),
            auto_cooldown: Duration::from_secs(60 * env_or("AUTO_COOLDOWN_MINUTES", 30)?),
            max_batch_attempts: env_or("MAX_BATCH_ATTEMPTS", defaults.max_batch_attempts)?,
        })
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.networks.insert(network.chain, network);
        self
    }

    pub fn with_rpc(mut self, rpc: RpcConfig) -> Self {
        self.rpc = rpc;
        self
    }

    pub fn with_max_batch_attempts(mut self, max_batch_attempts: usize) -> Self {
        self.max_batch_attempts = max_batch_attempts;
        self
    }

    pub fn with_auto_cooldown(mut self, auto_cooldown: Duration) -> Self {
        self.auto_cooldown = auto_cooldown;
        self
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {value}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_defaults_follow_chain() {
        let network = NetworkConfig::new(Chain::Polygon, "http://localhost:8545");
        assert_eq!(network.block_time_seconds, 2);
        assert_eq!(network.batch_size, DEFAULT_BATCH_SIZE);
        assert!(!network.watched_tokens.is_empty());
    }

    #[test]
    fn estimates_blocks_per_day() {
        let network = NetworkConfig::new(Chain::Ethereum, "http://localhost:8545");
        assert_eq!(network.blocks_in(Duration::from_secs(24 * 60 * 60)), 7_200);
    }
}
