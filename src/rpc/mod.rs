//! Chain access: the [`ChainClient`] port, its HTTP implementation, error
//! classification, and the retrying wrapper every ingestor goes through.

pub mod client;
pub mod error;
pub mod registry;
pub mod retrying;
#[cfg(test)]
pub(crate) mod testing;

pub use client::AlloyChainClient;
pub use error::{ErrorClass, RpcError, classify};
pub use registry::{ClientRegistry, Network};
pub use retrying::RetryingChainClient;

use alloy::rpc::types::{Filter, Log, Transaction, TransactionReceipt};
use alloy_primitives::{Address, B256, Bytes, U256};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSummary {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

/// Raw JSON-RPC surface of one EVM network.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockSummary>, RpcError>;

    async fn block_by_hash(&self, hash: B256) -> Result<Option<BlockSummary>, RpcError>;

    /// `trace_filter` restricted to calls into `to_addresses`. Traces are
    /// returned undecoded so malformed entries can be dropped one by one.
    async fn trace_filter(
        &self,
        from_block: u64,
        to_block: u64,
        to_addresses: &[Address],
    ) -> Result<Vec<Value>, RpcError>;

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    async fn balance(&self, address: Address) -> Result<U256, RpcError>;

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<Transaction>, RpcError>;

    async fn transaction_receipt(&self, hash: B256)
    -> Result<Option<TransactionReceipt>, RpcError>;
}
