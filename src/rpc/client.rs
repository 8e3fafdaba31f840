use super::{BlockSummary, ChainClient, RpcError};
use alloy::eips::BlockNumberOrTag;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, Transaction, TransactionInput, TransactionReceipt, TransactionRequest};
use alloy_primitives::{Address, B256, Bytes, U256};
use anyhow::Result;
use serde_json::{Value, json};

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

/// JSON-RPC over HTTP. No retries or timeouts here; those live in
/// [`super::RetryingChainClient`].
#[derive(Clone)]
pub struct AlloyChainClient {
    provider: AlloyFullProvider,
    url: String,
}

impl AlloyChainClient {
    pub fn connect(rpc_url: &str) -> Result<Self> {
        let parsed_url = rpc_url
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", rpc_url))?;
        let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);

        Ok(AlloyChainClient {
            provider,
            url: rpc_url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl ChainClient for AlloyChainClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockSummary>, RpcError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await?;

        Ok(block.map(|block| BlockSummary {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        }))
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Option<BlockSummary>, RpcError> {
        let block = self.provider.get_block_by_hash(hash).await?;

        Ok(block.map(|block| BlockSummary {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        }))
    }

    async fn trace_filter(
        &self,
        from_block: u64,
        to_block: u64,
        to_addresses: &[Address],
    ) -> Result<Vec<Value>, RpcError> {
        let params = json!({
            "fromBlock": format!("{from_block:#x}"),
            "toBlock": format!("{to_block:#x}"),
            "toAddress": to_addresses,
        });

        Ok(self
            .provider
            .raw_request::<_, Vec<Value>>("trace_filter".into(), (params,))
            .await?)
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        Ok(self.provider.get_logs(filter).await?)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let request = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(data));

        Ok(self.provider.call(request).await?)
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcError> {
        Ok(self.provider.get_balance(address).await?)
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<Transaction>, RpcError> {
        Ok(self.provider.get_transaction_by_hash(hash).await?)
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        Ok(self.provider.get_transaction_receipt(hash).await?)
    }
}
