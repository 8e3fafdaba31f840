use crate::chain::Chain;
use crate::events::{decimalsCall, decode_decimals, decode_symbol, symbolCall};
use crate::rpc::{RetryingChainClient, RpcError};
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, Bytes};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

/// Process-lifetime `(chain, token) -> (symbol, decimals)` map. Never evicts,
/// so it assumes the set of tokens seen stays small.
#[derive(Debug, Default)]
pub struct TokenMetadataCache {
    entries: Mutex<HashMap<(Chain, Address), TokenMetadata>>,
}

impl TokenMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chain: Chain, token: Address) -> Option<TokenMetadata> {
        self.entries.lock().ok()?.get(&(chain, token)).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Never fails: unresolvable fields come back as `None`. Results are only
    /// cached when the token actually answered (or reverted), so a flaky
    /// endpoint does not pin a token to `(None, None)`.
    pub async fn resolve(
        &self,
        chain: Chain,
        client: &RetryingChainClient,
        token: Address,
    ) -> TokenMetadata {
        if let Some(metadata) = self.get(chain, token) {
            return metadata;
        }

        let symbol = client
            .call(token, Bytes::from(symbolCall {}.abi_encode()))
            .await;
        let decimals = client
            .call(token, Bytes::from(decimalsCall {}.abi_encode()))
            .await;

        let transient = [&symbol, &decimals]
            .into_iter()
            .any(|result| result.as_ref().is_err_and(is_transient));

        let metadata = TokenMetadata {
            symbol: symbol.ok().and_then(|output| decode_symbol(&output)),
            decimals: decimals.ok().and_then(|output| decode_decimals(&output)),
        };
        debug!(%chain, %token, ?metadata, transient, "Resolved token metadata");

        if !transient {
            if let Ok(mut entries) = self.entries.lock() {
                entries.insert((chain, token), metadata.clone());
            }
        }
        metadata
    }
}

fn is_transient(err: &RpcError) -> bool {
    matches!(
        err,
        RpcError::Timeout(_) | RpcError::RetriesExhausted { .. } | RpcError::CapacityExceeded(_)
    ) || err.is_retryable()
}
