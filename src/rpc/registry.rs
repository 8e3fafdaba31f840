use super::{AlloyChainClient, ChainClient, RetryingChainClient};
use crate::chain::Chain;
use crate::config::{Config, NetworkConfig, RpcConfig};
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A configured network: its retrying client and ingestion settings.
pub struct Network {
    pub client: RetryingChainClient,
    pub config: NetworkConfig,
}

impl Network {
    pub fn chain(&self) -> Chain {
        self.config.chain
    }
}

/// Resolves a contract's chain to the client that serves it.
#[derive(Default, Clone)]
pub struct ClientRegistry {
    networks: HashMap<Chain, Arc<Network>>,
}

impl ClientRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = ClientRegistry::default();
        for network in config.networks.values() {
            let client = AlloyChainClient::connect(&network.rpc_url)?;
            info!("Connected {} client to {}", network.chain, client.url());
            registry = registry.with_network(network.clone(), Arc::new(client), config.rpc.clone());
        }
        Ok(registry)
    }

    pub fn with_network(
        mut self,
        config: NetworkConfig,
        client: Arc<dyn ChainClient>,
        policy: RpcConfig,
    ) -> Self {
        let network = Network {
            client: RetryingChainClient::new(client, policy),
            config,
        };
        self.networks.insert(network.chain(), Arc::new(network));
        self
    }

    pub fn get(&self, chain: Chain) -> Result<Arc<Network>> {
        self.networks
            .get(&chain)
            .cloned()
            .ok_or_else(|| anyhow!("No RPC client configured for chain {}", chain))
    }

    pub fn chains(&self) -> Vec<Chain> {
        let mut chains: Vec<_> = self.networks.keys().copied().collect();
        chains.sort();
        chains
    }
}
