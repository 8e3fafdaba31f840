use alloy_primitives::{Address, address};
use std::fmt;
use std::str::FromStr;

/// EVM networks the indexer knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Chain {
    Ethereum,
    Sepolia,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    Gnosis,
    Bsc,
}

struct ChainInfo {
    chain: Chain,
    id: u64,
    slug: &'static str,
    alt_names: &'static [&'static str],
    block_time_seconds: u64,
    watched_tokens: &'static [Address],
}

const MAINNET_TOKENS: &[Address] = &[
    address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), // USDC
    address!("dAC17F958D2ee523a2206206994597C13D831ec7"), // USDT
    address!("6B175474E89094C44Da98b954EedeAC495271d0F"), // DAI
    address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"), // WETH
];

const POLYGON_TOKENS: &[Address] = &[
    address!("3c499c542cEF5E3811e1192ce70d8cC03d5c3359"), // USDC
    address!("c2132D05D31c914a87C6611C10748AEb04B58e8F"), // USDT
    address!("7ceB23fD6bC0adD59E62ac25578270cFf1b9f619"), // WETH
];

const ARBITRUM_TOKENS: &[Address] = &[
    address!("af88d065e77c8cC2239327C5EDb3A432268e5831"), // USDC
    address!("Fd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9"), // USDT
    address!("82aF49447D8a07e3bd95BD0d56f35241523fBab1"), // WETH
];

const OPTIMISM_TOKENS: &[Address] = &[
    address!("0b2C639c533813f4Aa9D7837CAf62653d097Ff85"), // USDC
    address!("94b008aA00579c1307B0EF2c499aD98a8ce58e58"), // USDT
    address!("4200000000000000000000000000000000000006"), // WETH
];

const BASE_TOKENS: &[Address] = &[
    address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"), // USDC
    address!("4200000000000000000000000000000000000006"), // WETH
];

const GNOSIS_TOKENS: &[Address] = &[
    address!("DDAfbb505ad214D7b80b1f830fcCc89B60fb7A83"), // USDC
    address!("e91D153E0b41518A2Ce8Dd3D7944Fa863463a97d"), // WXDAI
];

const BSC_TOKENS: &[Address] = &[
    address!("8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d"), // USDC
    address!("55d398326f99059fF775485246999027B3197955"), // USDT
];

const CHAINS: &[ChainInfo] = &[
    ChainInfo {
        chain: Chain::Ethereum,
        id: 1,
        slug: "ethereum",
        alt_names: &["mainnet", "eth"],
        block_time_seconds: 12,
        watched_tokens: MAINNET_TOKENS,
    },
    ChainInfo {
        chain: Chain::Sepolia,
        id: 11_155_111,
        slug: "sepolia",
        alt_names: &["ethereum-sepolia"],
        block_time_seconds: 12,
        watched_tokens: &[],
    },
    ChainInfo {
        chain: Chain::Polygon,
        id: 137,
        slug: "polygon",
        alt_names: &["matic", "polygon-pos"],
        block_time_seconds: 2,
        watched_tokens: POLYGON_TOKENS,
    },
    ChainInfo {
        chain: Chain::Arbitrum,
        id: 42_161,
        slug: "arbitrum",
        alt_names: &["arbitrum-one", "arb"],
        block_time_seconds: 1,
        watched_tokens: ARBITRUM_TOKENS,
    },
    ChainInfo {
        chain: Chain::Optimism,
        id: 10,
        slug: "optimism",
        alt_names: &["op", "op-mainnet"],
        block_time_seconds: 2,
        watched_tokens: OPTIMISM_TOKENS,
    },
    ChainInfo {
        chain: Chain::Base,
        id: 8_453,
        slug: "base",
        alt_names: &["base-mainnet"],
        block_time_seconds: 2,
        watched_tokens: BASE_TOKENS,
    },
    ChainInfo {
        chain: Chain::Gnosis,
        id: 100,
        slug: "gnosis",
        alt_names: &["xdai", "gnosis-chain"],
        block_time_seconds: 5,
        watched_tokens: GNOSIS_TOKENS,
    },
    ChainInfo {
        chain: Chain::Bsc,
        id: 56,
        slug: "bsc",
        alt_names: &["binance", "bnb"],
        block_time_seconds: 3,
        watched_tokens: BSC_TOKENS,
    },
];

impl Chain {
    pub const ALL: [Chain; 8] = [
        Chain::Ethereum,
        Chain::Sepolia,
        Chain::Polygon,
        Chain::Arbitrum,
        Chain::Optimism,
        Chain::Base,
        Chain::Gnosis,
        Chain::Bsc,
    ];

    fn info(&self) -> &'static ChainInfo {
        // CHAINS holds exactly one entry per variant, in declaration order.
        &CHAINS[*self as usize]
    }

    pub fn id(&self) -> u64 {
        self.info().id
    }

    pub fn slug(&self) -> &'static str {
        self.info().slug
    }

    pub fn default_block_time_seconds(&self) -> u64 {
        self.info().block_time_seconds
    }

    pub fn default_watched_tokens(&self) -> Vec<Address> {
        self.info().watched_tokens.to_vec()
    }

    pub fn from_id(id: u64) -> Option<Chain> {
        CHAINS.iter().find(|info| info.id == id).map(|info| info.chain)
    }

    /// All supported networks are EVM chains, so they share the 20-byte hex
    /// address format. Mixed-case input must carry a valid EIP-55 checksum.
    pub fn is_valid_address(&self, candidate: &str) -> bool {
        let Some(hex) = candidate.strip_prefix("0x") else {
            return false;
        };
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }
        let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
        if has_upper && has_lower {
            return Address::parse_checksummed(candidate, None).is_ok();
        }
        true
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        if let Ok(id) = needle.parse::<u64>() {
            return Chain::from_id(id).ok_or_else(|| anyhow::anyhow!("Unknown chain id: {}", id));
        }
        CHAINS
            .iter()
            .find(|info| info.slug == needle || info.alt_names.contains(&needle.as_str()))
            .map(|info| info.chain)
            .ok_or_else(|| anyhow::anyhow!("Unknown chain: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_in_variant_order() {
        for chain in Chain::ALL {
            assert_eq!(chain.info().chain, chain);
        }
    }

    #[test]
    fn parses_slugs_alt_names_and_ids() {
        assert_eq!("ethereum".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("Mainnet".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("xdai".parse::<Chain>().unwrap(), Chain::Gnosis);
        assert_eq!("137".parse::<Chain>().unwrap(), Chain::Polygon);
        assert!("solana".parse::<Chain>().is_err());
    }

    #[test]
    fn validates_addresses() {
        let chain = Chain::Ethereum;
        assert!(chain.is_valid_address("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"));
        assert!(chain.is_valid_address("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"));
        // Broken checksum
        assert!(!chain.is_valid_address("0xA0B86991c6218b36c1d19D4a2e9Eb0cE3606eB48"));
        assert!(!chain.is_valid_address("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"));
        assert!(!chain.is_valid_address("0x1234"));
    }
}
