use alloy::primitives::{address, Address};

const ETHEREUM_PUBLIC_RPCS: &[&str] = &[
    "https://ethereum-rpc.publicnode.com",
    "https://eth.llamarpc.com",
    "https://rpc.ankr.com/eth",
];

const BSC_PUBLIC_RPCS: &[&str] = &[
    "https://bsc-dataseed.bnbchain.org",
    "https://bsc-rpc.publicnode.com",
    "https://rpc.ankr.com/bsc",
];

const POLYGON_PUBLIC_RPCS: &[&str] = &[
    "https://polygon-rpc.com",
    "https://polygon-bor-rpc.publicnode.com",
    "https://rpc.ankr.com/polygon",
];

const BASE_PUBLIC_RPCS: &[&str] = &[
    "https://mainnet.base.org",
    "https://base-rpc.publicnode.com",
    "https://base.llamarpc.com",
];

const ARBITRUM_PUBLIC_RPCS: &[&str] = &[
    "https://arb1.arbitrum.io/rpc",
    "https://arbitrum-one-rpc.publicnode.com",
    "https://rpc.ankr.com/arbitrum",
];

const OPTIMISM_PUBLIC_RPCS: &[&str] = &[
    "https://mainnet.optimism.io",
    "https://optimism-rpc.publicnode.com",
    "https://rpc.ankr.com/optimism",
];

/// Static per-network registry entry. Nothing here is derived at runtime except the RPC list,
/// which operators may override per network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Registry key, lowercase (`"ethereum"`, `"bsc"`, ...). Also the prefix of record ids.
    pub key: String,
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    /// UniswapV2-style factory used for the liquidity probe.
    pub dex_factory: Option<Address>,
    pub wrapped_native: Option<Address>,
    pub wrapped_native_symbol: String,
    pub native_symbol: String,
    /// Identifier understood by the price feed for the native asset.
    pub price_ticker: String,
    pub block_time_ms: u64,
}

impl NetworkConfig {
    pub const KEYS: [&'static str; 6] = [
        "ethereum", "bsc", "polygon", "base", "arbitrum", "optimism",
    ];

    pub fn get(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" | "mainnet" => Some(Self::ethereum()),
            "bsc" | "bnb" => Some(Self::bsc()),
            "polygon" | "matic" => Some(Self::polygon()),
            "base" => Some(Self::base()),
            "arbitrum" | "arb" => Some(Self::arbitrum()),
            "optimism" | "op" => Some(Self::optimism()),
            _ => None,
        }
    }

    /// Environment variable that overrides this network's endpoint list, e.g. `BSC_RPC_URLS`.
    pub fn rpc_env_key(&self) -> String {
        format!("{}_RPC_URLS", self.key.to_ascii_uppercase())
    }

    pub fn with_rpc_urls(mut self, urls: Vec<String>) -> Self {
        self.rpc_urls = urls;
        self
    }

    /// `(factory, wrapped_native)` when the network has a DEX to probe for liquidity.
    pub fn liquidity_probe(&self) -> Option<(Address, Address)> {
        Some((self.dex_factory?, self.wrapped_native?))
    }

    fn urls(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|url| (*url).to_string()).collect()
    }

    pub fn ethereum() -> Self {
        Self {
            key: "ethereum".to_string(),
            chain_id: 1,
            name: "Ethereum Mainnet".to_string(),
            rpc_urls: Self::urls(ETHEREUM_PUBLIC_RPCS),
            dex_factory: Some(address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f")),
            wrapped_native: Some(address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2")),
            wrapped_native_symbol: "WETH".to_string(),
            native_symbol: "ETH".to_string(),
            price_ticker: "ethereum".to_string(),
            block_time_ms: 12_000,
        }
    }

    pub fn bsc() -> Self {
        Self {
            key: "bsc".to_string(),
            chain_id: 56,
            name: "BNB Smart Chain".to_string(),
            rpc_urls: Self::urls(BSC_PUBLIC_RPCS),
            dex_factory: Some(address!("cA143Ce32Fe78f1f7019d7d551a6402fC5350c73")),
            wrapped_native: Some(address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c")),
            wrapped_native_symbol: "WBNB".to_string(),
            native_symbol: "BNB".to_string(),
            price_ticker: "binancecoin".to_string(),
            block_time_ms: 3_000,
        }
    }

    pub fn polygon() -> Self {
        Self {
            key: "polygon".to_string(),
            chain_id: 137,
            name: "Polygon".to_string(),
            rpc_urls: Self::urls(POLYGON_PUBLIC_RPCS),
            dex_factory: Some(address!("5757371414417b8C6CAad45bAeF941aBc7d3Ab32")),
            wrapped_native: Some(address!("0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270")),
            wrapped_native_symbol: "WPOL".to_string(),
            native_symbol: "POL".to_string(),
            price_ticker: "polygon-ecosystem-token".to_string(),
            block_time_ms: 2_000,
        }
    }

    pub fn base() -> Self {
        Self {
            key: "base".to_string(),
            chain_id: 8453,
            name: "Base".to_string(),
            rpc_urls: Self::urls(BASE_PUBLIC_RPCS),
            dex_factory: Some(address!("8909Dc15e40173Ff4699343b6eB8132c65e18eC6")),
            wrapped_native: Some(address!("4200000000000000000000000000000000000006")),
            wrapped_native_symbol: "WETH".to_string(),
            native_symbol: "ETH".to_string(),
            price_ticker: "ethereum".to_string(),
            block_time_ms: 2_000,
        }
    }

    pub fn arbitrum() -> Self {
        Self {
            key: "arbitrum".to_string(),
            chain_id: 42161,
            name: "Arbitrum One".to_string(),
            rpc_urls: Self::urls(ARBITRUM_PUBLIC_RPCS),
            dex_factory: Some(address!("f1D7CC64Fb4452F05c498126312eBE29f30Fbcf9")),
            wrapped_native: Some(address!("82aF49447D8a07e3bd95BD0d56f35241523fBab1")),
            wrapped_native_symbol: "WETH".to_string(),
            native_symbol: "ETH".to_string(),
            price_ticker: "ethereum".to_string(),
            block_time_ms: 250,
        }
    }

    pub fn optimism() -> Self {
        Self {
            key: "optimism".to_string(),
            chain_id: 10,
            name: "Optimism".to_string(),
            rpc_urls: Self::urls(OPTIMISM_PUBLIC_RPCS),
            dex_factory: Some(address!("0c3c1c532F1e39EdF36BE9Fe0bE1410313E074Bf")),
            wrapped_native: Some(address!("4200000000000000000000000000000000000006")),
            wrapped_native_symbol: "WETH".to_string(),
            native_symbol: "ETH".to_string(),
            price_ticker: "ethereum".to_string(),
            block_time_ms: 2_000,
        }
    }
}
