use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

use crate::errors::PipelineError;

/// Chain id of a local Hardhat/Anvil node (forked mainnet).
pub const LOCAL_CHAIN_ID: u64 = 31337;

/// Addresses of the contracts the pipeline calls, per network.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ContractAddresses {
    /// Wrapped native token (WETH9).
    pub weth: String,
    /// Aave v2 `LendingPoolAddressesProvider`; the pool itself is looked up from it.
    pub lending_pool_addresses_provider: String,
    /// Chainlink feed pricing one whole borrow asset in ETH.
    pub price_feed: String,
    /// Asset whose borrowable amount is computed (DAI by default).
    pub borrow_asset: String,
    pub borrow_asset_decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    /// Extra endpoints tried for reads and broadcast if the primary fails.
    pub fallback_rpc_urls: Vec<String>,
    /// Confirmation depth a write waits for before the pipeline continues.
    pub block_confirmations: u64,
    pub contracts: ContractAddresses,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: LOCAL_CHAIN_ID,
            rpc_url: "http://127.0.0.1:8545".into(),
            fallback_rpc_urls: vec![],
            block_confirmations: 1,
            contracts: ContractAddresses::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Amount of native currency to wrap and supply, as a decimal string.
    pub amount: String,
    /// Share of `availableBorrowsETH` actually used, in basis points.
    pub safety_factor_bps: u32,
    /// Maximum age of a price-feed round, measured against the latest block timestamp.
    pub quote_max_age_seconds: u64,
    /// Upper bound on a single confirmation wait.
    pub confirmation_timeout_seconds: u64,
    /// How often receipts and block height are polled while waiting.
    pub poll_interval_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            amount: "0.02".into(),
            safety_factor_bps: 9_500,
            quote_max_age_seconds: 60 * 60,
            confirmation_timeout_seconds: 5 * 60,
            poll_interval_ms: 250,
        }
    }
}

impl PipelineSettings {
    pub const fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_seconds)
    }

    pub const fn quote_max_age(&self) -> Duration {
        Duration::from_secs(self.quote_max_age_seconds)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Network used when the CLI does not pass `--network`.
    pub default_network: String,
    pub pipeline: PipelineSettings,
    pub networks: BTreeMap<String, NetworkConfig>,
}

/// A network shipped in the default config.
struct NetworkDef {
    name: &'static str,
    chain_id: u64,
    rpc_url: &'static str,
    fallbacks: &'static [&'static str],
    block_confirmations: u64,
    mainnet_contracts: bool,
}

const NETWORKS: &[NetworkDef] = &[
    // Local node forking mainnet (`anvil --fork-url ...` or `hardhat node --fork ...`).
    NetworkDef {
        name: "localhost",
        chain_id: LOCAL_CHAIN_ID,
        rpc_url: "http://127.0.0.1:8545",
        fallbacks: &[],
        block_confirmations: 1,
        mainnet_contracts: true,
    },
    NetworkDef {
        name: "mainnet",
        chain_id: 1,
        rpc_url: "https://eth.llamarpc.com",
        fallbacks: &[
            "https://ethereum-rpc.publicnode.com",
            "https://cloudflare-eth.com",
        ],
        block_confirmations: 2,
        mainnet_contracts: true,
    },
    NetworkDef {
        name: "goerli",
        chain_id: 5,
        rpc_url: "https://ethereum-goerli-rpc.publicnode.com",
        fallbacks: &[],
        block_confirmations: 2,
        mainnet_contracts: false,
    },
];

fn mainnet_contracts() -> ContractAddresses {
    ContractAddresses {
        weth: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".into(),
        lending_pool_addresses_provider: "0xB53C1a33016B2DC2fF3653530bfF1848a515c8c5".into(),
        // DAI / ETH
        price_feed: "0x773616E4d11A78F511299002da57A0a94577F1f4".into(),
        borrow_asset: "0x6B175474E89094C44Da98b954EedeAC495271d0F".into(),
        borrow_asset_decimals: 18,
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let networks = NETWORKS
            .iter()
            .map(|def| {
                let contracts = if def.mainnet_contracts {
                    mainnet_contracts()
                } else {
                    ContractAddresses {
                        borrow_asset_decimals: 18,
                        ..ContractAddresses::default()
                    }
                };
                (
                    def.name.to_owned(),
                    NetworkConfig {
                        chain_id: def.chain_id,
                        rpc_url: def.rpc_url.into(),
                        fallback_rpc_urls: def.fallbacks.iter().map(|&s| s.into()).collect(),
                        block_confirmations: def.block_confirmations,
                        contracts,
                    },
                )
            })
            .collect();

        Self {
            default_network: "localhost".into(),
            pipeline: PipelineSettings::default(),
            networks,
        }
    }
}

impl PipelineConfig {
    pub fn network(&self, name: &str) -> Result<&NetworkConfig, PipelineError> {
        self.networks.get(name.trim()).ok_or_else(|| {
            let known: Vec<&str> = self.networks.keys().map(String::as_str).collect();
            PipelineError::invalid(format!(
                "unknown network '{name}' (configured: {})",
                known.join(", ")
            ))
        })
    }

    pub fn network_mut(&mut self, name: &str) -> Option<&mut NetworkConfig> {
        self.networks.get_mut(name.trim())
    }
}

pub fn is_local_chain(chain_id: u64) -> bool {
    chain_id == LOCAL_CHAIN_ID
}
