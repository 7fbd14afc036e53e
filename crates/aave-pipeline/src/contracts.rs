use alloy::{primitives::Address, sol};
use std::str::FromStr as _;

use crate::{config::ContractAddresses, errors::PipelineError};

sol! {
    /// Canonical WETH9. Its ERC-20 side goes through `IERC20`.
    contract IWeth {
        function deposit() external payable;
    }
}

sol! {
    contract IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) external returns (bool);
    }
}

sol! {
    contract ILendingPoolAddressesProvider {
        function getLendingPool() external view returns (address);
    }
}

sol! {
    /// Aave v2 `LendingPool`.
    contract ILendingPool {
        function deposit(address asset, uint256 amount, address onBehalfOf, uint16 referralCode) external;
        function getUserAccountData(address user) external view returns (
            uint256 totalCollateralETH,
            uint256 totalDebtETH,
            uint256 availableBorrowsETH,
            uint256 currentLiquidationThreshold,
            uint256 ltv,
            uint256 healthFactor
        );
    }
}

sol! {
    /// Chainlink `AggregatorV3Interface`.
    contract IAggregatorV3 {
        function decimals() external view returns (uint8);
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );
    }
}

/// On-chain addresses the pipeline talks to, resolved for one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSet {
    pub weth: Address,
    pub lending_pool_addresses_provider: Address,
    pub price_feed: Address,
    pub borrow_asset: Address,
    pub borrow_asset_decimals: u8,
}

fn parse_named(network: &str, name: &str, s: &str) -> Result<Address, PipelineError> {
    let t = s.trim();
    if t.is_empty() {
        return Err(PipelineError::invalid(format!(
            "contract address not configured: {name} on {network}"
        )));
    }
    Address::from_str(t)
        .map_err(|e| PipelineError::invalid(format!("invalid {name} address on {network}: {e}")))
}

impl ContractSet {
    pub fn resolve(network: &str, cfg: &ContractAddresses) -> Result<Self, PipelineError> {
        Ok(Self {
            weth: parse_named(network, "weth", &cfg.weth)?,
            lending_pool_addresses_provider: parse_named(
                network,
                "lending_pool_addresses_provider",
                &cfg.lending_pool_addresses_provider,
            )?,
            price_feed: parse_named(network, "price_feed", &cfg.price_feed)?,
            borrow_asset: parse_named(network, "borrow_asset", &cfg.borrow_asset)?,
            borrow_asset_decimals: cfg.borrow_asset_decimals,
        })
    }
}
