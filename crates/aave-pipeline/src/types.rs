use alloy::primitives::{B256, U256};
use serde::Serialize;

use crate::amount::{self, dec_string};

/// An integer amount in a token's smallest unit together with its decimal scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenAmount {
    #[serde(with = "dec_string")]
    pub value: U256,
    pub decimals: u8,
}

impl TokenAmount {
    pub const fn new(value: U256, decimals: u8) -> Self {
        Self { value, decimals }
    }

    pub fn display(&self) -> String {
        amount::format_units(self.value, self.decimals)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Confirmed,
    Reverted,
}

/// Outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallResult {
    pub status: CallStatus,
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub confirmations: u64,
    pub gas_used: Option<u64>,
}

impl CallStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Reverted => "reverted",
        }
    }
}

#[cfg(test)]
impl CallResult {
    pub const fn is_confirmed(&self) -> bool {
        matches!(self.status, CallStatus::Confirmed)
    }
}

/// Point-in-time view of an account in the lending pool.
///
/// Aave v2 reports collateral, debt and borrow capacity in ETH wei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    #[serde(with = "dec_string")]
    pub total_collateral: U256,
    #[serde(with = "dec_string")]
    pub total_debt: U256,
    #[serde(with = "dec_string")]
    pub available_to_borrow: U256,
    /// Basis points.
    #[serde(with = "dec_string")]
    pub current_liquidation_threshold: U256,
    /// Basis points.
    #[serde(with = "dec_string")]
    pub ltv: U256,
    /// Wad (1e18 == 1.0); `U256::MAX` when there is no debt.
    #[serde(with = "dec_string")]
    pub health_factor: U256,
    pub decimals: u8,
}

impl AccountSnapshot {
    pub const fn available(&self) -> TokenAmount {
        TokenAmount::new(self.available_to_borrow, self.decimals)
    }
}

/// Latest round of a price feed. `answer` is scaled by `10^decimals`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    #[serde(with = "dec_string")]
    pub answer: U256,
    pub decimals: u8,
    pub round_id: u128,
    pub answered_in_round: u128,
    /// Unix seconds.
    pub updated_at: u64,
}
