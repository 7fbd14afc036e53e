//! Scaled integer arithmetic for turning a borrow capacity into a target-token amount.
//!
//! Everything stays in `U256`. Multiplication happens before division so the only
//! rounding is the final floor, which can only move the result below the true limit.

use alloy::primitives::U256;

use crate::{
    amount::pow10,
    errors::PipelineError,
    types::{PriceQuote, TokenAmount},
};

pub const BPS_DENOMINATOR: u32 = 10_000;

fn scale(decimals: u8) -> Result<U256, PipelineError> {
    pow10(decimals).ok_or_else(|| PipelineError::invalid(format!("decimals too large: {decimals}")))
}

fn mul(a: U256, b: U256) -> Result<U256, PipelineError> {
    a.checked_mul(b)
        .ok_or_else(|| PipelineError::invalid("borrowable amount overflow"))
}

/// How much of the target token can be borrowed.
///
/// `available` is the pool's borrow capacity in the quote's base denomination (ETH wei
/// for Aave v2). `quote` prices one whole target token in that denomination.
/// The result is in the target token's smallest units:
///
/// `available * safety_bps * 10^quote_dec * 10^target_dec / (10_000 * answer * 10^available_dec)`
pub fn borrowable_amount(
    available: TokenAmount,
    quote: &PriceQuote,
    safety_factor_bps: u32,
    target_decimals: u8,
) -> Result<TokenAmount, PipelineError> {
    if quote.answer.is_zero() {
        return Err(PipelineError::InvalidQuote("answer is zero".into()));
    }
    if safety_factor_bps > BPS_DENOMINATOR {
        return Err(PipelineError::invalid(format!(
            "safety factor {safety_factor_bps} bps exceeds {BPS_DENOMINATOR}"
        )));
    }

    let numerator = mul(available.value, U256::from(safety_factor_bps))
        .and_then(|n| mul(n, scale(quote.decimals)?))
        .and_then(|n| mul(n, scale(target_decimals)?))?;
    let denominator = mul(U256::from(BPS_DENOMINATOR), quote.answer)
        .and_then(|d| mul(d, scale(available.decimals)?))?;

    Ok(TokenAmount::new(numerator / denominator, target_decimals))
}

/// Invert a quote: if it prices B in A, return the price of A in B with `out_decimals`.
pub fn invert_price(quote: &PriceQuote, out_decimals: u8) -> Result<TokenAmount, PipelineError> {
    if quote.answer.is_zero() {
        return Err(PipelineError::InvalidQuote("answer is zero".into()));
    }
    let numerator = mul(scale(quote.decimals)?, scale(out_decimals)?)?;
    Ok(TokenAmount::new(numerator / quote.answer, out_decimals))
}
