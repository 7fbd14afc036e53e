//! Individual remote operations: each one is a single confirmed write or a single typed read.

use alloy::{
    primitives::{Address, Bytes, I256, U256},
    sol_types::SolCall,
};
use std::time::{Duration, Instant};

use crate::{
    chains::{ChainClient, ReadCall, WriteCall},
    config::{NetworkConfig, PipelineSettings},
    contracts::{IAggregatorV3, IERC20, ILendingPool, ILendingPoolAddressesProvider, IWeth},
    errors::PipelineError,
    types::{AccountSnapshot, CallResult, CallStatus, PriceQuote, TokenAmount},
};

/// Aave v2 reports account figures in ETH wei.
pub const AAVE_V2_BASE_DECIMALS: u8 = 18;
pub const WRAPPED_NATIVE_DECIMALS: u8 = 18;

/// Everything an operation needs besides its own arguments. Passed explicitly on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub account: Address,
    pub confirmations: u64,
    pub confirmation_timeout: Duration,
    pub quote_max_age: Duration,
    pub safety_factor_bps: u32,
}

impl RunContext {
    pub fn new(account: Address, net: &NetworkConfig, settings: &PipelineSettings) -> Self {
        Self {
            account,
            confirmations: net.block_confirmations.max(1),
            confirmation_timeout: settings.confirmation_timeout(),
            quote_max_age: settings.quote_max_age(),
            safety_factor_bps: settings.safety_factor_bps,
        }
    }
}

#[derive(Debug)]
pub struct Orchestrator<C> {
    client: C,
}

impl<C: ChainClient> Orchestrator<C> {
    pub const fn new(client: C) -> Self {
        Self { client }
    }

    #[cfg(test)]
    pub const fn client(&self) -> &C {
        &self.client
    }

    fn ensure_signer(&self, ctx: &RunContext) -> Result<(), PipelineError> {
        let signer = self.client.current_account();
        if signer == ctx.account {
            Ok(())
        } else {
            Err(PipelineError::invalid(format!(
                "run account {:#x} is not the signing account {signer:#x}",
                ctx.account
            )))
        }
    }

    /// Submit and suspend until `ctx.confirmations` deep or `ctx.confirmation_timeout` passes.
    async fn send_and_confirm(
        &self,
        ctx: &RunContext,
        call: WriteCall,
    ) -> Result<CallResult, PipelineError> {
        self.ensure_signer(ctx)?;
        let label = call.label;
        let pending = self.client.submit(call).await?;
        tracing::info!(label, tx = %pending.tx_hash, depth = ctx.confirmations, "submitted; waiting for confirmations");

        let started = Instant::now();
        let waited = tokio::time::timeout(
            ctx.confirmation_timeout,
            self.client.wait_for_confirmations(&pending, ctx.confirmations),
        )
        .await;
        let Ok(result) = waited else {
            return Err(PipelineError::ConfirmationTimeout {
                tx: pending.tx_hash,
                depth: ctx.confirmations,
                waited_secs: started.elapsed().as_secs(),
            });
        };
        let result = result?;

        match result.status {
            CallStatus::Confirmed => {
                tracing::info!(
                    label,
                    tx = %result.tx_hash,
                    block = result.block_number,
                    confirmations = result.confirmations,
                    "confirmed"
                );
                Ok(result)
            }
            CallStatus::Reverted => Err(PipelineError::ChainRevert {
                reason: format!(
                    "{label} reverted in block {}",
                    result.block_number.unwrap_or_default()
                ),
                tx: Some(result.tx_hash),
            }),
        }
    }

    async fn read<T: SolCall + Send + Sync>(
        &self,
        to: Address,
        call: &T,
    ) -> Result<T::Return, PipelineError> {
        let raw = self
            .client
            .call(ReadCall {
                to,
                data: Bytes::from(call.abi_encode()),
            })
            .await?;
        T::abi_decode_returns(&raw).map_err(|e| PipelineError::decode(T::SIGNATURE, e))
    }

    /// Exchange native currency for the wrapped ERC-20 (`WETH.deposit{value: amount}()`).
    pub async fn wrap_native_currency(
        &self,
        ctx: &RunContext,
        wrapped_token: Address,
        amount: U256,
    ) -> Result<CallResult, PipelineError> {
        if amount.is_zero() {
            return Err(PipelineError::invalid("wrap amount must be greater than zero"));
        }
        self.send_and_confirm(
            ctx,
            WriteCall {
                to: wrapped_token,
                data: Bytes::from(IWeth::depositCall {}.abi_encode()),
                value: amount,
                label: "weth.deposit",
            },
        )
        .await
    }

    /// Set `spender`'s allowance on `token` to exactly `amount`. Overwrites, never adds.
    pub async fn approve_allowance(
        &self,
        ctx: &RunContext,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<CallResult, PipelineError> {
        self.send_and_confirm(
            ctx,
            WriteCall {
                to: token,
                data: Bytes::from(
                    IERC20::approveCall {
                        spender,
                        value: amount,
                    }
                    .abi_encode(),
                ),
                value: U256::ZERO,
                label: "erc20.approve",
            },
        )
        .await
    }

    /// Deposit `amount` of `token` into the pool as collateral for `ctx.account`.
    ///
    /// Needs a confirmed allowance of at least `amount` toward `pool`; without it the pool's
    /// `transferFrom` reverts and this returns `ChainRevert`.
    pub async fn supply_collateral(
        &self,
        ctx: &RunContext,
        pool: Address,
        token: Address,
        amount: U256,
    ) -> Result<CallResult, PipelineError> {
        self.send_and_confirm(
            ctx,
            WriteCall {
                to: pool,
                data: Bytes::from(
                    ILendingPool::depositCall {
                        asset: token,
                        amount,
                        onBehalfOf: ctx.account,
                        referralCode: 0,
                    }
                    .abi_encode(),
                ),
                value: U256::ZERO,
                label: "pool.deposit",
            },
        )
        .await
    }

    pub async fn get_account_snapshot(
        &self,
        ctx: &RunContext,
        pool: Address,
    ) -> Result<AccountSnapshot, PipelineError> {
        let data = self
            .read(pool, &ILendingPool::getUserAccountDataCall { user: ctx.account })
            .await?;
        let snap = AccountSnapshot {
            total_collateral: data.totalCollateralETH,
            total_debt: data.totalDebtETH,
            available_to_borrow: data.availableBorrowsETH,
            current_liquidation_threshold: data.currentLiquidationThreshold,
            ltv: data.ltv,
            health_factor: data.healthFactor,
            decimals: AAVE_V2_BASE_DECIMALS,
        };
        tracing::debug!(
            collateral = %snap.total_collateral,
            debt = %snap.total_debt,
            available = %snap.available_to_borrow,
            "account snapshot"
        );
        Ok(snap)
    }

    /// Latest round of `feed`, rejected if older than `ctx.quote_max_age` by chain time.
    pub async fn get_price_quote(
        &self,
        ctx: &RunContext,
        feed: Address,
    ) -> Result<PriceQuote, PipelineError> {
        let round = self
            .read(feed, &IAggregatorV3::latestRoundDataCall {})
            .await?;
        let decimals = self.read(feed, &IAggregatorV3::decimalsCall {}).await?;
        let now = self.client.latest_block_timestamp().await?;

        if round.answer <= I256::ZERO {
            return Err(PipelineError::InvalidQuote(format!(
                "non-positive answer {}",
                round.answer
            )));
        }
        let round_id = u128::try_from(round.roundId)
            .map_err(|e| PipelineError::decode("roundId", e))?;
        let answered_in_round = u128::try_from(round.answeredInRound)
            .map_err(|e| PipelineError::decode("answeredInRound", e))?;
        let updated_at = u64::try_from(round.updatedAt)
            .map_err(|e| PipelineError::decode("updatedAt", e))?;
        if updated_at == 0 {
            return Err(PipelineError::InvalidQuote("round not complete".into()));
        }
        if answered_in_round < round_id {
            return Err(PipelineError::InvalidQuote(format!(
                "answer carried over from round {answered_in_round} into {round_id}"
            )));
        }

        let age_secs = now.saturating_sub(updated_at);
        let max_age_secs = ctx.quote_max_age.as_secs();
        if age_secs > max_age_secs {
            return Err(PipelineError::StaleQuote {
                updated_at,
                age_secs,
                max_age_secs,
            });
        }

        let quote = PriceQuote {
            answer: round.answer.into_raw(),
            decimals,
            round_id,
            answered_in_round,
            updated_at,
        };
        tracing::debug!(answer = %quote.answer, decimals, age_secs, "price quote");
        Ok(quote)
    }

    /// Look the lending pool up from its addresses provider.
    pub async fn resolve_lending_pool(&self, provider: Address) -> Result<Address, PipelineError> {
        let pool = self
            .read(provider, &ILendingPoolAddressesProvider::getLendingPoolCall {})
            .await?;
        if pool == Address::ZERO {
            return Err(PipelineError::invalid(format!(
                "addresses provider {provider:#x} returned the zero address"
            )));
        }
        tracing::debug!(%pool, "resolved lending pool");
        Ok(pool)
    }

    pub async fn wrapped_balance(
        &self,
        ctx: &RunContext,
        token: Address,
    ) -> Result<TokenAmount, PipelineError> {
        let v = self
            .read(token, &IERC20::balanceOfCall { owner: ctx.account })
            .await?;
        Ok(TokenAmount::new(v, WRAPPED_NATIVE_DECIMALS))
    }

    pub async fn allowance(
        &self,
        ctx: &RunContext,
        token: Address,
        spender: Address,
    ) -> Result<U256, PipelineError> {
        self.read(
            token,
            &IERC20::allowanceCall {
                owner: ctx.account,
                spender,
            },
        )
        .await
    }

    pub async fn native_balance(&self, ctx: &RunContext) -> Result<U256, PipelineError> {
        self.client.native_balance(ctx.account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::mock::{MockChain, TX_FEE};

    fn ctx(chain: &MockChain) -> RunContext {
        RunContext {
            account: chain.account(),
            confirmations: 1,
            confirmation_timeout: Duration::from_secs(5),
            quote_max_age: Duration::from_secs(3_600),
            safety_factor_bps: 9_500,
        }
    }

    fn eth(milli: u64) -> U256 {
        U256::from(milli) * U256::from(1_000_000_000_000_000_u64)
    }

    #[tokio::test]
    async fn wrap_credits_exact_amount_and_debits_native_plus_fees() -> eyre::Result<()> {
        let chain = MockChain::funded(eth(1_000));
        let weth = chain.weth();
        let orch = Orchestrator::new(chain);
        let c = ctx(orch.client());

        for milli in [1_u64, 20, 333] {
            let native_before = orch.native_balance(&c).await?;
            let wrapped_before = orch.wrapped_balance(&c, weth).await?.value;

            let r = orch.wrap_native_currency(&c, weth, eth(milli)).await?;
            assert!(r.is_confirmed());

            let wrapped_after = orch.wrapped_balance(&c, weth).await?.value;
            let native_after = orch.native_balance(&c).await?;
            assert_eq!(wrapped_after - wrapped_before, eth(milli));
            assert!(native_before - native_after >= eth(milli));
            assert_eq!(native_before - native_after, eth(milli) + TX_FEE);
        }
        Ok(())
    }

    #[tokio::test]
    async fn wrap_rejects_zero() {
        let chain = MockChain::funded(eth(1_000));
        let weth = chain.weth();
        let orch = Orchestrator::new(chain);
        let c = ctx(orch.client());
        let r = orch.wrap_native_currency(&c, weth, U256::ZERO).await;
        assert!(matches!(r, Err(PipelineError::InvalidRequest(_))), "got {r:?}");
        assert!(orch.client().submitted().is_empty(), "nothing may be sent");
    }

    #[tokio::test]
    async fn wrap_without_funds_is_a_call_error() {
        let chain = MockChain::funded(eth(1));
        let weth = chain.weth();
        let orch = Orchestrator::new(chain);
        let c = ctx(orch.client());
        let r = orch.wrap_native_currency(&c, weth, eth(5)).await;
        assert!(matches!(r, Err(PipelineError::ChainCall(_))), "got {r:?}");
    }

    #[tokio::test]
    async fn reapproval_overwrites() -> eyre::Result<()> {
        let chain = MockChain::funded(eth(1_000));
        let (weth, pool) = (chain.weth(), chain.pool());
        let orch = Orchestrator::new(chain);
        let c = ctx(orch.client());

        orch.approve_allowance(&c, weth, pool, eth(50)).await?;
        orch.approve_allowance(&c, weth, pool, eth(20)).await?;
        assert_eq!(orch.allowance(&c, weth, pool).await?, eth(20));
        Ok(())
    }

    #[tokio::test]
    async fn supply_above_allowance_reverts() -> eyre::Result<()> {
        let chain = MockChain::funded(eth(1_000));
        let (weth, pool) = (chain.weth(), chain.pool());
        let orch = Orchestrator::new(chain);
        let c = ctx(orch.client());

        orch.wrap_native_currency(&c, weth, eth(100)).await?;
        orch.approve_allowance(&c, weth, pool, eth(10)).await?;
        let r = orch.supply_collateral(&c, pool, weth, eth(11)).await;
        let Err(e) = r else {
            eyre::bail!("supply above allowance must fail");
        };
        assert_eq!(e.code(), "chain_revert_error");
        assert!(e.is_allowance_insufficient(), "got {e:?}");
        assert!(orch.get_account_snapshot(&c, pool).await?.total_collateral.is_zero());
        Ok(())
    }

    #[tokio::test]
    async fn mined_revert_is_reported_with_tx() -> eyre::Result<()> {
        let chain = MockChain::funded(eth(1_000));
        chain.revert_next_mined();
        let weth = chain.weth();
        let orch = Orchestrator::new(chain);
        let c = ctx(orch.client());
        let r = orch.wrap_native_currency(&c, weth, eth(1)).await;
        assert!(
            matches!(&r, Err(PipelineError::ChainRevert { tx: Some(_), reason }) if reason.contains("weth.deposit")),
            "got {r:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn waits_for_configured_depth() -> eyre::Result<()> {
        let chain = MockChain::funded(eth(1_000));
        let weth = chain.weth();
        let orch = Orchestrator::new(chain);
        let c = RunContext {
            confirmations: 3,
            ..ctx(orch.client())
        };
        let r = orch.wrap_native_currency(&c, weth, eth(1)).await?;
        assert_eq!(r.confirmations, 3);
        assert_eq!(orch.client().confirmation_depths(), vec![3]);
        Ok(())
    }

    #[tokio::test]
    async fn stalled_confirmation_times_out() {
        let chain = MockChain::funded(eth(1_000));
        chain.stall_confirmations();
        let weth = chain.weth();
        let orch = Orchestrator::new(chain);
        let c = RunContext {
            confirmation_timeout: Duration::from_millis(30),
            ..ctx(orch.client())
        };
        let r = orch.wrap_native_currency(&c, weth, eth(1)).await;
        assert!(
            matches!(r, Err(PipelineError::ConfirmationTimeout { depth: 1, .. })),
            "got {r:?}"
        );
    }

    #[tokio::test]
    async fn foreign_account_cannot_write() {
        let chain = MockChain::funded(eth(1_000));
        let weth = chain.weth();
        let orch = Orchestrator::new(chain);
        let c = RunContext {
            account: Address::repeat_byte(0x42),
            ..ctx(orch.client())
        };
        let r = orch.wrap_native_currency(&c, weth, eth(1)).await;
        assert!(matches!(r, Err(PipelineError::InvalidRequest(_))), "got {r:?}");
    }

    #[tokio::test]
    async fn quote_staleness_uses_chain_time() -> eyre::Result<()> {
        let chain = MockChain::funded(eth(1_000));
        let feed = chain.feed();
        let orch = Orchestrator::new(chain);
        let c = ctx(orch.client());

        let q = orch.get_price_quote(&c, feed).await?;
        assert_eq!(q.decimals, 18);
        assert_eq!(q.answer, U256::from(828_957_654_412_212_u64));

        orch.client().advance_time(3_601);
        let r = orch.get_price_quote(&c, feed).await;
        assert!(
            matches!(r, Err(PipelineError::StaleQuote { max_age_secs: 3_600, .. })),
            "got {r:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn non_positive_or_carried_answers_are_rejected() {
        let chain = MockChain::funded(eth(1_000));
        let feed = chain.feed();
        let orch = Orchestrator::new(chain);
        let c = ctx(orch.client());

        orch.client().set_price(I256::ZERO);
        let r = orch.get_price_quote(&c, feed).await;
        assert!(matches!(r, Err(PipelineError::InvalidQuote(_))), "got {r:?}");

        orch.client().set_price(I256::from_raw(U256::from(5_u64)));
        orch.client().carry_answer_over();
        let r = orch.get_price_quote(&c, feed).await;
        assert!(matches!(r, Err(PipelineError::InvalidQuote(_))), "got {r:?}");
    }

    #[tokio::test]
    async fn resolves_pool_from_provider() -> eyre::Result<()> {
        let chain = MockChain::funded(eth(1_000));
        let (provider, pool) = (chain.addresses_provider(), chain.pool());
        let orch = Orchestrator::new(chain);
        assert_eq!(orch.resolve_lending_pool(provider).await?, pool);
        Ok(())
    }

    #[tokio::test]
    async fn garbage_return_data_is_a_decode_error() {
        let chain = MockChain::funded(eth(1_000));
        let orch = Orchestrator::new(chain);
        // Nothing is deployed here; the mock answers with empty bytes.
        let r = orch.resolve_lending_pool(Address::repeat_byte(0x99)).await;
        assert!(matches!(r, Err(PipelineError::Decode { .. })), "got {r:?}");
    }
}
