//! The six-step run: wrap, approve, supply, snapshot, quote, borrowable.
//!
//! Steps run strictly in order and each write is confirmed before the next step starts.
//! The first failure stops the run; nothing is rolled back.

use alloy::primitives::{Address, U256};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    borrow_math,
    chains::ChainClient,
    contracts::ContractSet,
    errors::{ErrorReport, PipelineError},
    orchestrator::{Orchestrator, RunContext},
    types::{AccountSnapshot, CallResult, PriceQuote, TokenAmount},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Wrap,
    Approve,
    Supply,
    Snapshot,
    Quote,
    Borrowable,
}

impl Step {
    pub const ALL: [Self; 6] = [
        Self::Wrap,
        Self::Approve,
        Self::Supply,
        Self::Snapshot,
        Self::Quote,
        Self::Borrowable,
    ];

    /// 1-based position in the run.
    pub const fn index(self) -> u8 {
        match self {
            Self::Wrap => 1,
            Self::Approve => 2,
            Self::Supply => 3,
            Self::Snapshot => 4,
            Self::Quote => 5,
            Self::Borrowable => 6,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wrap => "wrap",
            Self::Approve => "approve",
            Self::Supply => "supply",
            Self::Snapshot => "snapshot",
            Self::Quote => "quote",
            Self::Borrowable => "borrowable",
        }
    }

    pub const fn is_write(self) -> bool {
        matches!(self, Self::Wrap | Self::Approve | Self::Supply)
    }
}

/// Addresses one run operates on, with the pool already looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub weth: Address,
    pub pool: Address,
    pub price_feed: Address,
    pub borrow_asset: Address,
    pub borrow_asset_decimals: u8,
}

impl Targets {
    pub async fn resolve<C: ChainClient>(
        orch: &Orchestrator<C>,
        set: &ContractSet,
    ) -> Result<Self, PipelineError> {
        let pool = orch
            .resolve_lending_pool(set.lending_pool_addresses_provider)
            .await?;
        Ok(Self {
            weth: set.weth,
            pool,
            price_feed: set.price_feed,
            borrow_asset: set.borrow_asset,
            borrow_asset_decimals: set.borrow_asset_decimals,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePlan {
    /// Native currency to wrap, then approve and supply, in wei.
    pub amount: U256,
    /// Writes before this step are skipped. Reads always run.
    pub start_at: Step,
}

impl PipelinePlan {
    pub const fn new(amount: U256) -> Self {
        Self {
            amount,
            start_at: Step::Wrap,
        }
    }

    #[must_use]
    pub const fn starting_at(mut self, step: Step) -> Self {
        self.start_at = step;
        self
    }

    fn includes(&self, step: Step) -> bool {
        !step.is_write() || step >= self.start_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    Tx(CallResult),
    Snapshot(AccountSnapshot),
    Quote(PriceQuote),
    Borrowable {
        amount: TokenAmount,
        /// Borrow-asset units one whole native coin buys at the quoted price.
        per_native: TokenAmount,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: Step,
    pub index: u8,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub run_id: String,
    pub account: Address,
    pub borrow_asset: Address,
    pub steps: Vec<StepRecord>,
    pub borrowable: TokenAmount,
}

/// A run that stopped early. Holds everything that did complete.
#[derive(Debug, Clone, Error)]
#[error("step {} ({}) failed: {error}", .failed_step.index(), .failed_step.as_str())]
pub struct PipelineAborted {
    pub run_id: String,
    pub failed_step: Step,
    #[source]
    pub error: PipelineError,
    pub completed: Vec<StepRecord>,
    /// Set when the chain was inspected after the failure to find the step to redo.
    pub resume_hint: Option<Step>,
}

#[derive(Debug, Serialize)]
pub struct AbortReport<'a> {
    pub run_id: &'a str,
    pub failed_step: Step,
    pub failed_index: u8,
    pub last_confirmed: Option<Step>,
    pub resume_from: Step,
    pub error: ErrorReport,
    pub completed: &'a [StepRecord],
}

impl PipelineAborted {
    /// Last write that reached its confirmation depth before the failure.
    pub fn last_confirmed(&self) -> Option<Step> {
        self.completed
            .iter()
            .rev()
            .find(|r| r.step.is_write())
            .map(|r| r.step)
    }

    /// Where a rerun should start. Assumes nothing changed on chain in between.
    pub fn resume_from(&self) -> Step {
        if let Some(step) = self.resume_hint {
            step
        } else if self.failed_step.is_write() {
            self.failed_step
        } else {
            Step::Snapshot
        }
    }

    pub fn report(&self) -> AbortReport<'_> {
        AbortReport {
            run_id: &self.run_id,
            failed_step: self.failed_step,
            failed_index: self.failed_step.index(),
            last_confirmed: self.last_confirmed(),
            resume_from: self.resume_from(),
            error: ErrorReport::from(&self.error),
            completed: &self.completed,
        }
    }
}

struct Recorder {
    run_id: String,
    completed: Vec<StepRecord>,
    resume_hint: Option<Step>,
}

impl Recorder {
    fn record<T: Clone>(
        &mut self,
        step: Step,
        res: Result<T, PipelineError>,
        outcome: impl FnOnce(T) -> StepOutcome,
    ) -> Result<T, PipelineAborted> {
        match res {
            Ok(v) => {
                tracing::info!(run_id = %self.run_id, step = step.as_str(), index = step.index(), "step complete");
                self.completed.push(StepRecord {
                    step,
                    index: step.index(),
                    outcome: outcome(v.clone()),
                });
                Ok(v)
            }
            Err(error) => Err(self.fail(step, error)),
        }
    }

    fn fail(&mut self, step: Step, error: PipelineError) -> PipelineAborted {
        tracing::warn!(
            run_id = %self.run_id,
            step = step.as_str(),
            code = error.code(),
            error = %error,
            "pipeline aborted"
        );
        PipelineAborted {
            run_id: self.run_id.clone(),
            failed_step: step,
            error,
            completed: std::mem::take(&mut self.completed),
            resume_hint: self.resume_hint.take(),
        }
    }
}

pub struct Pipeline<'a, C> {
    orch: &'a Orchestrator<C>,
    ctx: &'a RunContext,
    targets: &'a Targets,
}

impl<'a, C: ChainClient> Pipeline<'a, C> {
    pub const fn new(orch: &'a Orchestrator<C>, ctx: &'a RunContext, targets: &'a Targets) -> Self {
        Self { orch, ctx, targets }
    }

    pub async fn run(&self, plan: &PipelinePlan) -> Result<PipelineOutput, PipelineAborted> {
        let (orch, ctx, t) = (self.orch, self.ctx, self.targets);
        let mut rec = Recorder {
            run_id: Uuid::new_v4().to_string(),
            completed: vec![],
            resume_hint: None,
        };
        tracing::info!(
            run_id = %rec.run_id,
            account = %ctx.account,
            amount = %plan.amount,
            start_at = plan.start_at.as_str(),
            "pipeline started"
        );

        let first_write = Step::ALL
            .into_iter()
            .find(|s| s.is_write() && plan.includes(*s));
        if let Some(first) = first_write.filter(|_| plan.amount.is_zero()) {
            return Err(rec.fail(first, PipelineError::invalid("amount must be greater than zero")));
        }

        if plan.includes(Step::Wrap) {
            let r = orch.wrap_native_currency(ctx, t.weth, plan.amount).await;
            rec.record(Step::Wrap, r, StepOutcome::Tx)?;
        }
        if plan.includes(Step::Approve) {
            let r = orch.approve_allowance(ctx, t.weth, t.pool, plan.amount).await;
            rec.record(Step::Approve, r, StepOutcome::Tx)?;
        }
        if plan.includes(Step::Supply) {
            let r = orch.supply_collateral(ctx, t.pool, t.weth, plan.amount).await;
            if matches!(&r, Err(e) if e.is_allowance_insufficient()) {
                rec.resume_hint = Some(self.supply_shortfall(plan.amount).await);
            }
            rec.record(Step::Supply, r, StepOutcome::Tx)?;
        }

        let r = orch.get_account_snapshot(ctx, t.pool).await;
        let snapshot = rec.record(Step::Snapshot, r, StepOutcome::Snapshot)?;

        let r = orch.get_price_quote(ctx, t.price_feed).await;
        let quote = rec.record(Step::Quote, r, StepOutcome::Quote)?;

        let r = borrow_math::borrowable_amount(
            snapshot.available(),
            &quote,
            ctx.safety_factor_bps,
            t.borrow_asset_decimals,
        )
        .and_then(|amount| {
            let per_native = borrow_math::invert_price(&quote, t.borrow_asset_decimals)?;
            Ok((amount, per_native))
        });
        let (borrowable, _) = rec.record(Step::Borrowable, r, |(amount, per_native)| {
            StepOutcome::Borrowable { amount, per_native }
        })?;

        tracing::info!(run_id = %rec.run_id, borrowable = %borrowable.display(), "pipeline finished");
        Ok(PipelineOutput {
            run_id: rec.run_id,
            account: ctx.account,
            borrow_asset: t.borrow_asset,
            steps: rec.completed,
            borrowable,
        })
    }

    /// The pool's `transferFrom` reverts the same way for a short balance and a short
    /// allowance. Read both to tell which earlier write has to be redone.
    async fn supply_shortfall(&self, amount: U256) -> Step {
        let (orch, ctx, t) = (self.orch, self.ctx, self.targets);
        match orch.wrapped_balance(ctx, t.weth).await {
            Ok(held) if held.value < amount => return Step::Wrap,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "could not read wrapped balance after failed supply");
                return Step::Approve;
            }
        }
        match orch.allowance(ctx, t.weth, t.pool).await {
            Ok(allowed) if allowed < amount => Step::Approve,
            Ok(_) => Step::Supply,
            Err(e) => {
                tracing::warn!(error = %e, "could not read allowance after failed supply");
                Step::Approve
            }
        }
    }

    /// Drive [`Self::run`] to completion on a private current-thread runtime.
    ///
    /// Must not be called from inside another tokio runtime.
    #[cfg(test)]
    pub fn run_blocking(
        &self,
        plan: &PipelinePlan,
    ) -> std::io::Result<Result<PipelineOutput, PipelineAborted>> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        Ok(rt.block_on(self.run(plan)))
    }
}
