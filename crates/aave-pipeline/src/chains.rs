//! The capability set the orchestrator needs from a chain, and the values that cross it.

pub mod evm;
#[cfg(test)]
pub mod mock;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::{errors::PipelineError, types::CallResult};

/// A state-changing contract call, signed and sent by the client's account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Short name used in logs ("weth.deposit", "pool.deposit", ...).
    pub label: &'static str,
}

/// A read-only `eth_call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCall {
    pub to: Address,
    pub data: Bytes,
}

/// Handle for a transaction that has been accepted by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTx {
    pub tx_hash: B256,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account that signs every `submit`.
    fn current_account(&self) -> Address;

    /// Sign and broadcast. Rejections before execution are `ChainCall`; a revert
    /// detected while estimating gas is `ChainRevert`.
    async fn submit(&self, call: WriteCall) -> Result<PendingTx, PipelineError>;

    /// Resolve once the transaction is mined and `depth` blocks deep (the including block
    /// counts as one). Unbounded; callers apply their own timeout.
    async fn wait_for_confirmations(
        &self,
        pending: &PendingTx,
        depth: u64,
    ) -> Result<CallResult, PipelineError>;

    async fn call(&self, call: ReadCall) -> Result<Bytes, PipelineError>;

    /// Timestamp of the latest block, in unix seconds.
    async fn latest_block_timestamp(&self) -> Result<u64, PipelineError>;

    async fn native_balance(&self, account: Address) -> Result<U256, PipelineError>;
}
