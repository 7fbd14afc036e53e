//! In-memory chain used by unit tests: WETH9, an Aave v2 pool and a Chainlink feed.

use alloy::{
    primitives::{aliases::U80, keccak256, Address, Bytes, B256, I256, U256},
    sol_types::SolCall,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::{ChainClient, PendingTx, ReadCall, WriteCall};
use crate::{
    contracts::{IAggregatorV3, IERC20, ILendingPool, ILendingPoolAddressesProvider, IWeth},
    errors::PipelineError,
    types::{CallResult, CallStatus},
};

/// Flat gas cost charged per transaction.
pub const TX_FEE: U256 = U256::from_limbs([50_000_000_000_000, 0, 0, 0]);
/// DAI priced in ETH wei, as the mainnet feed reported it.
pub const DAI_ETH_ANSWER: u64 = 828_957_654_412_212;
const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME: u64 = 12;
const LTV_BPS: u64 = 8_000;
const LIQUIDATION_THRESHOLD_BPS: u64 = 8_250;

#[derive(Debug, Clone, Copy)]
struct Mined {
    block: u64,
    success: bool,
}

#[derive(Debug)]
struct Feed {
    answer: I256,
    round_id: u64,
    answered_in_round: u64,
    updated_at: u64,
}

#[derive(Debug)]
struct State {
    block: u64,
    timestamp: u64,
    nonce: u64,
    native: HashMap<Address, U256>,
    weth: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    collateral: HashMap<Address, U256>,
    txs: HashMap<B256, Mined>,
    feed: Feed,
    submitted: Vec<&'static str>,
    depths: Vec<u64>,
    stall: bool,
    revert_next: bool,
}

#[derive(Debug)]
pub struct MockChain {
    account: Address,
    weth: Address,
    provider: Address,
    pool: Address,
    feed: Address,
    state: Mutex<State>,
}

impl MockChain {
    pub fn funded(native: U256) -> Self {
        let account = Address::repeat_byte(0xa1);
        Self {
            account,
            weth: Address::repeat_byte(0xe1),
            provider: Address::repeat_byte(0xb5),
            pool: Address::repeat_byte(0x7d),
            feed: Address::repeat_byte(0x77),
            state: Mutex::new(State {
                block: 100,
                timestamp: GENESIS_TIMESTAMP,
                nonce: 0,
                native: HashMap::from([(account, native)]),
                weth: HashMap::new(),
                allowances: HashMap::new(),
                collateral: HashMap::new(),
                txs: HashMap::new(),
                feed: Feed {
                    answer: I256::from_raw(U256::from(DAI_ETH_ANSWER)),
                    round_id: 100,
                    answered_in_round: 100,
                    updated_at: GENESIS_TIMESTAMP - 60,
                },
                submitted: vec![],
                depths: vec![],
                stall: false,
                revert_next: false,
            }),
        }
    }

    fn st(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn account(&self) -> Address {
        self.account
    }

    pub const fn weth(&self) -> Address {
        self.weth
    }

    pub const fn pool(&self) -> Address {
        self.pool
    }

    pub const fn addresses_provider(&self) -> Address {
        self.provider
    }

    pub const fn feed(&self) -> Address {
        self.feed
    }

    /// Labels of every accepted submission, in order.
    pub fn submitted(&self) -> Vec<&'static str> {
        self.st().submitted.clone()
    }

    pub fn confirmation_depths(&self) -> Vec<u64> {
        self.st().depths.clone()
    }

    pub fn stall_confirmations(&self) {
        self.st().stall = true;
    }

    /// The next accepted transaction is mined with a failed status and no effects.
    pub fn revert_next_mined(&self) {
        self.st().revert_next = true;
    }

    pub fn advance_time(&self, secs: u64) {
        self.st().timestamp += secs;
    }

    pub fn set_price(&self, answer: I256) {
        let mut st = self.st();
        st.feed.round_id += 1;
        st.feed.answered_in_round = st.feed.round_id;
        st.feed.answer = answer;
        st.feed.updated_at = st.timestamp;
    }

    pub fn carry_answer_over(&self) {
        let mut st = self.st();
        st.feed.round_id += 1;
    }

    pub fn collateral(&self) -> U256 {
        let st = self.st();
        st.collateral.get(&self.account).copied().unwrap_or_default()
    }

    fn execute(&self, st: &mut State, call: &WriteCall) -> Result<(), PipelineError> {
        let me = self.account;
        let selector: [u8; 4] = call
            .data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| PipelineError::revert("missing selector"))?;

        if call.to == self.weth && selector == IWeth::depositCall::SELECTOR {
            *st.weth.entry(me).or_default() += call.value;
            return Ok(());
        }
        if call.to == self.weth && selector == IERC20::approveCall::SELECTOR {
            let a = IERC20::approveCall::abi_decode(&call.data)
                .map_err(|e| PipelineError::decode("approve", e))?;
            st.allowances.insert((me, a.spender), a.value);
            return Ok(());
        }
        if call.to == self.pool && selector == ILendingPool::depositCall::SELECTOR {
            let d = ILendingPool::depositCall::abi_decode(&call.data)
                .map_err(|e| PipelineError::decode("deposit", e))?;
            if d.asset != self.weth {
                return Err(PipelineError::revert("VL_NO_ACTIVE_RESERVE"));
            }
            let allowed = st.allowances.get(&(me, self.pool)).copied().unwrap_or_default();
            if allowed < d.amount {
                return Err(PipelineError::revert("SafeERC20: low-level call failed"));
            }
            let held = st.weth.get(&me).copied().unwrap_or_default();
            if held < d.amount {
                return Err(PipelineError::revert("SafeERC20: low-level call failed"));
            }
            st.allowances.insert((me, self.pool), allowed - d.amount);
            st.weth.insert(me, held - d.amount);
            *st.collateral.entry(d.onBehalfOf).or_default() += d.amount;
            return Ok(());
        }
        Err(PipelineError::revert("function selector was not recognized"))
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn current_account(&self) -> Address {
        self.account
    }

    async fn submit(&self, call: WriteCall) -> Result<PendingTx, PipelineError> {
        let mut st = self.st();
        let me = self.account;
        let balance = st.native.get(&me).copied().unwrap_or_default();
        let cost = call.value + TX_FEE;
        if balance < cost {
            return Err(PipelineError::ChainCall(format!(
                "insufficient funds for gas * price + value: have {balance} want {cost}"
            )));
        }

        let success = !std::mem::take(&mut st.revert_next);
        if success {
            // Gas estimation runs the call; a revert here never reaches the mempool.
            self.execute(&mut st, &call)?;
        }

        let spent = if success { cost } else { TX_FEE };
        st.native.insert(me, balance - spent);
        st.block += 1;
        st.timestamp += BLOCK_TIME;
        st.nonce += 1;
        let tx_hash = keccak256(st.nonce.to_be_bytes());
        let block = st.block;
        st.txs.insert(tx_hash, Mined { block, success });
        st.submitted.push(call.label);
        Ok(PendingTx { tx_hash })
    }

    async fn wait_for_confirmations(
        &self,
        pending: &PendingTx,
        depth: u64,
    ) -> Result<CallResult, PipelineError> {
        let stalled = {
            let mut st = self.st();
            st.depths.push(depth);
            st.stall
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut st = self.st();
        let mined = st
            .txs
            .get(&pending.tx_hash)
            .copied()
            .ok_or_else(|| PipelineError::ChainCall(format!("unknown tx {}", pending.tx_hash)))?;
        if !mined.success {
            return Ok(CallResult {
                status: CallStatus::Reverted,
                tx_hash: pending.tx_hash,
                block_number: Some(mined.block),
                confirmations: 1,
                gas_used: Some(21_000),
            });
        }
        let target = mined.block + depth.max(1) - 1;
        if st.block < target {
            st.timestamp += (target - st.block) * BLOCK_TIME;
            st.block = target;
        }
        Ok(CallResult {
            status: CallStatus::Confirmed,
            tx_hash: pending.tx_hash,
            block_number: Some(mined.block),
            confirmations: st.block - mined.block + 1,
            gas_used: Some(21_000),
        })
    }

    async fn call(&self, call: ReadCall) -> Result<Bytes, PipelineError> {
        let st = self.st();
        let selector = call.data.get(..4).unwrap_or_default();
        let out = if call.to == self.weth {
            if selector == IERC20::balanceOfCall::SELECTOR {
                let c = IERC20::balanceOfCall::abi_decode(&call.data)
                    .map_err(|e| PipelineError::decode("balanceOf", e))?;
                let v = st.weth.get(&c.owner).copied().unwrap_or_default();
                IERC20::balanceOfCall::abi_encode_returns(&v)
            } else if selector == IERC20::allowanceCall::SELECTOR {
                let c = IERC20::allowanceCall::abi_decode(&call.data)
                    .map_err(|e| PipelineError::decode("allowance", e))?;
                let v = st
                    .allowances
                    .get(&(c.owner, c.spender))
                    .copied()
                    .unwrap_or_default();
                IERC20::allowanceCall::abi_encode_returns(&v)
            } else {
                vec![]
            }
        } else if call.to == self.provider
            && selector == ILendingPoolAddressesProvider::getLendingPoolCall::SELECTOR
        {
            ILendingPoolAddressesProvider::getLendingPoolCall::abi_encode_returns(&self.pool)
        } else if call.to == self.pool
            && selector == ILendingPool::getUserAccountDataCall::SELECTOR
        {
            let c = ILendingPool::getUserAccountDataCall::abi_decode(&call.data)
                .map_err(|e| PipelineError::decode("getUserAccountData", e))?;
            let collateral = st.collateral.get(&c.user).copied().unwrap_or_default();
            ILendingPool::getUserAccountDataCall::abi_encode_returns(
                &ILendingPool::getUserAccountDataReturn {
                    totalCollateralETH: collateral,
                    totalDebtETH: U256::ZERO,
                    availableBorrowsETH: collateral * U256::from(LTV_BPS) / U256::from(10_000),
                    currentLiquidationThreshold: U256::from(LIQUIDATION_THRESHOLD_BPS),
                    ltv: U256::from(LTV_BPS),
                    healthFactor: U256::MAX,
                },
            )
        } else if call.to == self.feed {
            if selector == IAggregatorV3::latestRoundDataCall::SELECTOR {
                IAggregatorV3::latestRoundDataCall::abi_encode_returns(
                    &IAggregatorV3::latestRoundDataReturn {
                        roundId: U80::from(st.feed.round_id),
                        answer: st.feed.answer,
                        startedAt: U256::from(st.feed.updated_at),
                        updatedAt: U256::from(st.feed.updated_at),
                        answeredInRound: U80::from(st.feed.answered_in_round),
                    },
                )
            } else if selector == IAggregatorV3::decimalsCall::SELECTOR {
                IAggregatorV3::decimalsCall::abi_encode_returns(&18)
            } else {
                vec![]
            }
        } else {
            vec![]
        };
        Ok(Bytes::from(out))
    }

    async fn latest_block_timestamp(&self) -> Result<u64, PipelineError> {
        Ok(self.st().timestamp)
    }

    async fn native_balance(&self, account: Address) -> Result<U256, PipelineError> {
        Ok(self.st().native.get(&account).copied().unwrap_or_default())
    }
}
