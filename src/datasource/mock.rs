//! Scripted reader and executor for testing without network calls.

use super::{DataSourceError, ExecutionCall, Executor, Receipt, StateReader};
use crate::domain::{ChainTime, PoolState, TargetPrice, TickLiquidity, TxRef};
use async_trait::async_trait;
use num_bigint::BigUint;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct ReaderState {
    pool: Option<PoolState>,
    reference: Option<TargetPrice>,
    balances: (BigUint, BigUint),
    ticks: Vec<TickLiquidity>,
    preview_shares: Option<BigUint>,
    chain_time: ChainTime,
    block_number: u64,
    transient_failures: u32,
    pool_reads: u32,
}

/// Mock state reader returning whatever the test configured.
#[derive(Debug, Default)]
pub struct MockStateReader {
    state: Mutex<ReaderState>,
}

impl MockStateReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool_state(self, pool: PoolState) -> Self {
        self.set_pool_state(pool);
        self
    }

    pub fn with_reference_price(self, price: TargetPrice) -> Self {
        self.set_reference_price(price);
        self
    }

    pub fn with_balances(self, token0: BigUint, token1: BigUint) -> Self {
        self.set_balances(token0, token1);
        self
    }

    pub fn with_tick_liquidity(self, ticks: Vec<TickLiquidity>) -> Self {
        lock(&self.state).ticks = ticks;
        self
    }

    /// Fixed share count returned by `preview_mint`; by default it echoes the assets.
    pub fn with_preview_shares(self, shares: BigUint) -> Self {
        lock(&self.state).preview_shares = Some(shares);
        self
    }

    pub fn with_chain_time(self, time: ChainTime) -> Self {
        self.set_chain_time(time);
        self
    }

    /// Fail the next `n` pool-state reads with a network error.
    pub fn with_transient_failures(self, n: u32) -> Self {
        lock(&self.state).transient_failures = n;
        self
    }

    pub fn set_pool_state(&self, pool: PoolState) {
        lock(&self.state).pool = Some(pool);
    }

    pub fn set_reference_price(&self, price: TargetPrice) {
        lock(&self.state).reference = Some(price);
    }

    pub fn set_balances(&self, token0: BigUint, token1: BigUint) {
        lock(&self.state).balances = (token0, token1);
    }

    pub fn set_chain_time(&self, time: ChainTime) {
        lock(&self.state).chain_time = time;
    }

    pub fn set_block_number(&self, block: u64) {
        lock(&self.state).block_number = block;
    }

    /// Number of pool-state read attempts, failed ones included.
    pub fn pool_reads(&self) -> u32 {
        lock(&self.state).pool_reads
    }
}

#[async_trait]
impl StateReader for MockStateReader {
    async fn read_pool_state(&self) -> Result<PoolState, DataSourceError> {
        let mut state = lock(&self.state);
        state.pool_reads += 1;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(DataSourceError::NetworkError("scripted failure".to_string()));
        }
        state
            .pool
            .clone()
            .ok_or_else(|| DataSourceError::Other("pool state not configured".to_string()))
    }

    async fn read_reference_price(&self) -> Result<TargetPrice, DataSourceError> {
        lock(&self.state)
            .reference
            .clone()
            .ok_or_else(|| DataSourceError::Other("reference price not configured".to_string()))
    }

    async fn read_balances(&self) -> Result<(BigUint, BigUint), DataSourceError> {
        Ok(lock(&self.state).balances.clone())
    }

    async fn read_tick_liquidity(&self, ticks: &[i32]) -> Result<Vec<TickLiquidity>, DataSourceError> {
        let state = lock(&self.state);
        Ok(ticks
            .iter()
            .map(|t| {
                state
                    .ticks
                    .iter()
                    .find(|info| info.tick == *t)
                    .copied()
                    .unwrap_or(TickLiquidity {
                        tick: *t,
                        liquidity_gross: 0,
                        liquidity_net: 0,
                    })
            })
            .collect())
    }

    async fn preview_mint(&self, assets: &BigUint) -> Result<BigUint, DataSourceError> {
        Ok(lock(&self.state)
            .preview_shares
            .clone()
            .unwrap_or_else(|| assets.clone()))
    }

    async fn chain_time(&self) -> Result<ChainTime, DataSourceError> {
        Ok(lock(&self.state).chain_time)
    }

    /// Configured block, never below 1.
    async fn block_number(&self) -> Result<u64, DataSourceError> {
        Ok(lock(&self.state).block_number.max(1))
    }
}

/// Scripted result for the next submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Confirm,
    Revert(String),
    SubmitError(DataSourceError),
}

#[derive(Debug, Default)]
struct ExecutorState {
    chain_times: VecDeque<ChainTime>,
    last_time: ChainTime,
    gas_estimate: u64,
    outcomes: VecDeque<MockOutcome>,
    submitted: Vec<(ExecutionCall, u64)>,
    pending: HashMap<TxRef, MockOutcome>,
    next_nonce: u64,
    estimates: u32,
}

/// Mock executor recording every call.
///
/// Outcomes default to `Confirm` once the script runs out.
#[derive(Debug, Default)]
pub struct MockExecutor {
    state: Mutex<ExecutorState>,
    submit_delay: Duration,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain times returned by successive `chain_time` calls; the last one repeats.
    pub fn with_chain_times(self, times: Vec<ChainTime>) -> Self {
        {
            let mut state = lock(&self.state);
            if let Some(first) = times.first() {
                state.last_time = *first;
            }
            state.chain_times = times.into();
        }
        self
    }

    pub fn with_gas_estimate(self, gas: u64) -> Self {
        lock(&self.state).gas_estimate = gas;
        self
    }

    pub fn with_outcome(self, outcome: MockOutcome) -> Self {
        lock(&self.state).outcomes.push_back(outcome);
        self
    }

    /// Sleep inside `submit`, keeping a cycle in flight.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn push_outcome(&self, outcome: MockOutcome) {
        lock(&self.state).outcomes.push_back(outcome);
    }

    /// Submitted calls with their gas limits, in order.
    pub fn submitted(&self) -> Vec<(ExecutionCall, u64)> {
        lock(&self.state).submitted.clone()
    }

    pub fn submit_count(&self) -> usize {
        lock(&self.state).submitted.len()
    }

    pub fn estimate_count(&self) -> u32 {
        lock(&self.state).estimates
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn chain_time(&self) -> Result<ChainTime, DataSourceError> {
        let mut state = lock(&self.state);
        if let Some(next) = state.chain_times.pop_front() {
            state.last_time = next;
        }
        Ok(state.last_time)
    }

    async fn estimate(&self, _call: &ExecutionCall) -> Result<u64, DataSourceError> {
        let mut state = lock(&self.state);
        state.estimates += 1;
        Ok(state.gas_estimate)
    }

    async fn submit(&self, call: &ExecutionCall, gas_limit: u64) -> Result<TxRef, DataSourceError> {
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        let mut state = lock(&self.state);
        state.submitted.push((call.clone(), gas_limit));
        let outcome = state.outcomes.pop_front().unwrap_or(MockOutcome::Confirm);
        if let MockOutcome::SubmitError(err) = outcome {
            return Err(err);
        }
        state.next_nonce += 1;
        let tx_ref = TxRef(format!("0x{:064x}", state.next_nonce));
        state.pending.insert(tx_ref.clone(), outcome);
        Ok(tx_ref)
    }

    async fn await_receipt(&self, pending: &TxRef) -> Result<Receipt, DataSourceError> {
        let state = lock(&self.state);
        match state.pending.get(pending) {
            Some(MockOutcome::Revert(reason)) => Ok(Receipt::Reverted {
                tx_ref: pending.clone(),
                reason: reason.clone(),
            }),
            Some(_) => Ok(Receipt::Confirmed {
                tx_ref: pending.clone(),
                gas_used: state.gas_estimate,
                block_number: state.next_nonce,
            }),
            None => Err(DataSourceError::Other(format!("unknown transaction {}", pending))),
        }
    }
}
