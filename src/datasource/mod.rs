//! External collaborators: the chain state reader and the execution/signing side.

use crate::domain::{ChainTime, PoolState, TargetPrice, TickLiquidity, TxRef};
use crate::engine::ExecutionParams;
use async_trait::async_trait;
use num_bigint::BigUint;
use std::fmt;

pub mod dry_run;
pub mod mock;
pub mod rpc;

pub use dry_run::DryRunExecutor;
pub use mock::{MockExecutor, MockStateReader};
pub use rpc::{RpcStateReader, RpcTargets};

/// Point-in-time reads of pool and vault state.
///
/// Every call is a single attempt; callers retry with backoff.
#[async_trait]
pub trait StateReader: Send + Sync + fmt::Debug {
    /// Active liquidity, square-root price and tick of the monitored pool.
    async fn read_pool_state(&self) -> Result<PoolState, DataSourceError>;

    /// Reference ("NAV") price, token1 per token0, scaled by 1e18.
    async fn read_reference_price(&self) -> Result<TargetPrice, DataSourceError>;

    /// Executor holdings of token0 and token1 in raw units.
    async fn read_balances(&self) -> Result<(BigUint, BigUint), DataSourceError>;

    /// Gross and net liquidity at each of the given boundary ticks.
    async fn read_tick_liquidity(&self, ticks: &[i32]) -> Result<Vec<TickLiquidity>, DataSourceError>;

    /// Vault shares minted for `assets` of token1.
    async fn preview_mint(&self, assets: &BigUint) -> Result<BigUint, DataSourceError>;

    /// Timestamp of the latest block.
    async fn chain_time(&self) -> Result<ChainTime, DataSourceError>;

    /// Number of the latest block.
    async fn block_number(&self) -> Result<u64, DataSourceError>;
}

/// A transaction the executor can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionCall {
    /// Single-step correction (mint-then-sell) or first step of a two-phase one (buy-and-queue).
    Correct(ExecutionParams),
    /// Second step of a two-phase correction: redeem the queued position.
    CompleteRedemption { finalization_id: i64 },
}

impl ExecutionCall {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionCall::Correct(params) if params.direction.is_two_phase() => "buyAndQueue",
            ExecutionCall::Correct(_) => "mintThenSell",
            ExecutionCall::CompleteRedemption { .. } => "completeRedemption",
        }
    }
}

/// Outcome of waiting on a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    Confirmed {
        tx_ref: TxRef,
        gas_used: u64,
        block_number: u64,
    },
    Reverted {
        tx_ref: TxRef,
        reason: String,
    },
}

/// Signing and broadcast side of a correction.
#[async_trait]
pub trait Executor: Send + Sync + fmt::Debug {
    /// Chain time as seen by the executor, read right before submission.
    async fn chain_time(&self) -> Result<ChainTime, DataSourceError>;

    /// Gas estimate for the call.
    async fn estimate(&self, call: &ExecutionCall) -> Result<u64, DataSourceError>;

    /// Sign and broadcast; returns the pending transaction reference.
    async fn submit(&self, call: &ExecutionCall, gas_limit: u64) -> Result<TxRef, DataSourceError>;

    async fn await_receipt(&self, pending: &TxRef) -> Result<Receipt, DataSourceError>;
}

/// Error type for reader and executor operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON, malformed ABI data)
    ParseError(String),
    /// Rate limit exceeded (caller should implement backoff)
    RateLimited,
    /// Node or executor refused the request
    Rejected(String),
    /// Other error
    Other(String),
}

impl DataSourceError {
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            DataSourceError::NetworkError(_) | DataSourceError::RateLimited => true,
            DataSourceError::HttpError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            DataSourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            DataSourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DataSourceError::RateLimited => write!(f, "Rate limited"),
            DataSourceError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            DataSourceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for DataSourceError {}
