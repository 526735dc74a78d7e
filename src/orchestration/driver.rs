//! Execution driver: the single in-flight cycle guard and the submission path.

use crate::datasource::{DataSourceError, ExecutionCall, Executor, Receipt};
use crate::domain::{ChainTime, TxRef};
use crate::engine::{ensure_deadline, LedgerError, SelectorError};
use crate::math::MathError;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Gas limit = estimate * 120 / 100.
pub const GAS_MARGIN_PERCENT: u64 = 120;

/// Cycle states. Only `Idle` accepts a new trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum DriverState {
    Idle = 0,
    Sizing = 1,
    Submitting = 2,
    Queued = 3,
    Completing = 4,
}

impl DriverState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DriverState::Sizing,
            2 => DriverState::Submitting,
            3 => DriverState::Queued,
            4 => DriverState::Completing,
            _ => DriverState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Idle => "idle",
            DriverState::Sizing => "sizing",
            DriverState::Submitting => "submitting",
            DriverState::Queued => "queued",
            DriverState::Completing => "completing",
        }
    }
}

/// Owner of the driver state for one pool.
#[derive(Debug, Clone, Default)]
pub struct ExecutionDriver {
    state: Arc<AtomicU8>,
}

impl ExecutionDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DriverState {
        DriverState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `Idle -> Sizing`, or `None` when a cycle is already in flight.
    pub fn try_begin(&self) -> Option<CycleGuard> {
        self.state
            .compare_exchange(
                DriverState::Idle as u8,
                DriverState::Sizing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| CycleGuard {
                state: self.state.clone(),
            })
    }
}

/// Held for the duration of a cycle; dropping it returns the driver to `Idle`.
#[derive(Debug)]
pub struct CycleGuard {
    state: Arc<AtomicU8>,
}

impl CycleGuard {
    pub fn transition(&self, next: DriverState) {
        debug!(state = next.as_str(), "Driver transition");
        self.state.store(next as u8, Ordering::Release);
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.state.store(DriverState::Idle as u8, Ordering::Release);
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    /// Direction contradicts the price ordering.
    #[error("ordering violation: {0}")]
    OrderingViolation(String),
    #[error("no active liquidity")]
    NoLiquidity,
    #[error("invalid cycle input: {0}")]
    InvalidInput(String),
    #[error("state read failed: {0}")]
    StateReadFailure(DataSourceError),
    #[error("deadline {deadline} reached at chain time {now}")]
    DeadlineExpired { deadline: ChainTime, now: ChainTime },
    #[error("submission reverted: {reason}")]
    SubmissionReverted { tx_ref: Option<TxRef>, reason: String },
    /// Submitted, but the outcome could not be observed.
    #[error("receipt for {tx_ref} unavailable: {reason}")]
    ReceiptUnavailable { tx_ref: TxRef, reason: String },
    /// The first phase confirmed on chain but its queue record could not be stored.
    #[error("{tx_ref} confirmed but its redemption was not queued: {reason}")]
    QueuePersistFailed { tx_ref: TxRef, reason: String },
    #[error("finalization {id} failed: {reason}")]
    FinalizationFailure { id: i64, reason: String },
    #[error("finalization {0} not found")]
    FinalizationNotFound(i64),
    #[error("finalization {id} is {status}, only failed records can be retried")]
    FinalizationNotRetryable { id: i64, status: String },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl CycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::OrderingViolation(_) => "orderingViolation",
            CycleError::NoLiquidity => "noLiquidity",
            CycleError::InvalidInput(_) => "invalidInput",
            CycleError::StateReadFailure(_) => "stateReadFailure",
            CycleError::DeadlineExpired { .. } => "deadlineExpired",
            CycleError::SubmissionReverted { .. } => "submissionReverted",
            CycleError::ReceiptUnavailable { .. } => "receiptUnavailable",
            CycleError::QueuePersistFailed { .. } => "queuePersistFailed",
            CycleError::FinalizationFailure { .. } => "finalizationFailure",
            CycleError::FinalizationNotFound(_) => "finalizationNotFound",
            CycleError::FinalizationNotRetryable { .. } => "finalizationNotRetryable",
            CycleError::Ledger(_) => "ledger",
            CycleError::Db(_) => "database",
        }
    }

    /// Transaction that reached the chain before the failure, if any.
    pub fn tx_ref(&self) -> Option<&TxRef> {
        match self {
            CycleError::SubmissionReverted { tx_ref, .. } => tx_ref.as_ref(),
            CycleError::ReceiptUnavailable { tx_ref, .. }
            | CycleError::QueuePersistFailed { tx_ref, .. } => Some(tx_ref),
            _ => None,
        }
    }
}

impl From<MathError> for CycleError {
    fn from(err: MathError) -> Self {
        match err {
            MathError::OrderingViolation(msg) => CycleError::OrderingViolation(msg),
            MathError::NoLiquidity => CycleError::NoLiquidity,
            other => CycleError::InvalidInput(other.to_string()),
        }
    }
}

impl From<SelectorError> for CycleError {
    fn from(err: SelectorError) -> Self {
        match err {
            SelectorError::Math(math) => math.into(),
            SelectorError::DeadlineExpired { deadline, now } => {
                CycleError::DeadlineExpired { deadline, now }
            }
            other => CycleError::InvalidInput(other.to_string()),
        }
    }
}

/// A confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub tx_ref: TxRef,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub block_number: u64,
}

pub fn gas_limit_for(estimate: u64) -> u64 {
    estimate.saturating_mul(GAS_MARGIN_PERCENT) / 100
}

/// Estimate, re-check the deadline against fresh chain time, submit and wait.
///
/// Never retries: a reverted or rejected submission is returned as is.
pub async fn submit_call(
    executor: &dyn Executor,
    call: &ExecutionCall,
) -> Result<Submission, CycleError> {
    let estimate = executor
        .estimate(call)
        .await
        .map_err(|e| CycleError::SubmissionReverted {
            tx_ref: None,
            reason: format!("estimate failed: {}", e),
        })?;
    let gas_limit = gas_limit_for(estimate);

    if let ExecutionCall::Correct(params) = call {
        let chain_now = executor
            .chain_time()
            .await
            .map_err(CycleError::StateReadFailure)?;
        if let Err(err) = ensure_deadline(params, chain_now) {
            warn!(deadline = %params.deadline, now = %chain_now, "Deadline expired before submission");
            return Err(err.into());
        }
    }

    let tx_ref = executor
        .submit(call, gas_limit)
        .await
        .map_err(|e| CycleError::SubmissionReverted {
            tx_ref: None,
            reason: e.to_string(),
        })?;
    info!(call = call.label(), tx_ref = %tx_ref, gas_limit, "Transaction submitted");

    match executor.await_receipt(&tx_ref).await {
        Ok(Receipt::Confirmed {
            tx_ref,
            gas_used,
            block_number,
        }) => Ok(Submission {
            tx_ref,
            gas_limit,
            gas_used,
            block_number,
        }),
        Ok(Receipt::Reverted { tx_ref, reason }) => Err(CycleError::SubmissionReverted {
            tx_ref: Some(tx_ref),
            reason,
        }),
        Err(e) => Err(CycleError::ReceiptUnavailable {
            tx_ref,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::mock::{MockExecutor, MockOutcome};
    use crate::domain::Direction;
    use crate::engine::ExecutionParams;
    use num_bigint::BigUint;

    fn correction(deadline: u64) -> ExecutionCall {
        ExecutionCall::Correct(ExecutionParams {
            direction: Direction::ZeroForOne,
            max_amount_in: BigUint::from(100u32),
            min_amount_out: BigUint::from(99u32),
            min_intermediate_out: None,
            deadline: ChainTime::new(deadline),
        })
    }

    #[test]
    fn test_guard_rejects_second_cycle() {
        let driver = ExecutionDriver::new();
        let guard = driver.try_begin().unwrap();
        assert_eq!(driver.state(), DriverState::Sizing);
        assert!(driver.try_begin().is_none());

        guard.transition(DriverState::Submitting);
        assert_eq!(driver.state(), DriverState::Submitting);
        assert!(driver.try_begin().is_none());

        drop(guard);
        assert_eq!(driver.state(), DriverState::Idle);
        assert!(driver.try_begin().is_some());
    }

    #[test]
    fn test_gas_margin() {
        assert_eq!(gas_limit_for(100_000), 120_000);
        assert_eq!(gas_limit_for(7), 8);
        assert_eq!(gas_limit_for(u64::MAX), u64::MAX / 100);
    }

    #[tokio::test]
    async fn test_submit_confirmed() {
        let exec = MockExecutor::new()
            .with_chain_times(vec![ChainTime::new(1_000)])
            .with_gas_estimate(50_000);
        let submission = submit_call(&exec, &correction(1_010)).await.unwrap();
        assert_eq!(submission.gas_limit, 60_000);
        assert_eq!(exec.submitted()[0].1, 60_000);
    }

    #[tokio::test]
    async fn test_expired_deadline_never_submits() {
        let exec = MockExecutor::new().with_chain_times(vec![ChainTime::new(1_015)]);
        let err = submit_call(&exec, &correction(1_010)).await.unwrap_err();
        assert!(matches!(err, CycleError::DeadlineExpired { .. }));
        assert_eq!(exec.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_revert_carries_reason_and_tx() {
        let exec = MockExecutor::new()
            .with_chain_times(vec![ChainTime::new(1_000)])
            .with_outcome(MockOutcome::Revert("too little received".into()));
        let err = submit_call(&exec, &correction(2_000)).await.unwrap_err();
        assert_eq!(err.kind(), "submissionReverted");
        assert!(err.tx_ref().is_some());
        assert!(err.to_string().contains("too little received"));
        assert_eq!(exec.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_completion_skips_deadline_check() {
        let exec = MockExecutor::new();
        let call = ExecutionCall::CompleteRedemption { finalization_id: 9 };
        assert!(submit_call(&exec, &call).await.is_ok());
    }

    #[test]
    fn test_selector_errors_map_to_taxonomy() {
        let err: CycleError = SelectorError::Math(MathError::NoLiquidity).into();
        assert_eq!(err.kind(), "noLiquidity");
        let err: CycleError = SelectorError::Math(MathError::OrderingViolation("x".into())).into();
        assert_eq!(err.kind(), "orderingViolation");
        let err: CycleError = SelectorError::InvalidSlippage(100).into();
        assert_eq!(err.kind(), "invalidInput");
    }

    #[test]
    fn test_queue_persist_failure_keeps_confirmed_tx() {
        let tx_ref = TxRef("0xabc".to_string());
        let err = CycleError::QueuePersistFailed {
            tx_ref: tx_ref.clone(),
            reason: "database is locked".to_string(),
        };
        assert_eq!(err.kind(), "queuePersistFailed");
        assert_eq!(err.tx_ref(), Some(&tx_ref));
        assert!(err.to_string().contains("not queued"));
    }
}
