//! One correction cycle per trigger: read, evaluate, size, submit, record.

use crate::config::Config;
use crate::datasource::{DataSourceError, ExecutionCall, Executor, StateReader};
use crate::domain::{
    Amount, BalanceSnapshot, ChainEvent, Direction, LedgerEntry, PendingFinalization, PoolState,
    RawSnapshot, TargetPrice, TimeMs, TxRef,
};
use crate::engine::{
    build_params, evaluate, snapshot_to_raw, BalanceLedger, Evaluation, ExecutionParams,
    SelectorConfig,
};
use crate::math::{self, LiquidityBand, TradeSizing};
use crate::orchestration::driver::{
    submit_call, CycleError, CycleGuard, DriverState, ExecutionDriver, Submission,
};
use crate::orchestration::finalizer::Finalizer;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use num_bigint::BigUint;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::pool::serialize_biguint;

const READ_RETRY_INITIAL_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub selector: SelectorConfig,
    /// Upper bound on backoff retries of a single state read.
    pub state_read_max_elapsed: Duration,
    pub tick_spacing: i32,
    pub liquidity_window_steps: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            selector: SelectorConfig::default(),
            state_read_max_elapsed: Duration::from_secs(30),
            tick_spacing: 60,
            liquidity_window_steps: 20,
        }
    }
}

impl From<&Config> for MonitorConfig {
    fn from(config: &Config) -> Self {
        Self {
            selector: config.selector(),
            state_read_max_elapsed: config.state_read_max_elapsed(),
            tick_spacing: config.tick_spacing,
            liquidity_window_steps: config.liquidity_window_steps,
        }
    }
}

/// Result of a correction attempt that got past sizing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CycleOutcome {
    /// Single-step correction settled.
    #[serde(rename_all = "camelCase")]
    Confirmed {
        params: ExecutionParams,
        submission: Submission,
    },
    /// First step settled; the redemption waits for finalization.
    #[serde(rename_all = "camelCase")]
    Queued {
        params: ExecutionParams,
        submission: Submission,
        finalization: PendingFinalization,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        kind: String,
        reason: String,
        tx_ref: Option<TxRef>,
    },
    /// Not attempted.
    Skipped { reason: String },
}

impl CycleOutcome {
    fn from_error(err: &CycleError) -> Self {
        CycleOutcome::Failed {
            kind: err.kind().to_string(),
            reason: err.to_string(),
            tx_ref: err.tx_ref().cloned(),
        }
    }

    pub fn tx_ref(&self) -> Option<&TxRef> {
        match self {
            CycleOutcome::Confirmed { submission, .. } | CycleOutcome::Queued { submission, .. } => {
                Some(&submission.tx_ref)
            }
            CycleOutcome::Failed { tx_ref, .. } => tx_ref.as_ref(),
            CycleOutcome::Skipped { .. } => None,
        }
    }
}

/// What `trigger_check` did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum CheckReport {
    NoOpportunity {
        evaluation: Evaluation,
    },
    #[serde(rename_all = "camelCase")]
    Opportunity {
        evaluation: Evaluation,
        outcome: CycleOutcome,
        ledger_entry: Option<LedgerEntry>,
    },
    /// Another cycle was in flight; this trigger was dropped.
    Busy { state: DriverState },
}

/// Pool overview with the liquidity window around the current tick.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolView {
    pub pool: PoolState,
    pub reference_price: TargetPrice,
    #[serde(serialize_with = "serialize_biguint")]
    pub price_now_e18: BigUint,
    pub tick_spacing: i32,
    /// Token amounts backing the active liquidity over the current band.
    #[serde(serialize_with = "serialize_biguint")]
    pub band_amount0: BigUint,
    #[serde(serialize_with = "serialize_biguint")]
    pub band_amount1: BigUint,
    pub bands: Vec<LiquidityBand>,
}

/// Event-driven correction loop for one pool.
#[derive(Clone)]
pub struct Monitor {
    reader: Arc<dyn StateReader>,
    executor: Arc<dyn Executor>,
    ledger: BalanceLedger,
    finalizer: Finalizer,
    driver: ExecutionDriver,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(
        reader: Arc<dyn StateReader>,
        executor: Arc<dyn Executor>,
        ledger: BalanceLedger,
        finalizer: Finalizer,
        config: MonitorConfig,
    ) -> Self {
        Self {
            reader,
            executor,
            ledger,
            finalizer,
            driver: ExecutionDriver::new(),
            config,
        }
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn finalizer(&self) -> &Finalizer {
        &self.finalizer
    }

    pub fn driver_state(&self) -> DriverState {
        self.driver.state()
    }

    /// Validated chain event in, one check out. Dropped when a cycle is in flight.
    pub async fn handle_event(&self, event: ChainEvent) -> Result<CheckReport, CycleError> {
        debug!(block = event.block_number(), ?event, "Chain event received");
        self.trigger_check().await
    }

    /// Run one full cycle against freshly read state.
    ///
    /// # Errors
    /// Read failures (after backoff) and sizing faults abort the cycle and are returned;
    /// submission-phase failures are reported in the outcome and recorded in the ledger.
    pub async fn trigger_check(&self) -> Result<CheckReport, CycleError> {
        let Some(guard) = self.driver.try_begin() else {
            let state = self.driver.state();
            info!(state = state.as_str(), "Correction in flight, trigger dropped");
            return Ok(CheckReport::Busy { state });
        };

        let pool = self
            .read_with_backoff("pool state", || self.reader.read_pool_state())
            .await
            .inspect_err(|e| warn!(error = %e, "Cycle aborted: pool state unavailable"))?;
        let target = self
            .read_with_backoff("reference price", || self.reader.read_reference_price())
            .await
            .inspect_err(|e| warn!(error = %e, "Cycle aborted: reference price unavailable"))?;

        let evaluation = evaluate(&pool, &target, self.config.selector.trigger_bps)
            .map_err(CycleError::from)
            .inspect_err(|e| error!(kind = e.kind(), error = %e, "Sizing failed"))?;
        info!(
            deviation_bps = evaluation.deviation_bps,
            triggered = evaluation.triggered,
            price_now = %evaluation.price_now_e18,
            target = %evaluation.target_price_e18,
            "Deviation checked"
        );

        let Some(sizing) = evaluation.sizing().cloned() else {
            return Ok(CheckReport::NoOpportunity { evaluation });
        };
        info!(
            direction = sizing.direction.as_str(),
            amount_in = %sizing.amount_in,
            amount_out = %sizing.amount_out,
            sqrt_price_post = %sizing.sqrt_price_post,
            "Correction sized"
        );

        if sizing.direction.is_two_phase() && self.finalizer.has_open().await? {
            warn!("Redemption still awaiting finalization, push-up correction skipped");
            return Ok(CheckReport::Opportunity {
                evaluation,
                outcome: CycleOutcome::Skipped {
                    reason: "redemption awaiting finalization".to_string(),
                },
                ledger_entry: None,
            });
        }

        let outcome = match self.attempt(&guard, &sizing).await {
            Ok(outcome) => outcome,
            Err(err) => {
                match &err {
                    CycleError::DeadlineExpired { .. } | CycleError::StateReadFailure(_) => {
                        warn!(kind = err.kind(), error = %err, "Correction aborted before submission")
                    }
                    _ => error!(kind = err.kind(), error = %err, "Correction failed"),
                }
                CycleOutcome::from_error(&err)
            }
        };

        let ledger_entry = match self
            .record_snapshot(outcome.tx_ref().cloned(), Some(sizing.direction))
            .await
        {
            Ok(entry) => Some(entry),
            Err(err) => {
                error!(error = %err, "Ledger snapshot after cycle failed");
                None
            }
        };

        drop(guard);
        Ok(CheckReport::Opportunity {
            evaluation,
            outcome,
            ledger_entry,
        })
    }

    async fn attempt(
        &self,
        guard: &CycleGuard,
        sizing: &TradeSizing,
    ) -> Result<CycleOutcome, CycleError> {
        let chain_now = self
            .executor
            .chain_time()
            .await
            .map_err(CycleError::StateReadFailure)?;
        let expected_intermediate = match sizing.direction {
            Direction::ZeroForOne => Some(
                self.read_with_backoff("mint preview", || {
                    self.reader.preview_mint(&sizing.amount_in)
                })
                .await?,
            ),
            Direction::OneForZero => None,
        };
        let params = build_params(
            sizing,
            &self.config.selector,
            chain_now,
            expected_intermediate.as_ref(),
        )?;

        guard.transition(DriverState::Submitting);
        let call = ExecutionCall::Correct(params.clone());
        let submission = submit_call(self.executor.as_ref(), &call).await?;
        info!(
            tx_ref = %submission.tx_ref,
            gas_used = submission.gas_used,
            block = submission.block_number,
            "Correction confirmed"
        );

        if !sizing.direction.is_two_phase() {
            return Ok(CycleOutcome::Confirmed { params, submission });
        }

        guard.transition(DriverState::Queued);
        let record = self
            .finalizer
            .queue(
                Some(submission.tx_ref.clone()),
                Amount::from_unsigned(&sizing.amount_in),
                Amount::from_unsigned(&sizing.amount_out),
                TimeMs::now(),
            )
            .await
            .map_err(|e| CycleError::QueuePersistFailed {
                tx_ref: submission.tx_ref.clone(),
                reason: e.to_string(),
            })?;

        let finalization = if self.finalizer.delay().is_zero() {
            guard.transition(DriverState::Completing);
            match self.finalizer.complete(record.id).await {
                Ok(done) => done,
                // left failed on the record for an operator retry
                Err(e) => {
                    warn!(id = record.id, kind = e.kind(), error = %e, "Inline finalization did not complete");
                    self
                    .finalizer
                    .list()
                    .await?
                    .into_iter()
                    .find(|r| r.id == record.id)
                    .unwrap_or(record)
                }
            }
        } else {
            self.finalizer.schedule(&record);
            record
        };

        Ok(CycleOutcome::Queued {
            params,
            submission,
            finalization,
        })
    }

    /// Value current holdings at the reference price and append them to the ledger.
    ///
    /// # Errors
    /// Returns an error if a read or the append fails.
    pub async fn record_snapshot(
        &self,
        tx_ref: Option<TxRef>,
        direction: Option<Direction>,
    ) -> Result<LedgerEntry, CycleError> {
        let raw = self.value_holdings(tx_ref, direction).await?;
        Ok(self.ledger.append(raw).await?)
    }

    /// Fix the ledger's starting balance from the current valuation, without an entry.
    /// Returns `None` when the log already has one.
    ///
    /// # Errors
    /// Returns an error if a read or the header write fails.
    pub async fn open_ledger(&self) -> Result<Option<Amount>, CycleError> {
        let raw = self.value_holdings(None, None).await?;
        let opened = self.ledger.open_with(raw.total_value.clone()).await?;
        Ok(opened.then_some(raw.total_value))
    }

    async fn value_holdings(
        &self,
        tx_ref: Option<TxRef>,
        direction: Option<Direction>,
    ) -> Result<RawSnapshot, CycleError> {
        let (balance0, balance1) = self
            .read_with_backoff("balances", || self.reader.read_balances())
            .await?;
        let target = self
            .read_with_backoff("reference price", || self.reader.read_reference_price())
            .await?;
        let pool = self
            .read_with_backoff("pool state", || self.reader.read_pool_state())
            .await?;

        let snapshot = BalanceSnapshot {
            balance_token0: balance0,
            balance_token1: balance1,
            share_price_e18: target.0,
        };
        Ok(snapshot_to_raw(
            &snapshot,
            TimeMs::now(),
            tx_ref,
            direction,
            pool.token0_decimals,
            pool.token1_decimals,
        ))
    }

    /// Pool state plus the liquidity table around the current tick.
    ///
    /// # Errors
    /// Returns an error if a read fails or the tick math rejects the window.
    pub async fn pool_view(&self) -> Result<PoolView, CycleError> {
        let pool = self
            .read_with_backoff("pool state", || self.reader.read_pool_state())
            .await?;
        let reference_price = self
            .read_with_backoff("reference price", || self.reader.read_reference_price())
            .await?;

        let spacing = self.config.tick_spacing;
        let steps = self.config.liquidity_window_steps;
        let ticks = math::window_ticks(pool.tick, spacing, steps)?;
        let tick_liquidity = self
            .read_with_backoff("tick liquidity", || self.reader.read_tick_liquidity(&ticks))
            .await?;
        let bands = math::liquidity_window(
            pool.active_liquidity,
            pool.tick,
            spacing,
            steps,
            &tick_liquidity,
            pool.token0_decimals,
            pool.token1_decimals,
        )?;

        let lower = pool.tick.div_euclid(spacing) * spacing;
        let upper = (lower + spacing).min(math::MAX_TICK);
        let (band_amount0, band_amount1) = math::position_amounts(
            pool.active_liquidity,
            pool.tick,
            &pool.sqrt_price_x96,
            lower,
            upper,
        )?;
        let price_now_e18 = math::sqrt_x96_to_price(
            &pool.sqrt_price_x96,
            pool.token0_decimals,
            pool.token1_decimals,
        );

        Ok(PoolView {
            pool,
            reference_price,
            price_now_e18,
            tick_spacing: spacing,
            band_amount0,
            band_amount1,
            bands,
        })
    }

    async fn read_with_backoff<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, CycleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DataSourceError>>,
    {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(READ_RETRY_INITIAL_MS),
            max_elapsed_time: Some(self.config.state_read_max_elapsed),
            ..Default::default()
        };
        retry(policy, || {
            let read = op();
            async move {
                read.await.map_err(|e| {
                    if e.is_transient() {
                        warn!(read = what, error = %e, "Transient read failure, backing off");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
        .map_err(CycleError::StateReadFailure)
    }
}
