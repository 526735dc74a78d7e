//! Second phase of push-price-up corrections: persisted, scheduled, manually retried.

use crate::datasource::{ExecutionCall, Executor};
use crate::db::Repository;
use crate::domain::{
    Amount, FinalizationStatus, NewFinalization, PendingFinalization, PoolId, TimeMs, TxRef,
};
use crate::orchestration::driver::{submit_call, CycleError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct Finalizer {
    repo: Arc<Repository>,
    executor: Arc<dyn Executor>,
    pool_id: PoolId,
    delay: Duration,
}

impl Finalizer {
    pub fn new(
        repo: Arc<Repository>,
        executor: Arc<dyn Executor>,
        pool_id: PoolId,
        delay: Duration,
    ) -> Self {
        Self {
            repo,
            executor,
            pool_id,
            delay,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Persist a queued redemption before anything else happens to it.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn queue(
        &self,
        tx_ref: Option<TxRef>,
        amount_in: Amount,
        expected_out: Amount,
        now: TimeMs,
    ) -> Result<PendingFinalization, CycleError> {
        let delay_ms = i64::try_from(self.delay.as_millis()).unwrap_or(i64::MAX);
        let record = NewFinalization {
            pool_id: self.pool_id.clone(),
            tx_ref,
            amount_in,
            expected_out,
            queued_at: now,
            unlock_at: TimeMs::new(now.as_ms().saturating_add(delay_ms)),
        };
        let pending = self.repo.insert_pending_finalization(&record).await?;
        info!(
            id = pending.id,
            unlock_at = %pending.unlock_at.to_rfc3339(),
            "Redemption queued for finalization"
        );
        Ok(pending)
    }

    /// One completion attempt at unlock time, in the background. The handle yields the
    /// attempt's result; every failure is also logged here.
    pub fn schedule(
        &self,
        record: &PendingFinalization,
    ) -> JoinHandle<Result<PendingFinalization, CycleError>> {
        let wait = Duration::from_millis(record.wait_ms(TimeMs::now()));
        let id = record.id;
        let finalizer = self.clone();
        info!(id, wait_ms = wait.as_millis() as u64, "Finalization scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let result = finalizer.complete(id).await;
            if let Err(e) = &result {
                error!(id, error = %e, kind = e.kind(), "Scheduled finalization did not complete");
            }
            result
        })
    }

    /// Submit the completion for a pending record and persist the result.
    ///
    /// # Errors
    /// `FinalizationFailure` when the completion is rejected or reverts; the record is
    /// left `failed` for an operator retry.
    pub async fn complete(&self, id: i64) -> Result<PendingFinalization, CycleError> {
        let record = self
            .repo
            .get_finalization(id)
            .await?
            .ok_or(CycleError::FinalizationNotFound(id))?;
        if record.status != FinalizationStatus::Pending {
            warn!(id, status = %record.status, "Finalization is not pending, skipping");
            return Ok(record);
        }

        let call = ExecutionCall::CompleteRedemption { finalization_id: id };
        match submit_call(self.executor.as_ref(), &call).await {
            Ok(submission) => {
                self.repo
                    .record_finalization_attempt(
                        id,
                        FinalizationStatus::Finalized,
                        None,
                        Some(&submission.tx_ref),
                    )
                    .await?;
                info!(id, tx_ref = %submission.tx_ref, "Redemption finalized");
            }
            Err(err) => {
                let reason = err.to_string();
                self.repo
                    .record_finalization_attempt(
                        id,
                        FinalizationStatus::Failed,
                        Some(&reason),
                        err.tx_ref(),
                    )
                    .await?;
                error!(id, error = %reason, "Finalization failed, operator retry required");
                return Err(CycleError::FinalizationFailure { id, reason });
            }
        }

        self.repo
            .get_finalization(id)
            .await?
            .ok_or(CycleError::FinalizationNotFound(id))
    }

    /// Operator retry of a failed record.
    ///
    /// # Errors
    /// `FinalizationNotFound`, `FinalizationNotRetryable` for records that are not
    /// `failed`, or the outcome of the new attempt.
    pub async fn retry(&self, id: i64) -> Result<PendingFinalization, CycleError> {
        let record = self
            .repo
            .get_finalization(id)
            .await?
            .filter(|r| r.pool_id == self.pool_id)
            .ok_or(CycleError::FinalizationNotFound(id))?;
        if !self.repo.reopen_failed_finalization(id).await? {
            return Err(CycleError::FinalizationNotRetryable {
                id,
                status: record.status.to_string(),
            });
        }
        info!(id, attempts = record.attempts, "Retrying finalization");
        self.complete(id).await
    }

    /// Reschedule every pending record left behind by a previous run.
    ///
    /// # Errors
    /// Returns an error if the pending records cannot be listed.
    pub async fn resume(
        &self,
    ) -> Result<Vec<JoinHandle<Result<PendingFinalization, CycleError>>>, CycleError> {
        let pending = self
            .repo
            .list_finalizations_by_status(&self.pool_id, FinalizationStatus::Pending)
            .await?;
        if !pending.is_empty() {
            info!(count = pending.len(), "Resuming pending finalizations");
        }
        Ok(pending.iter().map(|record| self.schedule(record)).collect())
    }

    pub async fn list(&self) -> Result<Vec<PendingFinalization>, CycleError> {
        Ok(self.repo.list_finalizations(&self.pool_id).await?)
    }

    pub async fn has_open(&self) -> Result<bool, CycleError> {
        Ok(self.repo.count_open_finalizations(&self.pool_id).await? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::mock::{MockExecutor, MockOutcome};
    use crate::db::init_db;
    use tempfile::TempDir;

    async fn setup(exec: MockExecutor, delay: Duration) -> (TempDir, Finalizer, Arc<MockExecutor>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("finalizer.db").to_string_lossy().to_string();
        let repo = Arc::new(Repository::new(init_db(&path).await.unwrap()));
        let exec = Arc::new(exec);
        let pool_id = PoolId::parse(&format!("0x{}", "77".repeat(32))).unwrap();
        let finalizer = Finalizer::new(repo, exec.clone(), pool_id, delay);
        (dir, finalizer, exec)
    }

    #[tokio::test]
    async fn test_complete_marks_finalized() {
        let (_dir, finalizer, exec) = setup(MockExecutor::new(), Duration::ZERO).await;
        let record = finalizer
            .queue(None, Amount::from(10i64), Amount::from(9i64), TimeMs::new(1_000))
            .await
            .unwrap();
        assert_eq!(record.unlock_at, TimeMs::new(1_000));

        let done = finalizer.complete(record.id).await.unwrap();
        assert_eq!(done.status, FinalizationStatus::Finalized);
        assert!(done.completion_tx_ref.is_some());
        assert_eq!(exec.submit_count(), 1);
        assert!(!finalizer.has_open().await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_persisted_then_manual_retry() {
        let exec = MockExecutor::new().with_outcome(MockOutcome::Revert("not unlocked".into()));
        let (_dir, finalizer, exec) = setup(exec, Duration::ZERO).await;
        let record = finalizer
            .queue(None, Amount::from(10i64), Amount::from(9i64), TimeMs::new(0))
            .await
            .unwrap();

        let err = finalizer.complete(record.id).await.unwrap_err();
        assert!(matches!(err, CycleError::FinalizationFailure { .. }));
        let stored = &finalizer.list().await.unwrap()[0];
        assert_eq!(stored.status, FinalizationStatus::Failed);
        assert!(stored.last_error.as_deref().unwrap_or("").contains("not unlocked"));
        assert!(finalizer.has_open().await.unwrap());

        let retried = finalizer.retry(record.id).await.unwrap();
        assert_eq!(retried.status, FinalizationStatus::Finalized);
        assert_eq!(retried.attempts, 2);
        assert_eq!(exec.submit_count(), 2);

        let err = finalizer.retry(record.id).await.unwrap_err();
        assert!(matches!(err, CycleError::FinalizationNotRetryable { .. }));
        assert!(matches!(
            finalizer.retry(record.id + 50).await.unwrap_err(),
            CycleError::FinalizationNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_resume_runs_pending_records() {
        let (_dir, finalizer, exec) = setup(MockExecutor::new(), Duration::from_millis(20)).await;
        finalizer
            .queue(None, Amount::from(1i64), Amount::from(1i64), TimeMs::now())
            .await
            .unwrap();

        let handles = finalizer.resume().await.unwrap();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            let done = handle.await.unwrap().unwrap();
            assert_eq!(done.status, FinalizationStatus::Finalized);
        }
        assert_eq!(exec.submit_count(), 1);
        assert!(!finalizer.has_open().await.unwrap());
    }

    #[tokio::test]
    async fn test_scheduled_attempt_reports_missing_record() {
        let (_dir, finalizer, exec) = setup(MockExecutor::new(), Duration::ZERO).await;
        let record = finalizer
            .queue(None, Amount::from(1i64), Amount::from(1i64), TimeMs::new(0))
            .await
            .unwrap();
        let mut missing = record.clone();
        missing.id = record.id + 100;

        let err = finalizer.schedule(&missing).await.unwrap().unwrap_err();
        assert!(matches!(err, CycleError::FinalizationNotFound(id) if id == missing.id));
        assert_eq!(exec.submit_count(), 0);
        assert!(finalizer.has_open().await.unwrap());
    }

    #[tokio::test]
    async fn test_scheduled_attempt_reports_revert() {
        let exec = MockExecutor::new().with_outcome(MockOutcome::Revert("not unlocked".into()));
        let (_dir, finalizer, _exec) = setup(exec, Duration::ZERO).await;
        let record = finalizer
            .queue(None, Amount::from(1i64), Amount::from(1i64), TimeMs::new(0))
            .await
            .unwrap();

        let err = finalizer.schedule(&record).await.unwrap().unwrap_err();
        assert!(matches!(err, CycleError::FinalizationFailure { id, .. } if id == record.id));
    }
}
