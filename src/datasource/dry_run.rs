//! Executor that sizes and logs corrections but never broadcasts them.

use super::{DataSourceError, ExecutionCall, Executor, Receipt, StateReader};
use crate::domain::{ChainTime, TxRef};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Gas reported for every call.
pub const DRY_RUN_GAS_ESTIMATE: u64 = 500_000;

#[derive(Debug, Clone)]
pub struct DryRunExecutor {
    reader: Arc<dyn StateReader>,
}

impl DryRunExecutor {
    pub fn new(reader: Arc<dyn StateReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    async fn chain_time(&self) -> Result<ChainTime, DataSourceError> {
        self.reader.chain_time().await
    }

    async fn estimate(&self, _call: &ExecutionCall) -> Result<u64, DataSourceError> {
        Ok(DRY_RUN_GAS_ESTIMATE)
    }

    async fn submit(&self, call: &ExecutionCall, gas_limit: u64) -> Result<TxRef, DataSourceError> {
        info!(call = call.label(), gas_limit, "Dry run, not submitting");
        Err(DataSourceError::Rejected("dry run".to_string()))
    }

    async fn await_receipt(&self, pending: &TxRef) -> Result<Receipt, DataSourceError> {
        Err(DataSourceError::Other(format!(
            "dry run never submits, no receipt for {}",
            pending
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockStateReader;

    #[tokio::test]
    async fn test_dry_run_rejects_submission() {
        let reader = Arc::new(MockStateReader::new().with_chain_time(ChainTime::new(42)));
        let exec = DryRunExecutor::new(reader);
        assert_eq!(exec.chain_time().await.unwrap(), ChainTime::new(42));

        let call = ExecutionCall::CompleteRedemption { finalization_id: 1 };
        assert_eq!(exec.estimate(&call).await.unwrap(), DRY_RUN_GAS_ESTIMATE);
        let err = exec.submit(&call, 1).await.unwrap_err();
        assert_eq!(err, DataSourceError::Rejected("dry run".to_string()));
    }
}
