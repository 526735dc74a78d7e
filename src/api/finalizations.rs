use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::domain::PendingFinalization;
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizationsResponse {
    pub finalizations: Vec<PendingFinalization>,
}

pub async fn get_finalizations(
    State(state): State<AppState>,
) -> Result<Json<FinalizationsResponse>, AppError> {
    let finalizations = state.monitor.finalizer().list().await?;
    Ok(Json(FinalizationsResponse { finalizations }))
}

/// Operator retry of a failed finalization.
pub async fn post_retry(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<PendingFinalization>, AppError> {
    Ok(Json(state.monitor.finalizer().retry(id).await?))
}
