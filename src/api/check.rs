use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::domain::ChainEvent;
use crate::error::AppError;
use crate::orchestration::CheckReport;

pub async fn post_check(State(state): State<AppState>) -> Result<Json<CheckReport>, AppError> {
    Ok(Json(state.monitor.trigger_check().await?))
}

/// Validate a raw chain event at the boundary, then run a check for it.
pub async fn post_event(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<CheckReport>, AppError> {
    let event = ChainEvent::from_json(&payload).map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(Json(state.monitor.handle_event(event).await?))
}
