use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::error::AppError;
use crate::orchestration::PoolView;

pub async fn get_pool(State(state): State<AppState>) -> Result<Json<PoolView>, AppError> {
    Ok(Json(state.monitor.pool_view().await?))
}
