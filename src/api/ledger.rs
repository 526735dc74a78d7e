use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::{LedgerEntry, TimeMs};
use crate::engine::Summary;
use crate::error::AppError;

const DEFAULT_ENTRIES: usize = 10;
const MAX_ENTRIES: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    pub n: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntriesResponse {
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub deleted_entries: u64,
}

pub async fn get_summary(State(state): State<AppState>) -> Json<Summary> {
    Json(state.monitor.ledger().summary(TimeMs::now()).await)
}

/// Most recent entries first.
pub async fn get_entries(
    Query(params): Query<EntriesQuery>,
    State(state): State<AppState>,
) -> Result<Json<EntriesResponse>, AppError> {
    let n = params.n.unwrap_or(DEFAULT_ENTRIES);
    if n > MAX_ENTRIES {
        return Err(AppError::BadRequest(format!("n must be at most {}", MAX_ENTRIES)));
    }
    let entries = state.monitor.ledger().recent(n).await;
    Ok(Json(EntriesResponse { entries }))
}

pub async fn get_ledger_csv(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let csv = state.monitor.ledger().export_csv().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"ledger.csv\""),
        ],
        csv,
    ))
}

pub async fn post_reset(State(state): State<AppState>) -> Result<Json<ResetResponse>, AppError> {
    let deleted_entries = state.monitor.ledger().reset(TimeMs::now()).await?;
    Ok(Json(ResetResponse { deleted_entries }))
}
