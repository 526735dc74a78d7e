pub mod check;
pub mod finalizations;
pub mod health;
pub mod ledger;
pub mod pool;

use crate::orchestration::Monitor;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub monitor: Monitor,
}

impl AppState {
    pub fn new(monitor: Monitor) -> Self {
        Self { monitor }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/check", post(check::post_check))
        .route("/v1/events", post(check::post_event))
        .route("/v1/summary", get(ledger::get_summary))
        .route("/v1/entries", get(ledger::get_entries))
        .route("/v1/ledger.csv", get(ledger::get_ledger_csv))
        .route("/v1/ledger/reset", post(ledger::post_reset))
        .route("/v1/pool", get(pool::get_pool))
        .route("/v1/finalizations", get(finalizations::get_finalizations))
        .route(
            "/v1/finalizations/:id/retry",
            post(finalizations::post_retry),
        )
        .layer(cors)
        .with_state(state)
}
