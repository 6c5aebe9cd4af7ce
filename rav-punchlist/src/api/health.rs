//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::db;
use crate::AppState;

/// Which external adapters have credentials
#[derive(Debug, Serialize)]
pub struct AdapterStatus {
    pub transcriber: bool,
    pub extractor: String,
    pub gateway: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded" (database unreachable)
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub uptime_seconds: u64,
    pub database: bool,
    pub adapters: AdapterStatus,
}

pub async fn health_report(state: &AppState) -> HealthResponse {
    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;
    let database = db::stats::ping(&state.db).await;

    HealthResponse {
        status: if database { "ok" } else { "degraded" }.to_string(),
        module: "rav-punchlist".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("RAV_GIT_HASH").to_string(),
        uptime_seconds,
        database,
        adapters: AdapterStatus {
            transcriber: state.pipeline.transcriber_configured(),
            extractor: state.pipeline.extractor_name().to_string(),
            gateway: state.pipeline.gateway_configured(),
        },
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_report(&state).await)
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
