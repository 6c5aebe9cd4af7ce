//! Admin pipeline endpoint
//!
//! `POST /api/punch-list/process` runs one orchestrator action;
//! `GET /api/punch-list/process?action=` serves read-only diagnostics.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::get,
    Extension, Json, Router,
};
use rav_common::config::StageLimits;
use rav_common::time::now_db_string;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::auth::{require_admin, Caller};
use super::health::health_report;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{PipelineAction, TriggerSource};
use crate::services::{ActionReport, ActionRequest};
use crate::AppState;

/// Number of runs listed by the `status` diagnostic
const RECENT_RUNS: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub action: String,
    #[serde(default)]
    pub voice_message_id: Option<i64>,
    #[serde(default)]
    pub limits: Option<LimitOverrides>,
}

/// Per-request limit overrides; unset fields keep the configured default
#[derive(Debug, Default, Deserialize)]
pub struct LimitOverrides {
    pub transcriptions: Option<u32>,
    pub extractions: Option<u32>,
    pub assignments: Option<u32>,
    pub sms: Option<u32>,
    pub reminders: Option<u32>,
}

impl LimitOverrides {
    pub fn apply(&self, base: StageLimits) -> StageLimits {
        StageLimits {
            transcriptions: self.transcriptions.unwrap_or(base.transcriptions),
            extractions: self.extractions.unwrap_or(base.extractions),
            assignments: self.assignments.unwrap_or(base.assignments),
            sms: self.sms.unwrap_or(base.sms),
            reminders: self.reminders.unwrap_or(base.reminders),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub action: PipelineAction,
    pub run_id: String,
    pub duration_ms: u64,
    pub results: ActionReport,
    pub timestamp: String,
}

/// POST /api/punch-list/process
pub async fn run_action(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Result<Json<ProcessRequest>, JsonRejection>,
) -> ApiResult<Json<ProcessResponse>> {
    require_admin(&caller)?;

    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let action: PipelineAction = request
        .action
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Unknown action: {}", request.action)))?;

    let limits = request
        .limits
        .as_ref()
        .map(|overrides| overrides.apply(state.config.pipeline.default_limits))
        .unwrap_or(state.config.pipeline.default_limits);

    info!(%action, voice_message_id = ?request.voice_message_id, "Admin pipeline action requested");

    let outcome = state
        .pipeline
        .run(ActionRequest {
            action,
            trigger: TriggerSource::Admin,
            limits,
            voice_message_id: request.voice_message_id,
        })
        .await?;

    Ok(Json(ProcessResponse {
        success: true,
        action: outcome.action,
        run_id: outcome.run_id,
        duration_ms: outcome.duration_ms,
        results: outcome.report,
        timestamp: now_db_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DiagnosticsQuery {
    pub action: Option<String>,
}

/// GET /api/punch-list/process?action=status|extraction_stats|assignment_stats|health
pub async fn diagnostics(
    State(state): State<AppState>,
    Query(query): Query<DiagnosticsQuery>,
) -> ApiResult<Json<Value>> {
    let action = query.action.as_deref().unwrap_or("status");

    let data = match action {
        "status" => json!({
            "counts": db::stats::status_counts(&state.db).await?,
            "recent_runs": db::runs::list_recent(&state.db, RECENT_RUNS).await?,
        }),
        "extraction_stats" => json!(db::stats::extraction_stats(&state.db).await?),
        "assignment_stats" => json!(db::stats::assignment_stats(&state.db).await?),
        "health" => json!(health_report(&state).await),
        other => return Err(ApiError::BadRequest(format!("Unknown action: {}", other))),
    };

    Ok(Json(json!({
        "success": true,
        "action": action,
        "data": data,
        "timestamp": now_db_string(),
    })))
}

pub fn process_routes() -> Router<AppState> {
    Router::new().route("/api/punch-list/process", get(diagnostics).post(run_action))
}
