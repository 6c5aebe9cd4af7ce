//! Scheduler entry point
//!
//! `POST /api/cron/punch-list` authenticates with the shared cron secret
//! before the body is even parsed, then runs with the fixed cron limits.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    routing::post,
    Json, Router,
};
use rav_common::api::auth::validate_cron_secret;
use rav_common::config::StageLimits;
use rav_common::time::now_db_string;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::models::{PipelineAction, TriggerSource};
use crate::services::{ActionReport, ActionRequest};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
struct CronRequest {
    action: Option<String>,
    voice_message_id: Option<i64>,
}

/// Counts for one stage of a cron run
#[derive(Debug, Serialize)]
pub struct CronStageCounts {
    pub stage: &'static str,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CronResponse {
    pub success: bool,
    pub action: PipelineAction,
    pub run_id: String,
    pub stages: Vec<CronStageCounts>,
    pub duration_ms: u64,
    pub timestamp: String,
}

fn stage_counts(report: &ActionReport) -> Vec<CronStageCounts> {
    let stages = match report {
        ActionReport::Stage(stage) => std::slice::from_ref(stage),
        ActionReport::Pipeline(pipeline) => pipeline.stages.as_slice(),
    };
    stages
        .iter()
        .map(|s| CronStageCounts {
            stage: s.stage,
            processed: s.processed,
            skipped: s.skipped,
            errors: s.errors,
            stage_error: s.stage_error.clone(),
        })
        .collect()
}

/// POST /api/cron/punch-list
pub async fn run_cron(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<CronResponse>> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    validate_cron_secret(header, state.config.auth.cron_secret.as_deref()).map_err(|e| {
        warn!(error = %e, "Rejected cron request");
        ApiError::Unauthorized
    })?;

    let request: CronRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CronRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?
    };

    let action = match request.action.as_deref() {
        None => PipelineAction::ProcessPipeline,
        Some(text) => text
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Unknown action: {}", text)))?,
    };

    let outcome = state
        .pipeline
        .run(ActionRequest {
            action,
            trigger: TriggerSource::Cron,
            limits: StageLimits::CRON,
            voice_message_id: request.voice_message_id,
        })
        .await?;

    Ok(Json(CronResponse {
        success: true,
        action: outcome.action,
        stages: stage_counts(&outcome.report),
        run_id: outcome.run_id,
        duration_ms: outcome.duration_ms,
        timestamp: now_db_string(),
    }))
}

pub fn cron_routes() -> Router<AppState> {
    Router::new().route("/api/cron/punch-list", post(run_cron))
}
