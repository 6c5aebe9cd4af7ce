//! Manual review surface for punch-list items

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use rav_common::time::now_db_string;
use serde::{Deserialize, Serialize};

use super::auth::{require_admin, Caller};
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::services::assignment::{self, CandidateView, ManualAssignOutcome};
use crate::AppState;

const DEFAULT_CANDIDATES: usize = 5;
const MAX_CANDIDATES: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CandidatesQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CandidatesResponse {
    pub success: bool,
    pub item_id: i64,
    pub candidates: Vec<CandidateView>,
    pub timestamp: String,
}

/// GET /api/punch-list/items/:id/candidates?limit=N
pub async fn list_candidates(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Query(query): Query<CandidatesQuery>,
) -> ApiResult<Json<CandidatesResponse>> {
    let item = db::items::get_item(&state.db, item_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Punch list item {}", item_id)))?;

    let limit = query.limit.unwrap_or(DEFAULT_CANDIDATES).clamp(1, MAX_CANDIDATES);
    let candidates = assignment::top_candidates(&state.db, &item, limit).await?;

    Ok(Json(CandidatesResponse {
        success: true,
        item_id,
        candidates,
        timestamp: now_db_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ManualAssignRequest {
    pub contractor_id: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ManualAssignResponse {
    pub success: bool,
    pub item_id: i64,
    pub assignment_id: i64,
    pub timestamp: String,
}

/// POST /api/punch-list/items/:id/assign
pub async fn assign_item(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(item_id): Path<i64>,
    body: Result<Json<ManualAssignRequest>, JsonRejection>,
) -> ApiResult<Json<ManualAssignResponse>> {
    require_admin(&caller)?;
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let outcome = assignment::assign_manually(
        &state.db,
        item_id,
        request.contractor_id,
        request.reason.as_deref(),
    )
    .await?;

    match outcome {
        ManualAssignOutcome::Assigned { assignment_id } => Ok(Json(ManualAssignResponse {
            success: true,
            item_id,
            assignment_id,
            timestamp: now_db_string(),
        })),
        ManualAssignOutcome::AlreadyAssigned => Err(ApiError::Conflict(format!(
            "Item {} already has an active assignment",
            item_id
        ))),
    }
}

pub fn item_routes() -> Router<AppState> {
    Router::new()
        .route("/api/punch-list/items/:id/candidates", get(list_candidates))
        .route("/api/punch-list/items/:id/assign", post(assign_item))
}
