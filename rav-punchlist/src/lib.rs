//! rav-punchlist library interface
//!
//! Exposes the application state and router so integration tests can drive
//! the HTTP surface without a listening socket.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use rav_common::config::AppConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::{JobQueue, PunchListPipeline};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<PunchListPipeline>,
    /// Durable queue fed by the voice webhook
    pub jobs: JobQueue,
    /// For uptime in the health report
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        config: Arc<AppConfig>,
        pipeline: Arc<PunchListPipeline>,
        jobs: JobQueue,
    ) -> Self {
        Self {
            db,
            config,
            pipeline,
            jobs,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// Admin routes sit behind the bearer-token middleware. Health, cron and
/// the webhooks authenticate themselves.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(api::process_routes())
        .merge(api::item_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_caller,
        ));

    let public = Router::new()
        .merge(api::health_routes())
        .merge(api::cron_routes())
        .merge(api::webhook_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            error::expose_internal_errors,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
