//! Pipeline run history

use rav_common::time::now_db_string;
use rav_common::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::models::{PipelineAction, TriggerSource};

/// Summary row for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub trigger: String,
    pub action: String,
    pub success: bool,
    pub duration_ms: Option<i64>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

pub async fn record_start(
    pool: &SqlitePool,
    run_id: &str,
    trigger: TriggerSource,
    action: PipelineAction,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_runs (run_id, trigger, action, success, started_at)
        VALUES (?, ?, ?, 0, ?)
        "#,
    )
    .bind(run_id)
    .bind(trigger.as_str())
    .bind(action.as_str())
    .bind(now_db_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_finish(
    pool: &SqlitePool,
    run_id: &str,
    success: bool,
    duration_ms: i64,
    report: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET success = ?, duration_ms = ?, report = ?, finished_at = ?
        WHERE run_id = ?
        "#,
    )
    .bind(success)
    .bind(duration_ms)
    .bind(report.to_string())
    .bind(now_db_string())
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_recent(pool: &SqlitePool, limit: u32) -> Result<Vec<RunSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT run_id, trigger, action, success, duration_ms, started_at, finished_at
        FROM pipeline_runs
        ORDER BY started_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(RunSummary {
                run_id: row.try_get("run_id")?,
                trigger: row.try_get("trigger")?,
                action: row.try_get("action")?,
                success: row.try_get("success")?,
                duration_ms: row.try_get("duration_ms")?,
                started_at: row.try_get("started_at")?,
                finished_at: row.try_get("finished_at")?,
            })
        })
        .collect()
}
