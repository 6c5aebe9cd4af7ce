//! Aggregate counts for the diagnostics endpoint

use rav_common::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

/// `SELECT column, COUNT(*) ... GROUP BY column` for a fixed table/column pair
async fn count_grouped(
    pool: &SqlitePool,
    table: &'static str,
    column: &'static str,
) -> Result<BTreeMap<String, i64>> {
    let sql = format!(
        "SELECT COALESCE({col}, 'unknown') AS k, COUNT(*) AS n FROM {table} GROUP BY k",
        col = column,
        table = table
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut counts = BTreeMap::new();
    for row in rows {
        counts.insert(row.try_get::<String, _>("k")?, row.try_get::<i64, _>("n")?);
    }
    Ok(counts)
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCounts {
    pub voice_messages: BTreeMap<String, i64>,
    pub extraction_runs: BTreeMap<String, i64>,
    pub punch_list_items: BTreeMap<String, i64>,
    pub assignment_responses: BTreeMap<String, i64>,
    pub assignment_delivery: BTreeMap<String, i64>,
    pub pipeline_jobs: BTreeMap<String, i64>,
}

pub async fn status_counts(pool: &SqlitePool) -> Result<StatusCounts> {
    Ok(StatusCounts {
        voice_messages: count_grouped(pool, "voice_messages", "status").await?,
        extraction_runs: count_grouped(pool, "extraction_runs", "status").await?,
        punch_list_items: count_grouped(pool, "punch_list_items", "status").await?,
        assignment_responses: count_grouped(pool, "punch_list_assignments", "contractor_response")
            .await?,
        assignment_delivery: count_grouped(pool, "punch_list_assignments", "delivery_status")
            .await?,
        pipeline_jobs: count_grouped(pool, "pipeline_jobs", "status").await?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionStats {
    pub runs_by_status: BTreeMap<String, i64>,
    pub items_by_trade: BTreeMap<String, i64>,
    pub items_by_priority: BTreeMap<String, i64>,
    pub total_items: i64,
    pub avg_items_per_message: f64,
}

pub async fn extraction_stats(pool: &SqlitePool) -> Result<ExtractionStats> {
    let items_by_trade = count_grouped(pool, "punch_list_items", "trade_category").await?;
    let total_items = items_by_trade.values().sum();

    let avg: Option<f64> = sqlx::query_scalar(
        "SELECT AVG(item_count) FROM extraction_runs WHERE status = 'completed'",
    )
    .fetch_one(pool)
    .await?;

    Ok(ExtractionStats {
        runs_by_status: count_grouped(pool, "extraction_runs", "status").await?,
        items_by_trade,
        items_by_priority: count_grouped(pool, "punch_list_items", "priority").await?,
        total_items,
        avg_items_per_message: avg.unwrap_or(0.0),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentStats {
    pub by_response: BTreeMap<String, i64>,
    pub by_method: BTreeMap<String, i64>,
    pub by_delivery_status: BTreeMap<String, i64>,
    pub total: i64,
    pub reminders_sent: i64,
    /// Share of answered assignments that were accepted or completed
    pub acceptance_rate: Option<f64>,
}

pub async fn assignment_stats(pool: &SqlitePool) -> Result<AssignmentStats> {
    let by_response = count_grouped(pool, "punch_list_assignments", "contractor_response").await?;
    let total = by_response.values().sum();

    let reminders_sent: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(reminder_count), 0) FROM punch_list_assignments")
            .fetch_one(pool)
            .await?;

    let positive = by_response.get("accepted").copied().unwrap_or(0)
        + by_response.get("completed").copied().unwrap_or(0);
    let answered = positive + by_response.get("declined").copied().unwrap_or(0);
    let acceptance_rate = if answered > 0 {
        Some(positive as f64 / answered as f64)
    } else {
        None
    };

    Ok(AssignmentStats {
        by_method: count_grouped(pool, "punch_list_assignments", "assignment_method").await?,
        by_delivery_status: count_grouped(pool, "punch_list_assignments", "delivery_status")
            .await?,
        by_response,
        total,
        reminders_sent,
        acceptance_rate,
    })
}

/// Cheap connectivity check
pub async fn ping(pool: &SqlitePool) -> bool {
    sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await.is_ok()
}
