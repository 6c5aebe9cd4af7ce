//! Durable pipeline job queue

use rav_common::time::{now_db_string, to_db_string};
use rav_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{get_enum, get_time, minutes_ago};
use crate::models::{JobKind, JobStatus, PipelineJob};

fn job_from_row(row: &SqliteRow) -> Result<PipelineJob> {
    Ok(PipelineJob {
        id: row.try_get("id")?,
        kind: get_enum(row, "kind")?,
        voice_message_id: row.try_get("voice_message_id")?,
        status: get_enum(row, "status")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        run_after: get_time(row, "run_after")?,
        last_error: row.try_get("last_error")?,
        created_at: get_time(row, "created_at")?,
    })
}

pub async fn enqueue(
    pool: &SqlitePool,
    kind: JobKind,
    voice_message_id: Option<i64>,
    max_attempts: i64,
) -> Result<i64> {
    let now = now_db_string();
    let id = sqlx::query(
        r#"
        INSERT INTO pipeline_jobs
            (kind, voice_message_id, status, attempts, max_attempts, run_after, created_at, updated_at)
        VALUES (?, ?, 'queued', 0, ?, ?, ?, ?)
        "#,
    )
    .bind(kind.as_str())
    .bind(voice_message_id)
    .bind(max_attempts.max(1))
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Claim the oldest runnable job (`queued → running`, attempts + 1)
///
/// Single statement, so two workers never claim the same row.
pub async fn claim_next(pool: &SqlitePool) -> Result<Option<PipelineJob>> {
    let now = now_db_string();
    let row = sqlx::query(
        r#"
        UPDATE pipeline_jobs
        SET status = 'running', attempts = attempts + 1, claimed_at = ?, updated_at = ?
        WHERE id = (
            SELECT id FROM pipeline_jobs
            WHERE status = 'queued' AND run_after <= ?
            ORDER BY run_after, id
            LIMIT 1
        ) AND status = 'queued'
        RETURNING *
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn mark_done(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pipeline_jobs SET status = 'done', last_error = NULL, claimed_at = NULL, updated_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(now_db_string())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Requeue a failed job after `backoff_secs * attempts`, or fail it for good
/// once its attempts are used up. Returns the resulting status.
pub async fn mark_retry_or_failed(
    pool: &SqlitePool,
    id: i64,
    error: &str,
    backoff_secs: u64,
) -> Result<JobStatus> {
    let job = match get_job(pool, id).await? {
        Some(job) => job,
        None => return Ok(JobStatus::Failed),
    };

    let now = chrono::Utc::now();
    let (status, run_after) = if job.attempts >= job.max_attempts {
        (JobStatus::Failed, now)
    } else {
        let delay = backoff_secs.saturating_mul(job.attempts.max(1) as u64);
        (JobStatus::Queued, now + chrono::Duration::seconds(delay as i64))
    };

    sqlx::query(
        r#"
        UPDATE pipeline_jobs
        SET status = ?, run_after = ?, last_error = ?, claimed_at = NULL, updated_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(status.as_str())
    .bind(to_db_string(run_after))
    .bind(error)
    .bind(to_db_string(now))
    .bind(id)
    .execute(pool)
    .await?;

    Ok(status)
}

pub async fn get_job(pool: &SqlitePool, id: i64) -> Result<Option<PipelineJob>> {
    let row = sqlx::query("SELECT * FROM pipeline_jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Put jobs left `running` by a crashed worker back in the queue
pub async fn release_stale(pool: &SqlitePool, older_than_minutes: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_jobs SET status = 'queued', claimed_at = NULL, updated_at = ?
        WHERE status = 'running' AND claimed_at < ?
        "#,
    )
    .bind(now_db_string())
    .bind(minutes_ago(older_than_minutes))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
