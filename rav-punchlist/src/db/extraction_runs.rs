//! Extraction claims and item creation
//!
//! A voice message is ready for extraction once it is `transcribed` and has
//! no `extraction_runs` row, or a `retry` row left by an extractor service
//! failure. Creating (or reviving) that row is the claim.

use rav_common::time::now_db_string;
use rav_common::Result;
use sqlx::{Row, SqlitePool};

use super::{minutes_ago, voice_messages::voice_message_from_row};
use crate::models::{NewPunchListItem, VoiceMessage};

/// A transcribed message waiting for extraction
#[derive(Debug, Clone)]
pub struct ExtractionCandidate {
    pub message: VoiceMessage,
    pub transcript: String,
}

pub async fn list_ready(
    pool: &SqlitePool,
    limit: u32,
    only_id: Option<i64>,
) -> Result<Vec<ExtractionCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT vm.*, t.transcription_text AS transcript
        FROM voice_messages vm
        JOIN voice_transcriptions t ON t.voice_message_id = vm.id
        LEFT JOIN extraction_runs r ON r.voice_message_id = vm.id
        WHERE vm.status = 'transcribed'
          AND (r.voice_message_id IS NULL OR r.status = 'retry')
          AND (? IS NULL OR vm.id = ?)
        ORDER BY vm.created_at, vm.id
        LIMIT ?
        "#,
    )
    .bind(only_id)
    .bind(only_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(ExtractionCandidate {
                message: voice_message_from_row(row)?,
                transcript: row.try_get("transcript")?,
            })
        })
        .collect()
}

/// Claim a message for extraction
pub async fn claim(pool: &SqlitePool, voice_message_id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO extraction_runs (voice_message_id, status, started_at)
        VALUES (?, 'running', ?)
        ON CONFLICT (voice_message_id) DO UPDATE
        SET status = 'running', started_at = excluded.started_at, finished_at = NULL
        WHERE extraction_runs.status = 'retry'
        "#,
    )
    .bind(voice_message_id)
    .bind(now_db_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Insert extracted items and close the run in one transaction
///
/// Returns the new item ids, or `None` if the claim was lost in the
/// meantime (nothing is written in that case).
pub async fn complete_with_items(
    pool: &SqlitePool,
    voice_message_id: i64,
    items: &[NewPunchListItem],
    service_name: &str,
) -> Result<Option<Vec<i64>>> {
    let now = now_db_string();
    let mut tx = pool.begin().await?;

    let closed = sqlx::query(
        r#"
        UPDATE extraction_runs
        SET status = 'completed', item_count = ?, service_name = ?, finished_at = ?
        WHERE voice_message_id = ? AND status = 'running'
        "#,
    )
    .bind(items.len() as i64)
    .bind(service_name)
    .bind(&now)
    .bind(voice_message_id)
    .execute(&mut *tx)
    .await?;

    if closed.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let id = sqlx::query(
            r#"
            INSERT INTO punch_list_items
                (project_id, voice_message_id, description, room, trade_category, priority,
                 estimated_hours, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'extracted', ?, ?)
            "#,
        )
        .bind(item.project_id)
        .bind(item.voice_message_id)
        .bind(&item.description)
        .bind(&item.room)
        .bind(&item.trade_category)
        .bind(item.priority.as_str())
        .bind(item.estimated_hours)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        ids.push(id);
    }

    tx.commit().await?;
    Ok(Some(ids))
}

pub async fn mark_failed(pool: &SqlitePool, voice_message_id: i64, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE extraction_runs
        SET status = 'failed', error_message = ?, finished_at = ?
        WHERE voice_message_id = ? AND status = 'running'
        "#,
    )
    .bind(error)
    .bind(now_db_string())
    .bind(voice_message_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Close a run after a retryable extractor failure
///
/// The message becomes ready again until `max_attempts` runs have failed,
/// then the run is `failed` for good. Returns `true` if it will be retried.
pub async fn mark_retry_or_failed(
    pool: &SqlitePool,
    voice_message_id: i64,
    error: &str,
    max_attempts: i64,
) -> Result<bool> {
    let status: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE extraction_runs
        SET attempts = attempts + 1,
            status = CASE WHEN attempts + 1 >= ? THEN 'failed' ELSE 'retry' END,
            error_message = ?, finished_at = ?
        WHERE voice_message_id = ? AND status = 'running'
        RETURNING status
        "#,
    )
    .bind(max_attempts)
    .bind(error)
    .bind(now_db_string())
    .bind(voice_message_id)
    .fetch_optional(pool)
    .await?;
    Ok(status.as_deref() == Some("retry"))
}

/// Drop abandoned `running` claims so the message becomes ready again
pub async fn release_stale_claims(pool: &SqlitePool, older_than_minutes: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM extraction_runs WHERE status = 'running' AND started_at < ?",
    )
    .bind(minutes_ago(older_than_minutes))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
