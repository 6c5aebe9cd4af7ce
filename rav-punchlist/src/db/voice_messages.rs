//! Voice message persistence and status claims

use rav_common::time::now_db_string;
use rav_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{get_enum, get_time, minutes_ago};
use crate::models::{NewVoiceMessage, VoiceMessage, VoiceMessageStatus};

pub(crate) fn voice_message_from_row(row: &SqliteRow) -> Result<VoiceMessage> {
    Ok(VoiceMessage {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        sender_id: row.try_get("sender_id")?,
        sender_phone: row.try_get("sender_phone")?,
        external_id: row.try_get("external_id")?,
        audio_url: row.try_get("audio_url")?,
        mime_type: row.try_get("mime_type")?,
        duration_seconds: row.try_get("duration_seconds")?,
        status: get_enum(row, "status")?,
        error_message: row.try_get("error_message")?,
        created_at: get_time(row, "created_at")?,
        updated_at: get_time(row, "updated_at")?,
    })
}

/// Store a received voice message
///
/// Returns `None` when a message with the same provider id already exists
/// (webhook redelivery).
pub async fn insert_voice_message(pool: &SqlitePool, msg: &NewVoiceMessage) -> Result<Option<i64>> {
    let now = now_db_string();

    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO voice_messages
            (project_id, sender_id, sender_phone, external_id, audio_url, mime_type,
             duration_seconds, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'received', ?, ?)
        "#,
    )
    .bind(msg.project_id)
    .bind(&msg.sender_id)
    .bind(&msg.sender_phone)
    .bind(&msg.external_id)
    .bind(&msg.audio_url)
    .bind(&msg.mime_type)
    .bind(msg.duration_seconds)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        Ok(None)
    } else {
        Ok(Some(result.last_insert_rowid()))
    }
}

pub async fn get_voice_message(pool: &SqlitePool, id: i64) -> Result<Option<VoiceMessage>> {
    let row = sqlx::query("SELECT * FROM voice_messages WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(voice_message_from_row).transpose()
}

/// Messages in `status`, oldest first, optionally restricted to one id
pub async fn list_by_status(
    pool: &SqlitePool,
    status: VoiceMessageStatus,
    limit: u32,
    only_id: Option<i64>,
) -> Result<Vec<VoiceMessage>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM voice_messages
        WHERE status = ? AND (? IS NULL OR id = ?)
        ORDER BY created_at, id
        LIMIT ?
        "#,
    )
    .bind(status.as_str())
    .bind(only_id)
    .bind(only_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(voice_message_from_row).collect()
}

/// Claim a message for transcription (`received → transcribing`)
pub async fn claim_for_transcription(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE voice_messages
        SET status = 'transcribing', error_message = NULL, updated_at = ?
        WHERE id = ? AND status = 'received'
        "#,
    )
    .bind(now_db_string())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Terminal failure (`transcribing → failed`)
pub async fn mark_failed(pool: &SqlitePool, id: i64, error: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE voice_messages
        SET status = 'failed', error_message = ?, updated_at = ?
        WHERE id = ? AND status = 'transcribing'
        "#,
    )
    .bind(error)
    .bind(now_db_string())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Release claims abandoned by a crashed or timed-out run
pub async fn release_stale_claims(pool: &SqlitePool, older_than_minutes: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE voice_messages
        SET status = 'received', updated_at = ?
        WHERE status = 'transcribing' AND updated_at < ?
        "#,
    )
    .bind(now_db_string())
    .bind(minutes_ago(older_than_minutes))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
