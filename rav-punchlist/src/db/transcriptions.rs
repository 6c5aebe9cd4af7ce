//! Voice transcription rows (written once, never updated)

use rav_common::time::now_db_string;
use rav_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::get_time;
use crate::models::VoiceTranscription;

fn transcription_from_row(row: &SqliteRow) -> Result<VoiceTranscription> {
    Ok(VoiceTranscription {
        voice_message_id: row.try_get("voice_message_id")?,
        transcription_text: row.try_get("transcription_text")?,
        confidence_score: row.try_get("confidence_score")?,
        language: row.try_get("language")?,
        processing_time_ms: row.try_get("processing_time_ms")?,
        service_name: row.try_get("service_name")?,
        created_at: get_time(row, "created_at")?,
    })
}

/// Fields of a transcription before it is stored
#[derive(Debug, Clone)]
pub struct TranscriptionRecord<'a> {
    pub text: &'a str,
    pub confidence: Option<f64>,
    pub language: Option<&'a str>,
    pub processing_time_ms: i64,
    pub service_name: &'a str,
}

/// Store the transcript and move the message to `transcribed` atomically
///
/// Returns `false` (and writes nothing) if the message is no longer in
/// `transcribing`.
pub async fn complete_transcription(
    pool: &SqlitePool,
    voice_message_id: i64,
    record: &TranscriptionRecord<'_>,
) -> Result<bool> {
    let now = now_db_string();
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE voice_messages
        SET status = 'transcribed', error_message = NULL, updated_at = ?
        WHERE id = ? AND status = 'transcribing'
        "#,
    )
    .bind(&now)
    .bind(voice_message_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO voice_transcriptions
            (voice_message_id, transcription_text, confidence_score, language,
             processing_time_ms, service_name, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(voice_message_id)
    .bind(record.text)
    .bind(record.confidence)
    .bind(record.language)
    .bind(record.processing_time_ms)
    .bind(record.service_name)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

pub async fn get_transcription(
    pool: &SqlitePool,
    voice_message_id: i64,
) -> Result<Option<VoiceTranscription>> {
    let row = sqlx::query("SELECT * FROM voice_transcriptions WHERE voice_message_id = ?")
        .bind(voice_message_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(transcription_from_row).transpose()
}
