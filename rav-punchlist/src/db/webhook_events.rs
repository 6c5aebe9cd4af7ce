//! Audit log of inbound webhook payloads

use rav_common::time::now_db_string;
use rav_common::Result;
use sqlx::SqlitePool;

pub async fn record(
    pool: &SqlitePool,
    source: &str,
    event_type: Option<&str>,
    external_id: Option<&str>,
    payload: &str,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO webhook_events (source, event_type, external_id, payload, received_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(source)
    .bind(event_type)
    .bind(external_id)
    .bind(payload)
    .bind(now_db_string())
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn set_outcome(pool: &SqlitePool, id: i64, outcome: &str) -> Result<()> {
    sqlx::query("UPDATE webhook_events SET outcome = ? WHERE id = ?")
        .bind(outcome)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM webhook_events")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
