//! Punch-list item persistence

use rav_common::time::now_db_string;
use rav_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{get_enum, get_optional_time, get_time};
use crate::models::{NewPunchListItem, PunchListItem};

fn item_from_row(row: &SqliteRow) -> Result<PunchListItem> {
    Ok(PunchListItem {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        voice_message_id: row.try_get("voice_message_id")?,
        description: row.try_get("description")?,
        room: row.try_get("room")?,
        trade_category: row.try_get("trade_category")?,
        priority: get_enum(row, "priority")?,
        estimated_hours: row.try_get("estimated_hours")?,
        status: get_enum(row, "status")?,
        completed_at: get_optional_time(row, "completed_at")?,
        created_at: get_time(row, "created_at")?,
        updated_at: get_time(row, "updated_at")?,
    })
}

/// Insert a single item outside the extraction flow
pub async fn insert_item(pool: &SqlitePool, item: &NewPunchListItem) -> Result<i64> {
    let now = now_db_string();
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
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn get_item(pool: &SqlitePool, id: i64) -> Result<Option<PunchListItem>> {
    let row = sqlx::query("SELECT * FROM punch_list_items WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(item_from_row).transpose()
}

/// Items waiting for a contractor (`extracted` or `pending`)
///
/// Items never tried come first, oldest first. Parked items follow in order
/// of their last attempt, so a backlog without candidates rotates instead of
/// filling every batch.
pub async fn list_assignable(
    pool: &SqlitePool,
    limit: u32,
    only_voice_message_id: Option<i64>,
) -> Result<Vec<PunchListItem>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM punch_list_items
        WHERE status IN ('extracted', 'pending')
          AND (? IS NULL OR voice_message_id = ?)
        ORDER BY last_assign_attempt_at IS NOT NULL, last_assign_attempt_at, created_at, id
        LIMIT ?
        "#,
    )
    .bind(only_voice_message_id)
    .bind(only_voice_message_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(item_from_row).collect()
}

pub async fn list_for_voice_message(
    pool: &SqlitePool,
    voice_message_id: i64,
) -> Result<Vec<PunchListItem>> {
    let rows = sqlx::query(
        "SELECT * FROM punch_list_items WHERE voice_message_id = ? ORDER BY id",
    )
    .bind(voice_message_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(item_from_row).collect()
}

/// Park an item with no candidate (`extracted → pending`) and stamp the
/// attempt so it moves to the back of the assignment queue
pub async fn mark_pending(pool: &SqlitePool, id: i64) -> Result<bool> {
    let now = now_db_string();
    let result = sqlx::query(
        r#"
        UPDATE punch_list_items
        SET status = 'pending', last_assign_attempt_at = ?, updated_at = ?
        WHERE id = ? AND status IN ('extracted', 'pending')
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Bring an item's status in line with an existing active assignment
pub async fn mark_assigned(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE punch_list_items SET status = 'assigned', updated_at = ?
        WHERE id = ? AND status IN ('extracted', 'pending')
        "#,
    )
    .bind(now_db_string())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
