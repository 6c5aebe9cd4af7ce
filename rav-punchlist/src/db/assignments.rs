//! Assignment persistence: creation, delivery claims, reminders, responses

use rav_common::time::now_db_string;
use rav_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{get_enum, get_optional_time, get_time, is_unique_violation, minutes_ago};
use crate::models::{ContractorResponse, DeliveryStatus, NewAssignment, PunchListAssignment};

fn assignment_from_row(row: &SqliteRow) -> Result<PunchListAssignment> {
    Ok(PunchListAssignment {
        id: row.try_get("id")?,
        punch_list_item_id: row.try_get("punch_list_item_id")?,
        contractor_id: row.try_get("contractor_id")?,
        project_id: row.try_get("project_id")?,
        assignment_method: get_enum(row, "assignment_method")?,
        assignment_reason: row.try_get("assignment_reason")?,
        score: row.try_get("score")?,
        contractor_response: get_enum(row, "contractor_response")?,
        delivery_status: get_enum(row, "delivery_status")?,
        message_sid: row.try_get("message_sid")?,
        send_attempts: row.try_get("send_attempts")?,
        last_error: row.try_get("last_error")?,
        sent_at: get_optional_time(row, "sent_at")?,
        responded_at: get_optional_time(row, "responded_at")?,
        reminder_count: row.try_get("reminder_count")?,
        last_reminder_at: get_optional_time(row, "last_reminder_at")?,
        completed_at: get_optional_time(row, "completed_at")?,
        created_at: get_time(row, "created_at")?,
        updated_at: get_time(row, "updated_at")?,
    })
}

/// Create a pending assignment and mark its item `assigned`
///
/// Returns `None` when the item already has an active (not declined, not
/// undeliverable) assignment; the unique index rejects the insert and nothing is written.
pub async fn insert_assignment(pool: &SqlitePool, new: &NewAssignment) -> Result<Option<i64>> {
    let now = now_db_string();
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO punch_list_assignments
            (punch_list_item_id, contractor_id, project_id, assignment_method, assignment_reason,
             score, contractor_response, delivery_status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'pending', 'queued', ?, ?)
        "#,
    )
    .bind(new.punch_list_item_id)
    .bind(new.contractor_id)
    .bind(new.project_id)
    .bind(new.method.as_str())
    .bind(&new.reason)
    .bind(new.score)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await;

    let id = match inserted {
        Ok(result) => result.last_insert_rowid(),
        Err(e) if is_unique_violation(&e) => {
            tx.rollback().await?;
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    sqlx::query(
        r#"
        UPDATE punch_list_items SET status = 'assigned', updated_at = ?
        WHERE id = ? AND status IN ('extracted', 'pending')
        "#,
    )
    .bind(&now)
    .bind(new.punch_list_item_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(id))
}

pub async fn get_assignment(pool: &SqlitePool, id: i64) -> Result<Option<PunchListAssignment>> {
    let row = sqlx::query("SELECT * FROM punch_list_assignments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(assignment_from_row).transpose()
}

pub async fn list_for_item(pool: &SqlitePool, item_id: i64) -> Result<Vec<PunchListAssignment>> {
    let rows = sqlx::query(
        "SELECT * FROM punch_list_assignments WHERE punch_list_item_id = ? ORDER BY id",
    )
    .bind(item_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(assignment_from_row).collect()
}

/// Contractors that turned this item down or could not be reached for it
pub async fn passed_over_contractor_ids(pool: &SqlitePool, item_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT DISTINCT contractor_id FROM punch_list_assignments
        WHERE punch_list_item_id = ? AND contractor_response IN ('declined', 'undeliverable')
        "#,
    )
    .bind(item_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Assignments whose message has not been sent yet, oldest first
pub async fn list_dispatchable(
    pool: &SqlitePool,
    limit: u32,
    only_voice_message_id: Option<i64>,
) -> Result<Vec<PunchListAssignment>> {
    let rows = sqlx::query(
        r#"
        SELECT a.* FROM punch_list_assignments a
        JOIN punch_list_items i ON i.id = a.punch_list_item_id
        WHERE a.delivery_status = 'queued'
          AND a.contractor_response = 'pending'
          AND (? IS NULL OR i.voice_message_id = ?)
        ORDER BY a.created_at, a.id
        LIMIT ?
        "#,
    )
    .bind(only_voice_message_id)
    .bind(only_voice_message_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(assignment_from_row).collect()
}

/// Claim an assignment for sending (`queued → sending`)
pub async fn claim_for_dispatch(pool: &SqlitePool, id: i64) -> Result<bool> {
    let now = now_db_string();
    let result = sqlx::query(
        r#"
        UPDATE punch_list_assignments
        SET delivery_status = 'sending', claimed_at = ?, updated_at = ?
        WHERE id = ? AND delivery_status = 'queued'
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Record a successful send (`sending → sent`)
pub async fn mark_sent(pool: &SqlitePool, id: i64, message_sid: Option<&str>) -> Result<()> {
    let now = now_db_string();
    sqlx::query(
        r#"
        UPDATE punch_list_assignments
        SET delivery_status = 'sent', sent_at = ?, message_sid = ?,
            send_attempts = send_attempts + 1, last_error = NULL, updated_at = ?
        WHERE id = ? AND delivery_status = 'sending'
        "#,
    )
    .bind(&now)
    .bind(message_sid)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Send the item of an undeliverable assignment back to `pending`
async fn reopen_item_of_undeliverable(conn: &mut SqliteConnection, id: i64, now: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE punch_list_items SET status = 'pending', updated_at = ?
        WHERE id = (
            SELECT punch_list_item_id FROM punch_list_assignments
            WHERE id = ? AND contractor_response = 'undeliverable'
        ) AND status = 'assigned'
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Record a failed send
///
/// The assignment goes back to `queued` for the next pass until
/// `max_attempts` sends have failed. It is then `failed` and
/// `undeliverable`, and its item returns to `pending`. Returns the new
/// delivery status.
pub async fn mark_send_failed(
    pool: &SqlitePool,
    id: i64,
    error: &str,
    max_attempts: i64,
) -> Result<DeliveryStatus> {
    let now = now_db_string();
    let mut tx = pool.begin().await?;

    let status: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE punch_list_assignments
        SET send_attempts = send_attempts + 1,
            delivery_status = CASE WHEN send_attempts + 1 >= ? THEN 'failed' ELSE 'queued' END,
            contractor_response = CASE
                WHEN send_attempts + 1 >= ? AND contractor_response = 'pending' THEN 'undeliverable'
                ELSE contractor_response
            END,
            last_error = ?, claimed_at = NULL, updated_at = ?
        WHERE id = ? AND delivery_status = 'sending'
        RETURNING delivery_status
        "#,
    )
    .bind(max_attempts)
    .bind(max_attempts)
    .bind(error)
    .bind(&now)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(text) = status else {
        tx.rollback().await?;
        return Ok(DeliveryStatus::Failed);
    };
    let status: DeliveryStatus = text.parse()?;
    if status == DeliveryStatus::Failed {
        reopen_item_of_undeliverable(&mut tx, id, &now).await?;
    }

    tx.commit().await?;
    Ok(status)
}

/// Give up on an assignment that can never be delivered
///
/// The assignment leaves the item's active set and the item returns to
/// `pending` so the next-ranked contractor can be tried.
pub async fn mark_undeliverable(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    let now = now_db_string();
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE punch_list_assignments
        SET delivery_status = 'failed',
            contractor_response = CASE
                WHEN contractor_response = 'pending' THEN 'undeliverable'
                ELSE contractor_response
            END,
            last_error = ?, claimed_at = NULL, updated_at = ?
        WHERE id = ? AND delivery_status = 'sending'
        "#,
    )
    .bind(error)
    .bind(&now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 1 {
        reopen_item_of_undeliverable(&mut tx, id, &now).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Return abandoned `sending` claims to the queue
pub async fn release_stale_claims(pool: &SqlitePool, older_than_minutes: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE punch_list_assignments
        SET delivery_status = 'queued', claimed_at = NULL, updated_at = ?
        WHERE delivery_status = 'sending' AND claimed_at < ?
        "#,
    )
    .bind(now_db_string())
    .bind(minutes_ago(older_than_minutes))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Sent, unanswered assignments whose last contact is older than `due_before`
pub async fn list_reminder_due(
    pool: &SqlitePool,
    limit: u32,
    due_before: &str,
    max_reminders: i64,
) -> Result<Vec<PunchListAssignment>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM punch_list_assignments
        WHERE contractor_response = 'pending'
          AND delivery_status = 'sent'
          AND reminder_count < ?
          AND COALESCE(last_reminder_at, sent_at) <= ?
        ORDER BY COALESCE(last_reminder_at, sent_at), id
        LIMIT ?
        "#,
    )
    .bind(max_reminders)
    .bind(due_before)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(assignment_from_row).collect()
}

/// Claim a reminder slot by bumping `reminder_count` from its observed value
pub async fn claim_reminder(pool: &SqlitePool, id: i64, observed_count: i64) -> Result<bool> {
    let now = now_db_string();
    let result = sqlx::query(
        r#"
        UPDATE punch_list_assignments
        SET reminder_count = reminder_count + 1, last_reminder_at = ?, updated_at = ?
        WHERE id = ? AND reminder_count = ? AND contractor_response = 'pending'
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(id)
    .bind(observed_count)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Undo a reminder claim whose send failed
pub async fn revert_reminder(
    pool: &SqlitePool,
    id: i64,
    observed_count: i64,
    previous_reminder_at: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE punch_list_assignments
        SET reminder_count = ?, last_reminder_at = ?, updated_at = ?
        WHERE id = ? AND reminder_count = ?
        "#,
    )
    .bind(observed_count)
    .bind(previous_reminder_at)
    .bind(now_db_string())
    .bind(id)
    .bind(observed_count + 1)
    .execute(pool)
    .await?;
    Ok(())
}

/// A contractor's assignments in the given response states, newest first
pub async fn list_open_for_contractor(
    pool: &SqlitePool,
    contractor_id: i64,
    responses: &[ContractorResponse],
) -> Result<Vec<PunchListAssignment>> {
    if responses.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; responses.len()].join(", ");
    let sql = format!(
        r#"
        SELECT * FROM punch_list_assignments
        WHERE contractor_id = ? AND contractor_response IN ({})
        ORDER BY COALESCE(sent_at, created_at) DESC, id DESC
        "#,
        placeholders
    );

    let mut query = sqlx::query(&sql).bind(contractor_id);
    for response in responses {
        query = query.bind(response.as_str());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(assignment_from_row).collect()
}

/// Apply a contractor response and the matching item transition atomically
///
/// Returns `false` if the assignment was no longer in one of `from`.
pub async fn apply_response(
    pool: &SqlitePool,
    assignment_id: i64,
    from: &[ContractorResponse],
    to: ContractorResponse,
) -> Result<bool> {
    if from.is_empty() {
        return Ok(false);
    }

    let now = now_db_string();
    let placeholders = vec!["?"; from.len()].join(", ");
    let sql = format!(
        r#"
        UPDATE punch_list_assignments
        SET contractor_response = ?,
            responded_at = COALESCE(responded_at, ?),
            completed_at = CASE WHEN ? = 'completed' THEN ? ELSE completed_at END,
            updated_at = ?
        WHERE id = ? AND contractor_response IN ({})
        RETURNING punch_list_item_id
        "#,
        placeholders
    );

    let mut tx = pool.begin().await?;

    let mut query = sqlx::query_scalar::<_, i64>(&sql)
        .bind(to.as_str())
        .bind(&now)
        .bind(to.as_str())
        .bind(&now)
        .bind(&now)
        .bind(assignment_id);
    for response in from {
        query = query.bind(response.as_str());
    }

    let item_id = match query.fetch_optional(&mut *tx).await? {
        Some(id) => id,
        None => {
            tx.rollback().await?;
            return Ok(false);
        }
    };

    match to {
        ContractorResponse::Declined => {
            sqlx::query(
                r#"
                UPDATE punch_list_items SET status = 'pending', updated_at = ?
                WHERE id = ? AND status = 'assigned'
                "#,
            )
            .bind(&now)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        }
        ContractorResponse::Completed => {
            sqlx::query(
                r#"
                UPDATE punch_list_items SET status = 'completed', completed_at = ?, updated_at = ?
                WHERE id = ? AND status != 'completed'
                "#,
            )
            .bind(&now)
            .bind(&now)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        }
        ContractorResponse::Accepted
        | ContractorResponse::Pending
        | ContractorResponse::Undeliverable => {}
    }

    tx.commit().await?;
    Ok(true)
}
