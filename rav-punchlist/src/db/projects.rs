//! Project lookups

use rav_common::time::now_db_string;
use rav_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{NewProject, Project};

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        homeowner_id: row.try_get("homeowner_id")?,
        homeowner_phone: row.try_get("homeowner_phone")?,
        city: row.try_get("city")?,
        budget_range: row.try_get("budget_range")?,
        timeline: row.try_get("timeline")?,
        status: row.try_get("status")?,
    })
}

pub async fn insert_project(pool: &SqlitePool, project: &NewProject) -> Result<i64> {
    let now = now_db_string();
    let phone = project
        .homeowner_phone
        .as_deref()
        .and_then(rav_common::phone::normalize);

    let id = sqlx::query(
        r#"
        INSERT INTO projects (name, homeowner_id, homeowner_phone, city, budget_range, timeline,
                              status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?)
        "#,
    )
    .bind(&project.name)
    .bind(&project.homeowner_id)
    .bind(phone)
    .bind(&project.city)
    .bind(&project.budget_range)
    .bind(&project.timeline)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_project(pool: &SqlitePool, id: i64) -> Result<Option<Project>> {
    let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(project_from_row).transpose()
}

/// Most recently created active project for a homeowner phone number
pub async fn find_active_by_homeowner_phone(
    pool: &SqlitePool,
    phone: &str,
) -> Result<Option<Project>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM projects
        WHERE homeowner_phone = ? AND status = 'active'
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(phone)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(project_from_row).transpose()
}
