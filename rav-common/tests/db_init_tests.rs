//! Tests for database initialization
//!
//! Covers automatic creation, idempotent re-open, and the constraints the
//! pipeline relies on for claiming rows.

use rav_common::db::init_database;
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn fresh_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().expect("temp dir");
    let pool = init_database(&dir.path().join("nested").join("rav.db"))
        .await
        .expect("init database");
    (dir, pool)
}

async fn seed_item(pool: &SqlitePool) -> i64 {
    let now = rav_common::time::now_db_string();
    sqlx::query(
        "INSERT INTO projects (name, city, created_at, updated_at) VALUES ('Kitchen', 'Austin', ?, ?)",
    )
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();

    for name in ["A", "B"] {
        sqlx::query(
            "INSERT INTO contractors (business_name, created_at, updated_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    sqlx::query(
        r#"INSERT INTO punch_list_items (project_id, description, created_at, updated_at)
           VALUES (1, 'Fix leak', ?, ?)"#,
    )
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

async fn insert_assignment(
    pool: &SqlitePool,
    item_id: i64,
    contractor_id: i64,
    response: &str,
) -> Result<(), sqlx::Error> {
    let now = rav_common::time::now_db_string();
    sqlx::query(
        r#"INSERT INTO punch_list_assignments
           (punch_list_item_id, contractor_id, project_id, assignment_method,
            contractor_response, created_at, updated_at)
           VALUES (?, ?, 1, 'algorithm', ?, ?, ?)"#,
    )
    .bind(item_id)
    .bind(contractor_id)
    .bind(response)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map(|_| ())
}

#[tokio::test]
async fn test_database_created_with_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a").join("b").join("rav.db");

    let pool = init_database(&path).await;
    assert!(pool.is_ok(), "init failed: {:?}", pool.err());
    assert!(path.exists());
}

#[tokio::test]
async fn test_reopen_existing_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rav.db");

    let first = init_database(&path).await.unwrap();
    first.close().await;

    let second = init_database(&path).await;
    assert!(second.is_ok(), "re-open failed: {:?}", second.err());

    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(&second.unwrap())
        .await
        .unwrap();
    assert_eq!(versions, 1);
}

#[tokio::test]
async fn test_all_tables_exist() {
    let (_dir, pool) = fresh_db().await;

    for table in [
        "projects",
        "contractors",
        "voice_messages",
        "voice_transcriptions",
        "extraction_runs",
        "punch_list_items",
        "punch_list_assignments",
        "webhook_events",
        "pipeline_jobs",
        "pipeline_runs",
    ] {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1, "missing table {}", table);
    }
}

#[tokio::test]
async fn test_second_active_assignment_rejected() {
    let (_dir, pool) = fresh_db().await;
    let item_id = seed_item(&pool).await;

    insert_assignment(&pool, item_id, 1, "pending").await.unwrap();
    let second = insert_assignment(&pool, item_id, 2, "pending").await;

    assert!(second.is_err(), "unique index should reject a second active assignment");
}

#[tokio::test]
async fn test_declined_assignment_can_be_superseded() {
    let (_dir, pool) = fresh_db().await;
    let item_id = seed_item(&pool).await;

    insert_assignment(&pool, item_id, 1, "declined").await.unwrap();
    insert_assignment(&pool, item_id, 2, "pending").await.unwrap();

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM punch_list_assignments WHERE punch_list_item_id = ?")
            .bind(item_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_undeliverable_assignment_can_be_superseded() {
    let (_dir, pool) = fresh_db().await;
    let item_id = seed_item(&pool).await;

    insert_assignment(&pool, item_id, 1, "undeliverable").await.unwrap();
    insert_assignment(&pool, item_id, 2, "pending").await.unwrap();
    let third = insert_assignment(&pool, item_id, 3, "pending").await;

    assert!(third.is_err(), "only the undeliverable row is outside the active set");
}

#[tokio::test]
async fn test_status_check_constraint() {
    let (_dir, pool) = fresh_db().await;
    let now = rav_common::time::now_db_string();

    let result = sqlx::query(
        r#"INSERT INTO voice_messages (audio_url, status, created_at, updated_at)
           VALUES ('https://x/a.ogg', 'exploded', ?, ?)"#,
    )
    .bind(&now)
    .bind(&now)
    .execute(&pool)
    .await;

    assert!(result.is_err());
}
