//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and creates every table
//! the punch-list pipeline uses. All statements are idempotent, so running
//! initialization against an existing database is safe.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Per-connection pragmas go through the connect options so every pooled
    // connection gets them, not just the first one.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes on an already-open pool
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_projects_table(pool).await?;
    create_contractors_table(pool).await?;
    create_voice_messages_table(pool).await?;
    create_voice_transcriptions_table(pool).await?;
    create_extraction_runs_table(pool).await?;
    create_punch_list_items_table(pool).await?;
    create_punch_list_assignments_table(pool).await?;
    create_webhook_events_table(pool).await?;
    create_pipeline_jobs_table(pool).await?;
    create_pipeline_runs_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_projects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            homeowner_id TEXT,
            homeowner_phone TEXT,
            city TEXT,
            budget_range TEXT,
            timeline TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_projects_homeowner_phone ON projects(homeowner_phone)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Contractors are read-only from the pipeline's perspective
///
/// `specialties` and `service_areas` hold JSON string arrays.
async fn create_contractors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contractors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            business_name TEXT NOT NULL,
            phone TEXT,
            specialties TEXT NOT NULL DEFAULT '[]',
            service_areas TEXT NOT NULL DEFAULT '[]',
            price_range TEXT,
            availability_status TEXT NOT NULL DEFAULT 'available',
            rating REAL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_contractors_phone ON contractors(phone)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_voice_messages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voice_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER REFERENCES projects(id),
            sender_id TEXT,
            sender_phone TEXT,
            external_id TEXT UNIQUE,
            audio_url TEXT NOT NULL,
            mime_type TEXT,
            duration_seconds REAL,
            status TEXT NOT NULL DEFAULT 'received'
                CHECK (status IN ('received', 'transcribing', 'transcribed', 'failed')),
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_voice_messages_status ON voice_messages(status, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One transcription per voice message, immutable once written
async fn create_voice_transcriptions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voice_transcriptions (
            voice_message_id INTEGER PRIMARY KEY
                REFERENCES voice_messages(id) ON DELETE CASCADE,
            transcription_text TEXT NOT NULL,
            confidence_score REAL,
            language TEXT,
            processing_time_ms INTEGER NOT NULL DEFAULT 0,
            service_name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Claim record for the extraction stage
///
/// The primary key makes the insert an atomic claim: only one invocation
/// can create the row for a given voice message. A `retry` row may be
/// reclaimed after an extractor service failure.
async fn create_extraction_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS extraction_runs (
            voice_message_id INTEGER PRIMARY KEY
                REFERENCES voice_messages(id) ON DELETE CASCADE,
            status TEXT NOT NULL CHECK (status IN ('running', 'retry', 'completed', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            item_count INTEGER NOT NULL DEFAULT 0,
            service_name TEXT,
            error_message TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_punch_list_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS punch_list_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL REFERENCES projects(id),
            voice_message_id INTEGER REFERENCES voice_messages(id) ON DELETE SET NULL,
            description TEXT NOT NULL,
            room TEXT,
            trade_category TEXT,
            priority TEXT NOT NULL DEFAULT 'medium'
                CHECK (priority IN ('urgent', 'high', 'medium', 'low')),
            estimated_hours REAL,
            status TEXT NOT NULL DEFAULT 'extracted'
                CHECK (status IN ('extracted', 'pending', 'assigned', 'completed')),
            completed_at TEXT,
            last_assign_attempt_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_punch_list_items_status ON punch_list_items(status, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Assignments link an item to a contractor and track the response
///
/// The partial unique index allows at most one active assignment per item.
/// A declined or undeliverable assignment can be superseded by a new one.
async fn create_punch_list_assignments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS punch_list_assignments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            punch_list_item_id INTEGER NOT NULL
                REFERENCES punch_list_items(id) ON DELETE CASCADE,
            contractor_id INTEGER NOT NULL REFERENCES contractors(id),
            project_id INTEGER NOT NULL REFERENCES projects(id),
            assignment_method TEXT NOT NULL CHECK (assignment_method IN ('algorithm', 'manual')),
            assignment_reason TEXT,
            score INTEGER,
            contractor_response TEXT NOT NULL DEFAULT 'pending'
                CHECK (contractor_response IN
                    ('pending', 'accepted', 'declined', 'undeliverable', 'completed')),
            delivery_status TEXT NOT NULL DEFAULT 'queued'
                CHECK (delivery_status IN ('queued', 'sending', 'sent', 'failed')),
            message_sid TEXT,
            send_attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            claimed_at TEXT,
            sent_at TEXT,
            responded_at TEXT,
            reminder_count INTEGER NOT NULL DEFAULT 0,
            last_reminder_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_one_active
        ON punch_list_assignments(punch_list_item_id)
        WHERE contractor_response NOT IN ('declined', 'undeliverable')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_assignments_contractor_response
        ON punch_list_assignments(contractor_id, contractor_response)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_assignments_delivery
        ON punch_list_assignments(delivery_status, created_at)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Raw inbound webhook payloads kept for audit
async fn create_webhook_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            event_type TEXT,
            external_id TEXT,
            payload TEXT NOT NULL,
            outcome TEXT,
            received_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Durable work queue decoupling webhook acknowledgement from processing
async fn create_pipeline_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            voice_message_id INTEGER,
            status TEXT NOT NULL DEFAULT 'queued'
                CHECK (status IN ('queued', 'running', 'done', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            run_after TEXT NOT NULL,
            last_error TEXT,
            claimed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_jobs_status ON pipeline_jobs(status, run_after)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pipeline_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id TEXT PRIMARY KEY,
            trigger TEXT NOT NULL,
            action TEXT NOT NULL,
            success INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER,
            report TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
