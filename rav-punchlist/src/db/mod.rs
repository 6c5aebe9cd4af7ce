//! Database access for the punch-list service
//!
//! One module per table. Every status transition that a pipeline stage
//! depends on is a single conditional statement that only succeeds from the
//! expected prior state; callers treat `false` as "claimed elsewhere".

pub mod assignments;
pub mod contractors;
pub mod extraction_runs;
pub mod items;
pub mod jobs;
pub mod projects;
pub mod runs;
pub mod stats;
pub mod transcriptions;
pub mod voice_messages;
pub mod webhook_events;

use rav_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Open the service database, creating schema as needed
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    rav_common::db::init_database(db_path).await
}

/// Read a TEXT column into a typed status enum
pub(crate) fn get_enum<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: FromStr<Err = Error>,
{
    let text: String = row.try_get(column)?;
    text.parse()
}

/// Read a required RFC 3339 timestamp column
pub(crate) fn get_time(row: &SqliteRow, column: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    let text: String = row.try_get(column)?;
    rav_common::time::parse_db_string(&text)
}

/// Read an optional RFC 3339 timestamp column
pub(crate) fn get_optional_time(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let text: Option<String> = row.try_get(column)?;
    rav_common::time::parse_optional(text)
}

/// Timestamp `minutes` ago, formatted for comparison against stored values
pub(crate) fn minutes_ago(minutes: i64) -> String {
    rav_common::time::to_db_string(chrono::Utc::now() - chrono::Duration::minutes(minutes))
}

/// True when the error is a UNIQUE/PRIMARY KEY violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
