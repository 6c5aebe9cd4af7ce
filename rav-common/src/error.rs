//! Errors shared by the RenovationAdvisor crates
//!
//! The HTTP layer maps `NotFound` to 404 and `InvalidInput` to 400; every
//! other variant is a server-side failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite failure, including constraint violations not handled by the caller
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Creating the database directory or reading the config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON column (contractor specialties, run reports) that will not
    /// (de)serialize
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad TOML, a failed validation rule, or a missing required setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown voice message, item, contractor or project id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied value rejected: unknown status text, completed item,
    /// inactive contractor
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored data that breaks an invariant, e.g. a malformed timestamp
    #[error("Internal error: {0}")]
    Internal(String),
}
