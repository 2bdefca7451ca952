//! Error types for the SQLite backend.

use mast_core::store::StoreError;
use thiserror::Error;

/// SQLite storage error type
#[derive(Error, Debug)]
pub enum SqliteError {
    /// Database connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Schema/migration error
    #[error("schema error: {0}")]
    Schema(String),

    /// A row held a value the domain types cannot represent
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// Row not found where one was required
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying rusqlite error
    #[error("SQLite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

/// Result type for SQLite operations
pub type SqliteResult<T> = Result<T, SqliteError>;

impl From<SqliteError> for StoreError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::NotFound(msg) => StoreError::NotFound(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
