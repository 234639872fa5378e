// elspeth-store-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Recorder Errors
// Description: SQLite-specific error detail, mapped onto the backend-neutral
//              `elspeth_core::StoreError` at the recorder seam.
// Purpose: Keep rusqlite's error shape out of `elspeth-core`, matching the
//          teacher's `SqliteStoreError -> StoreError` conversion.
// Dependencies: elspeth-core, rusqlite, thiserror
// ============================================================================

use elspeth_core::StoreError;
use thiserror::Error;

/// Errors raised internally while opening, reading, or writing the `SQLite`
/// recorder database.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// An I/O failure unrelated to the `SQLite` engine itself (path
    /// creation, filesystem permissions).
    #[error("sqlite recorder io error: {0}")]
    Io(String),
    /// The `SQLite` engine reported an error.
    #[error("sqlite recorder db error: {0}")]
    Db(String),
    /// Stored data failed an integrity check.
    #[error("sqlite recorder corruption: {0}")]
    Corrupt(String),
    /// The database's schema version does not match this build.
    #[error("sqlite recorder schema version mismatch: {0}")]
    VersionMismatch(String),
    /// The caller supplied data the recorder will not persist.
    #[error("sqlite recorder invalid operation: {0}")]
    Invalid(String),
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<SqliteError> for StoreError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Io(message) => Self::Io(message),
            SqliteError::Db(message) => Self::Store(message),
            SqliteError::Corrupt(message) => Self::Corrupt(message),
            SqliteError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteError::Invalid(message) => Self::Invalid(message),
        }
    }
}
