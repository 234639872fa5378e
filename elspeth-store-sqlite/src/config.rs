// elspeth-store-sqlite/src/config.rs
// ============================================================================
// Module: SQLite Recorder Configuration
// Description: Connection, journal, and retention configuration for the
//              SQLite-backed audit recorder.
// Purpose: Keep tunables (path, pragmas, read-pool size) separate from
//          connection setup and recorder logic.
// Dependencies: serde
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::SqliteError;

/// Maximum length of a single path component accepted for the store path.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total store path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default busy timeout, in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of read-only connections kept open for `explain` and
/// `get_call_response` queries.
const DEFAULT_READ_POOL_SIZE: usize = 4;

/// `SQLite` journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// Write-ahead logging (recommended; allows concurrent readers).
    #[default]
    Wal,
    /// Legacy rollback journal.
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` synchronous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full durability (safest; default).
    #[default]
    Full,
    /// Reduced durability, higher throughput.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` audit recorder.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteRecorderConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout, in milliseconds, applied to every connection.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// Synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of read-only connections kept open for query-only methods
    /// (`explain`, `get_call_response`).
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
    /// Root directory of the content-addressed payload store backing
    /// `get_call_response` and `purge`'s payload deletion. `None` means
    /// the recorder tracks only hashes and refs, never bytes.
    #[serde(default)]
    pub payload_root: Option<PathBuf>,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

/// Validates a store path against length limits and rejects directories.
///
/// # Errors
///
/// Returns [`SqliteError::Invalid`] if the path is too long or is an
/// existing directory.
pub fn validate_store_path(path: &Path) -> Result<(), SqliteError> {
    let rendered = path.display().to_string();
    if rendered.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteError::Invalid("store path contains an overlong component".to_string()));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteError::Invalid("store path must be a file, not a directory".to_string()));
    }
    Ok(())
}

/// Creates the store's parent directory if it does not already exist.
///
/// # Errors
///
/// Returns [`SqliteError::Io`] if the directory cannot be created.
pub fn ensure_parent_dir(path: &Path) -> Result<(), SqliteError> {
    let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
        return Ok(());
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteError::Io(err.to_string()))
}
