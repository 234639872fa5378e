// elspeth-store-sqlite/src/connection.rs
// ============================================================================
// Module: SQLite Connection & Schema
// Description: Connection setup, pragmas, and schema initialization for the
//              audit recorder (a one-to-one relational mapping of §3).
// Purpose: Isolate pragma/schema plumbing from recorder logic, grounded on
//          `decision-gate-store-sqlite::store`'s `open_connection`/
//          `apply_pragmas`/`initialize_schema` split.
// Dependencies: rusqlite
// ============================================================================

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::config::SqliteRecorderConfig;
use crate::error::SqliteError;

/// Schema version for the audit recorder's table set.
pub const SCHEMA_VERSION: i64 = 1;

/// Opens the writer connection (read-write, created if absent) and applies
/// the configured pragmas.
///
/// # Errors
///
/// Returns [`SqliteError`] if the connection cannot be opened or configured.
pub fn open_writer(config: &SqliteRecorderConfig) -> Result<Connection, SqliteError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Opens one read-only connection against an already-initialized database.
///
/// # Errors
///
/// Returns [`SqliteError`] if the connection cannot be opened.
pub fn open_reader(config: &SqliteRecorderConfig) -> Result<Connection, SqliteError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
    Ok(connection)
}

/// Opens the configured number of read-only connections.
///
/// # Errors
///
/// Returns [`SqliteError`] if any connection cannot be opened.
pub fn open_reader_pool(config: &SqliteRecorderConfig) -> Result<Vec<Connection>, SqliteError> {
    (0..config.read_pool_size.max(1)).map(|_| open_reader(config)).collect()
}

/// Applies the pragmas required for durability and concurrent readers.
fn apply_pragmas(connection: &Connection, config: &SqliteRecorderConfig) -> Result<(), SqliteError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}

/// Creates the schema if absent, or validates the existing version.
///
/// # Errors
///
/// Returns [`SqliteError::VersionMismatch`] if an existing database carries
/// an unsupported schema version.
pub fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteError> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> =
        tx.query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0)).optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(SCHEMA_DDL)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(other) => {
            return Err(SqliteError::VersionMismatch(format!(
                "unsupported schema version: {other} (expected {SCHEMA_VERSION})"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}

/// The full schema DDL: one table per §3 entity, plus the indexes that back
/// the invariants the recorder enforces (dense attempt numbering, one
/// terminal outcome per token, unique gate route labels).
const SCHEMA_DDL: &str = "
CREATE TABLE runs (
    run_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    config_fingerprint TEXT NOT NULL,
    canonical_version INTEGER NOT NULL,
    mode TEXT NOT NULL,
    source_run_id TEXT
);

CREATE TABLE nodes (
    node_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    label TEXT NOT NULL,
    node_type TEXT NOT NULL,
    plugin_name TEXT NOT NULL,
    plugin_version TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    determinism TEXT NOT NULL,
    UNIQUE (run_id, label)
);

CREATE TABLE edges (
    edge_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    from_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    to_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    route_label TEXT,
    UNIQUE (from_node_id, route_label)
);

CREATE TABLE rows_ (
    row_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    source_node_id TEXT NOT NULL REFERENCES nodes(node_id),
    row_index INTEGER NOT NULL,
    input_hash TEXT NOT NULL,
    source_data_ref TEXT,
    loaded_at TEXT NOT NULL,
    UNIQUE (source_node_id, row_index)
);

CREATE TABLE tokens (
    token_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    row_id TEXT NOT NULL REFERENCES rows_(row_id),
    created_at TEXT NOT NULL,
    origin_node_id TEXT NOT NULL REFERENCES nodes(node_id)
);
CREATE INDEX idx_tokens_row ON tokens (row_id);

CREATE TABLE token_parents (
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    parent_token_id TEXT NOT NULL REFERENCES tokens(token_id),
    relation TEXT NOT NULL,
    PRIMARY KEY (token_id, parent_token_id)
);

CREATE TABLE node_states (
    state_id TEXT PRIMARY KEY,
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    attempt INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    input_hash TEXT NOT NULL,
    context_before_ref TEXT,
    status TEXT NOT NULL,
    completed_at TEXT,
    output_hash TEXT,
    context_after_ref TEXT,
    duration_ms INTEGER,
    error_json TEXT,
    UNIQUE (token_id, node_id, attempt)
);
CREATE INDEX idx_node_states_token ON node_states (token_id);

CREATE TABLE calls (
    call_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL REFERENCES node_states(state_id),
    call_type TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    status TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    response_hash TEXT,
    request_ref TEXT,
    response_ref TEXT,
    secret_fingerprint TEXT,
    attempt INTEGER NOT NULL,
    provider_request_id TEXT
);
CREATE INDEX idx_calls_state ON calls (state_id);

CREATE TABLE artifacts (
    artifact_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    state_id TEXT NOT NULL REFERENCES node_states(state_id),
    kind TEXT NOT NULL,
    uri TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_artifacts_run ON artifacts (run_id);

CREATE TABLE routing_events (
    event_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL REFERENCES node_states(state_id),
    edge_id TEXT NOT NULL REFERENCES edges(edge_id),
    decided_at TEXT NOT NULL,
    rule TEXT NOT NULL,
    reason_ref TEXT,
    mode TEXT NOT NULL
);
CREATE INDEX idx_routing_events_state ON routing_events (state_id);

CREATE TABLE batches (
    batch_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    status TEXT NOT NULL,
    opened_at TEXT NOT NULL,
    closed_at TEXT,
    trigger TEXT
);

CREATE TABLE batch_members (
    batch_id TEXT NOT NULL REFERENCES batches(batch_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    position INTEGER NOT NULL,
    PRIMARY KEY (batch_id, token_id)
);

CREATE TABLE batch_outputs (
    batch_id TEXT NOT NULL REFERENCES batches(batch_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    position INTEGER NOT NULL,
    PRIMARY KEY (batch_id, token_id)
);

CREATE TABLE token_outcomes (
    outcome_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    outcome TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE UNIQUE INDEX idx_token_outcomes_terminal
    ON token_outcomes (token_id)
    WHERE outcome != 'buffered';

CREATE TABLE checkpoints (
    checkpoint_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    sequence_number INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    aggregation_state_ref TEXT,
    row_ref TEXT,
    route_label TEXT,
    coalesce_key TEXT
);
CREATE INDEX idx_checkpoints_run ON checkpoints (run_id);
CREATE INDEX idx_checkpoints_token ON checkpoints (token_id);

CREATE TABLE validation_error_records (
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    field_path TEXT NOT NULL,
    message TEXT NOT NULL
);

CREATE TABLE transform_error_records (
    token_id TEXT NOT NULL REFERENCES tokens(token_id),
    node_id TEXT NOT NULL REFERENCES nodes(node_id),
    error_json TEXT NOT NULL
);
";
