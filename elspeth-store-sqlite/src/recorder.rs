// elspeth-store-sqlite/src/recorder.rs
// ============================================================================
// Module: SQLite-Backed Audit Recorder
// Description: Implements `elspeth_core::Recorder` against the schema in
//              `connection.rs`.
// Purpose: Durable, queryable audit trail for one run, matching the
//          teacher's single-writer-connection-behind-a-mutex design
//          (simplified from its dedicated writer-thread gateway — see
//          DESIGN.md).
// Dependencies: elspeth-core, rusqlite
// ============================================================================

//! ## Overview
//! Every write method opens a short transaction against the one writer
//! connection (guarded by a `Mutex`) and commits before returning, so a
//! crash mid-operation never leaves a half-written row visible. Read-only
//! query methods (`explain`, `get_call_response`) round-robin across a
//! small pool of dedicated read-only connections instead, so a long-running
//! `explain` never blocks the writer.

use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use elspeth_core::Artifact;
use elspeth_core::ArtifactId;
use elspeth_core::BatchId;
use elspeth_core::BatchStatus;
use elspeth_core::Call;
use elspeth_core::CallId;
use elspeth_core::CallResponse;
use elspeth_core::CallStatus;
use elspeth_core::CallType;
use elspeth_core::Checkpoint;
use elspeth_core::CheckpointId;
use elspeth_core::Determinism;
use elspeth_core::EdgeId;
use elspeth_core::ErrorDetail;
use elspeth_core::InvariantViolation;
use elspeth_core::NodeId;
use elspeth_core::NodeState;
use elspeth_core::NodeStateCommon;
use elspeth_core::NodeType;
use elspeth_core::OutcomeId;
use elspeth_core::PurgeReport;
use elspeth_core::Recorder;
use elspeth_core::Row;
use elspeth_core::RowDataResult;
use elspeth_core::RowExplanation;
use elspeth_core::RowId;
use elspeth_core::RoutingEvent;
use elspeth_core::RoutingEventId;
use elspeth_core::RoutingKind;
use elspeth_core::RoutingMode;
use elspeth_core::RowOutcome;
use elspeth_core::RunId;
use elspeth_core::RunMode;
use elspeth_core::RunStatus;
use elspeth_core::StateId;
use elspeth_core::StoreError;
use elspeth_core::Timestamp;
use elspeth_core::Token;
use elspeth_core::TokenId;
use elspeth_core::TokenOutcome;
use elspeth_core::TokenRelation;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row as SqlRow;
use rusqlite::params;
use uuid::Uuid;

use crate::codec::enum_to_text;
use crate::codec::text_to_enum;
use crate::codec::timestamp_from_text;
use crate::codec::timestamp_to_text;
use crate::config::SqliteRecorderConfig;
use crate::config::ensure_parent_dir;
use crate::config::validate_store_path;
use crate::connection::initialize_schema;
use crate::connection::open_reader_pool;
use crate::connection::open_writer;
use crate::error::SqliteError;

/// `SQLite`-backed implementation of [`Recorder`].
pub struct SqliteRecorder {
    /// The single writer connection, guarded so writes serialize cleanly.
    writer: Mutex<Connection>,
    /// A small pool of read-only connections for query-only methods.
    readers: Vec<Mutex<Connection>>,
    /// Round-robin cursor into `readers`.
    next_reader: AtomicUsize,
    /// Content-addressed payload store backing `get_call_response` and
    /// `purge`, if configured.
    payload_store: Option<elspeth_payload::PayloadStore>,
}

impl SqliteRecorder {
    /// Opens (or creates) the `SQLite` audit recorder at the configured
    /// path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened, configured,
    /// or schema-checked.
    pub fn open(config: &SqliteRecorderConfig) -> Result<Self, StoreError> {
        validate_store_path(&config.path).map_err(SqliteError_into)?;
        ensure_parent_dir(&config.path).map_err(SqliteError_into)?;
        let mut writer = open_writer(config).map_err(SqliteError_into)?;
        initialize_schema(&mut writer).map_err(SqliteError_into)?;
        let readers = open_reader_pool(config)
            .map_err(SqliteError_into)?
            .into_iter()
            .map(Mutex::new)
            .collect();
        let payload_store = config
            .payload_root
            .clone()
            .map(elspeth_payload::PayloadStore::open)
            .transpose()
            .map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(Self { writer: Mutex::new(writer), readers, next_reader: AtomicUsize::new(0), payload_store })
    }

    /// Runs `f` against one pooled read-only connection, round-robin.
    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        if self.readers.is_empty() {
            let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
            return f(&guard);
        }
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let guard = self.readers[index]
            .lock()
            .map_err(|_| StoreError::Store("reader mutex poisoned".to_string()))?;
        f(&guard)
    }
}

/// Converts a [`SqliteError`] into [`StoreError`]; named to read well at
/// `.map_err(SqliteError_into)` call sites above.
#[allow(non_snake_case, reason = "mirrors the conversion function it names")]
fn SqliteError_into(err: SqliteError) -> StoreError {
    err.into()
}

/// Generates a fresh UUID-shaped identifier string.
fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl Recorder for SqliteRecorder {
    fn begin_run(
        &self,
        config_fingerprint: String,
        mode: RunMode,
        source_run_id: Option<RunId>,
    ) -> Result<RunId, StoreError> {
        let run_id = RunId::from_raw(generate_id());
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO runs (run_id, started_at, completed_at, status, config_fingerprint, \
                 canonical_version, mode, source_run_id) VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7)",
                params![
                    run_id.as_str(),
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                    enum_to_text(&RunStatus::Running).map_err(SqliteError_into)?,
                    config_fingerprint,
                    elspeth_core::hashing::CANONICAL_VERSION,
                    enum_to_text(&mode).map_err(SqliteError_into)?,
                    source_run_id.as_ref().map(RunId::as_str),
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(run_id)
    }

    fn complete_run(&self, run_id: &RunId) -> Result<(), StoreError> {
        self.finish_run(run_id, RunStatus::Completed)
    }

    fn fail_run(&self, run_id: &RunId) -> Result<(), StoreError> {
        self.finish_run(run_id, RunStatus::Failed)
    }

    fn register_node(
        &self,
        run_id: &RunId,
        label: &str,
        node_type: NodeType,
        plugin_name: &str,
        plugin_version: &str,
        config_hash: &str,
        determinism: Determinism,
    ) -> Result<NodeId, StoreError> {
        let node_id = NodeId::from_raw(generate_id());
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO nodes (node_id, run_id, label, node_type, plugin_name, \
                 plugin_version, config_hash, determinism) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    node_id.as_str(),
                    run_id.as_str(),
                    label,
                    enum_to_text(&node_type).map_err(SqliteError_into)?,
                    plugin_name,
                    plugin_version,
                    config_hash,
                    enum_to_text(&determinism).map_err(SqliteError_into)?,
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(node_id)
    }

    fn register_edge(
        &self,
        run_id: &RunId,
        from_node_id: &NodeId,
        to_node_id: &NodeId,
        route_label: Option<String>,
    ) -> Result<EdgeId, StoreError> {
        let edge_id = EdgeId::from_raw(generate_id());
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO edges (edge_id, run_id, from_node_id, to_node_id, route_label) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![edge_id.as_str(), run_id.as_str(), from_node_id.as_str(), to_node_id.as_str(), route_label],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(edge_id)
    }

    fn create_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        input_hash: &str,
        source_data_ref: Option<String>,
    ) -> Result<RowId, StoreError> {
        let row_id = RowId::from_raw(generate_id());
        let row_index =
            i64::try_from(row_index).map_err(|_| StoreError::Invalid("row_index too large".to_string()))?;
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO rows_ (row_id, run_id, source_node_id, row_index, input_hash, \
                 source_data_ref, loaded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row_id.as_str(),
                    run_id.as_str(),
                    source_node_id.as_str(),
                    row_index,
                    input_hash,
                    source_data_ref,
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(row_id)
    }

    fn create_token(&self, run_id: &RunId, row_id: &RowId, origin_node_id: &NodeId) -> Result<TokenId, StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        insert_token(&guard, run_id, row_id, origin_node_id)
    }

    fn fork_token(
        &self,
        parent_token_id: &TokenId,
        origin_node_id: &NodeId,
        count: usize,
    ) -> Result<Vec<TokenId>, StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let (run_id, row_id) = run_and_row_for_token(&guard, parent_token_id)?;
        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            let child = insert_token(&guard, &run_id, &row_id, origin_node_id)?;
            insert_token_parent(&guard, &child, parent_token_id, TokenRelation::Fork)?;
            children.push(child);
        }
        Ok(children)
    }

    fn coalesce_tokens(&self, parent_token_ids: &[TokenId], origin_node_id: &NodeId) -> Result<TokenId, StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let Some(first) = parent_token_ids.first() else {
            return Err(StoreError::Invalid("coalesce_tokens requires at least one parent".to_string()));
        };
        let (run_id, row_id) = run_and_row_for_token(&guard, first)?;
        let child = insert_token(&guard, &run_id, &row_id, origin_node_id)?;
        for parent in parent_token_ids {
            insert_token_parent(&guard, &child, parent, TokenRelation::Coalesce)?;
        }
        Ok(child)
    }

    fn expand_token(
        &self,
        parent_token_ids: &[TokenId],
        origin_node_id: &NodeId,
        count: usize,
    ) -> Result<Vec<TokenId>, StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let Some(first) = parent_token_ids.first() else {
            return Err(StoreError::Invalid("expand_token requires at least one parent".to_string()));
        };
        let (run_id, row_id) = run_and_row_for_token(&guard, first)?;
        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            let child = insert_token(&guard, &run_id, &row_id, origin_node_id)?;
            for parent in parent_token_ids {
                insert_token_parent(&guard, &child, parent, TokenRelation::Expand)?;
            }
            children.push(child);
        }
        Ok(children)
    }

    #[allow(
        clippy::panic,
        clippy::panic_in_result_fn,
        reason = "non-dense attempt numbering is a Tier-1 invariant violation that aborts the process"
    )]
    fn begin_node_state(
        &self,
        token_id: &TokenId,
        node_id: &NodeId,
        attempt: u32,
        input_hash: &str,
        context_before_ref: Option<String>,
    ) -> Result<StateId, StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let existing: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM node_states WHERE token_id = ?1 AND node_id = ?2",
                params![token_id.as_str(), node_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        let expected = u32::try_from(existing).unwrap_or(u32::MAX);
        if attempt != expected {
            let node_label: String = guard
                .query_row("SELECT label FROM nodes WHERE node_id = ?1", params![node_id.as_str()], |row| row.get(0))
                .unwrap_or_else(|_| node_id.as_str().to_string());
            panic!(
                "{}",
                InvariantViolation::NonDenseAttemptNumbering {
                    token_id: token_id.as_str().to_string(),
                    node_label,
                    attempt,
                }
            );
        }
        let state_id = StateId::from_raw(generate_id());
        guard
            .execute(
                "INSERT INTO node_states (state_id, token_id, node_id, attempt, started_at, \
                 input_hash, context_before_ref, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    state_id.as_str(),
                    token_id.as_str(),
                    node_id.as_str(),
                    attempt,
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                    input_hash,
                    context_before_ref,
                    "open",
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(state_id)
    }

    fn complete_node_state(
        &self,
        state_id: &StateId,
        output_hash: &str,
        context_after_ref: Option<String>,
        duration_ms: u64,
    ) -> Result<(), StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let updated = guard
            .execute(
                "UPDATE node_states SET status = 'completed', completed_at = ?1, output_hash = \
                 ?2, context_after_ref = ?3, duration_ms = ?4 WHERE state_id = ?5 AND status = \
                 'open'",
                params![
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                    output_hash,
                    context_after_ref,
                    i64::try_from(duration_ms).unwrap_or(i64::MAX),
                    state_id.as_str(),
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        if updated == 0 {
            return Err(StoreError::Invalid(format!("node state {state_id} is not open")));
        }
        Ok(())
    }

    fn fail_node_state(&self, state_id: &StateId, error: ErrorDetail, duration_ms: u64) -> Result<(), StoreError> {
        let error_json = elspeth_core::hashing::canonical_json(&error)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let error_text =
            String::from_utf8(error_json).map_err(|err| StoreError::Invalid(err.to_string()))?;
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let updated = guard
            .execute(
                "UPDATE node_states SET status = 'failed', completed_at = ?1, error_json = ?2, \
                 duration_ms = ?3 WHERE state_id = ?4 AND status = 'open'",
                params![
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                    error_text,
                    i64::try_from(duration_ms).unwrap_or(i64::MAX),
                    state_id.as_str(),
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        if updated == 0 {
            return Err(StoreError::Invalid(format!("node state {state_id} is not open")));
        }
        Ok(())
    }

    #[allow(
        clippy::too_many_arguments,
        reason = "one field per column of the calls table; grouping them would obscure the mapping"
    )]
    fn record_call(
        &self,
        state_id: &StateId,
        call_type: CallType,
        endpoint: &str,
        started_at: Timestamp,
        completed_at: Timestamp,
        duration_ms: u64,
        status: CallStatus,
        request_hash: &str,
        response_hash: Option<String>,
        request_ref: Option<String>,
        response_ref: Option<String>,
        secret_fingerprint: Option<String>,
        attempt: u32,
        provider_request_id: Option<String>,
    ) -> Result<CallId, StoreError> {
        let call_id = CallId::from_raw(generate_id());
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO calls (call_id, state_id, call_type, endpoint, started_at, \
                 completed_at, duration_ms, status, request_hash, response_hash, request_ref, \
                 response_ref, secret_fingerprint, attempt, provider_request_id) VALUES (?1, ?2, \
                 ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    call_id.as_str(),
                    state_id.as_str(),
                    enum_to_text(&call_type).map_err(SqliteError_into)?,
                    endpoint,
                    timestamp_to_text(started_at).map_err(SqliteError_into)?,
                    timestamp_to_text(completed_at).map_err(SqliteError_into)?,
                    i64::try_from(duration_ms).unwrap_or(i64::MAX),
                    enum_to_text(&status).map_err(SqliteError_into)?,
                    request_hash,
                    response_hash,
                    request_ref,
                    response_ref,
                    secret_fingerprint,
                    attempt,
                    provider_request_id,
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(call_id)
    }

    fn record_routing_event(
        &self,
        state_id: &StateId,
        edge_id: &EdgeId,
        rule: RoutingKind,
        reason_ref: Option<String>,
        mode: RoutingMode,
    ) -> Result<RoutingEventId, StoreError> {
        let event_id = RoutingEventId::from_raw(generate_id());
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO routing_events (event_id, state_id, edge_id, decided_at, rule, \
                 reason_ref, mode) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event_id.as_str(),
                    state_id.as_str(),
                    edge_id.as_str(),
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                    enum_to_text(&rule).map_err(SqliteError_into)?,
                    reason_ref,
                    enum_to_text(&mode).map_err(SqliteError_into)?,
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(event_id)
    }

    fn record_artifact(
        &self,
        state_id: &StateId,
        kind: &str,
        uri: &str,
        content_hash: &str,
        size_bytes: u64,
    ) -> Result<ArtifactId, StoreError> {
        let artifact_id = ArtifactId::from_raw(generate_id());
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let run_id: String = guard
            .query_row(
                "SELECT runs.run_id FROM node_states JOIN tokens ON tokens.token_id = \
                 node_states.token_id JOIN runs ON runs.run_id = tokens.run_id WHERE \
                 node_states.state_id = ?1",
                params![state_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        guard
            .execute(
                "INSERT INTO artifacts (artifact_id, run_id, state_id, kind, uri, content_hash, \
                 size_bytes, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    artifact_id.as_str(),
                    run_id,
                    state_id.as_str(),
                    kind,
                    uri,
                    content_hash,
                    i64::try_from(size_bytes).unwrap_or(i64::MAX),
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(artifact_id)
    }

    #[allow(
        clippy::panic,
        clippy::panic_in_result_fn,
        reason = "a second terminal outcome for a token is a Tier-1 invariant violation that aborts the process"
    )]
    fn record_token_outcome(&self, run_id: &RunId, token_id: &TokenId, outcome: RowOutcome) -> Result<(), StoreError> {
        let outcome_id = OutcomeId::from_raw(generate_id());
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let result = guard.execute(
            "INSERT INTO token_outcomes (outcome_id, run_id, token_id, outcome, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                outcome_id.as_str(),
                run_id.as_str(),
                token_id.as_str(),
                enum_to_text(&outcome).map_err(SqliteError_into)?,
                timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(inner, _))
                if inner.code == rusqlite::ErrorCode::ConstraintViolation && outcome.is_terminal() =>
            {
                panic!(
                    "{}",
                    InvariantViolation::DuplicateTerminalOutcome { token_id: token_id.as_str().to_string() }
                )
            }
            Err(err) => Err(StoreError::from(SqliteError::from(err))),
        }
    }

    fn open_batch(&self, run_id: &RunId, node_id: &NodeId) -> Result<BatchId, StoreError> {
        let batch_id = BatchId::from_raw(generate_id());
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO batches (batch_id, run_id, node_id, status, opened_at, closed_at, \
                 trigger) VALUES (?1, ?2, ?3, 'open', ?4, NULL, NULL)",
                params![
                    batch_id.as_str(),
                    run_id.as_str(),
                    node_id.as_str(),
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(batch_id)
    }

    fn add_batch_member(&self, batch_id: &BatchId, token_id: &TokenId, position: u32) -> Result<(), StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO batch_members (batch_id, token_id, position) VALUES (?1, ?2, ?3)",
                params![batch_id.as_str(), token_id.as_str(), position],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(())
    }

    fn close_batch(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        trigger: Option<String>,
        outputs: &[TokenId],
    ) -> Result<(), StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute(
                "UPDATE batches SET status = ?1, closed_at = ?2, trigger = ?3 WHERE batch_id = \
                 ?4 AND status = 'open'",
                params![
                    enum_to_text(&status).map_err(SqliteError_into)?,
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                    trigger,
                    batch_id.as_str(),
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        for (position, token_id) in outputs.iter().enumerate() {
            let position =
                u32::try_from(position).map_err(|_| StoreError::Invalid("batch too large".to_string()))?;
            guard
                .execute(
                    "INSERT INTO batch_outputs (batch_id, token_id, position) VALUES (?1, ?2, ?3)",
                    params![batch_id.as_str(), token_id.as_str(), position],
                )
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        }
        Ok(())
    }

    fn write_checkpoint(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        node_id: &NodeId,
        sequence_number: u64,
        aggregation_state_ref: Option<String>,
        row_ref: Option<String>,
        route_label: Option<String>,
        coalesce_key: Option<String>,
    ) -> Result<CheckpointId, StoreError> {
        let checkpoint_id = CheckpointId::from_raw(generate_id());
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute(
                "INSERT INTO checkpoints (checkpoint_id, run_id, token_id, node_id, \
                 sequence_number, created_at, aggregation_state_ref, row_ref, route_label, \
                 coalesce_key) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    checkpoint_id.as_str(),
                    run_id.as_str(),
                    token_id.as_str(),
                    node_id.as_str(),
                    i64::try_from(sequence_number).unwrap_or(i64::MAX),
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                    aggregation_state_ref,
                    row_ref,
                    route_label,
                    coalesce_key,
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(checkpoint_id)
    }

    fn latest_checkpoint(&self, token_id: &TokenId) -> Result<Option<Checkpoint>, StoreError> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT checkpoint_id, run_id, token_id, node_id, sequence_number, created_at, \
                 aggregation_state_ref, row_ref, route_label, coalesce_key FROM checkpoints \
                 WHERE token_id = ?1 ORDER BY sequence_number DESC LIMIT 1",
                params![token_id.as_str()],
                map_checkpoint_row,
            )
            .optional()
            .map_err(|err| StoreError::from(SqliteError::from(err)))?
            .transpose()
        })
    }

    fn checkpoints_for_run(&self, run_id: &RunId) -> Result<Vec<Checkpoint>, StoreError> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT checkpoint_id, run_id, token_id, node_id, sequence_number, \
                     created_at, aggregation_state_ref, row_ref, route_label, coalesce_key \
                     FROM checkpoints WHERE run_id = ?1 ORDER BY sequence_number ASC",
                )
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            let rows: Vec<Result<Checkpoint, StoreError>> = stmt
                .query_map(params![run_id.as_str()], map_checkpoint_row)
                .map_err(|err| StoreError::from(SqliteError::from(err)))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            rows.into_iter().collect()
        })
    }

    fn delete_checkpoints(&self, run_id: &RunId) -> Result<(), StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        guard
            .execute("DELETE FROM checkpoints WHERE run_id = ?1", params![run_id.as_str()])
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(())
    }

    fn terminal_token_ids(&self, run_id: &RunId) -> Result<std::collections::BTreeSet<TokenId>, StoreError> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT token_id FROM token_outcomes WHERE run_id = ?1 AND outcome != 'buffered'")
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            let rows = stmt
                .query_map(params![run_id.as_str()], |row| row.get::<_, String>(0))
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            rows.map(|row| row.map(TokenId::from_raw).map_err(|err| StoreError::from(SqliteError::from(err))))
                .collect()
        })
    }

    fn reopen_failed_run(&self, run_id: &RunId) -> Result<(), StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let updated = guard
            .execute(
                "UPDATE runs SET status = ?1, completed_at = NULL WHERE run_id = ?2 AND status = ?3",
                params![
                    enum_to_text(&RunStatus::Running).map_err(SqliteError_into)?,
                    run_id.as_str(),
                    enum_to_text(&RunStatus::Failed).map_err(SqliteError_into)?,
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        if updated == 0 {
            return Err(StoreError::Invalid(format!("run {run_id} is not in a failed state")));
        }
        Ok(())
    }

    fn explain(&self, row_id: &RowId) -> Result<RowExplanation, StoreError> {
        self.with_reader(|conn| explain_row(conn, row_id))
    }

    fn get_call_response(&self, call_id: &CallId) -> Result<CallResponse, StoreError> {
        let response_hash: Option<String> = self.with_reader(|conn| {
            conn.query_row(
                "SELECT response_hash FROM calls WHERE call_id = ?1",
                params![call_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))
        })?;
        let body = match (response_hash, &self.payload_store) {
            (None, _) => RowDataResult::NeverStored,
            (Some(_), None) => RowDataResult::Purged,
            (Some(hash), Some(store)) => match store.get(&hash) {
                Ok(bytes) => RowDataResult::Available { bytes },
                Err(elspeth_payload::PayloadError::Io(_)) => RowDataResult::Purged,
                Err(err) => return Err(StoreError::Corrupt(err.to_string())),
            },
        };
        Ok(CallResponse { call_id: call_id.clone(), body })
    }

    fn purge(&self, as_of: Timestamp) -> Result<PurgeReport, StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let as_of_text = timestamp_to_text(as_of).map_err(SqliteError_into)?;
        let mut stmt = guard
            .prepare(
                "SELECT run_id FROM runs WHERE status = 'completed' AND completed_at <= ?1 \
                 ORDER BY completed_at ASC",
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        let run_ids: Vec<String> = stmt
            .query_map(params![as_of_text], |row| row.get(0))
            .map_err(|err| StoreError::from(SqliteError::from(err)))?
            .collect::<Result<_, _>>()
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        drop(stmt);

        let mut payloads_deleted = 0_u64;
        if let Some(store) = &self.payload_store {
            let mut hash_stmt = guard
                .prepare(
                    "SELECT response_hash FROM calls JOIN node_states ON node_states.state_id = \
                     calls.state_id JOIN tokens ON tokens.token_id = node_states.token_id WHERE \
                     tokens.run_id = ?1 AND response_hash IS NOT NULL",
                )
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            for run_id in &run_ids {
                let hashes: Vec<String> = hash_stmt
                    .query_map(params![run_id], |row| row.get(0))
                    .map_err(|err| StoreError::from(SqliteError::from(err)))?
                    .collect::<Result<_, _>>()
                    .map_err(|err| StoreError::from(SqliteError::from(err)))?;
                for hash in hashes {
                    store.delete(&hash).map_err(|err| StoreError::Io(err.to_string()))?;
                    payloads_deleted += 1;
                }
            }
        }

        let checkpoints_deleted = guard
            .execute(
                "DELETE FROM checkpoints WHERE run_id IN (SELECT run_id FROM runs WHERE status = \
                 'completed' AND completed_at <= ?1)",
                params![as_of_text],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(PurgeReport {
            payloads_deleted,
            checkpoints_deleted: u64::try_from(checkpoints_deleted).unwrap_or(u64::MAX),
            runs_purged: run_ids.into_iter().map(RunId::from_raw).collect(),
        })
    }
}

impl SqliteRecorder {
    /// Shared implementation for `complete_run`/`fail_run`.
    fn finish_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Store("writer mutex poisoned".to_string()))?;
        let updated = guard
            .execute(
                "UPDATE runs SET status = ?1, completed_at = ?2 WHERE run_id = ?3 AND status = \
                 'running'",
                params![
                    enum_to_text(&status).map_err(SqliteError_into)?,
                    timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
                    run_id.as_str(),
                ],
            )
            .map_err(|err| StoreError::from(SqliteError::from(err)))?;
        if updated == 0 {
            return Err(StoreError::Invalid(format!("run {run_id} is not running")));
        }
        Ok(())
    }

    /// Returns every row id belonging to `run_id`, ordered by `row_index`.
    ///
    /// Used by the export pipeline to enumerate a full run's lineage;
    /// not part of the [`Recorder`] trait since no scheduler or executor
    /// needs it mid-run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn row_ids_for_run(&self, run_id: &RunId) -> Result<Vec<RowId>, StoreError> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare("SELECT row_id FROM rows_ WHERE run_id = ?1 ORDER BY row_index ASC")
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            let rows = stmt
                .query_map(params![run_id.as_str()], |row| row.get::<_, String>(0))
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            rows.map(|row| row.map(RowId::from_raw).map_err(|err| StoreError::from(SqliteError::from(err))))
                .collect()
        })
    }

    /// Returns every node registered for `run_id`, for rebuilding the
    /// `Graph` a resumed run walks without re-registering it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn nodes_for_run(&self, run_id: &RunId) -> Result<Vec<elspeth_core::Node>, StoreError> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT node_id, run_id, label, node_type, plugin_name, plugin_version, \
                     config_hash, determinism FROM nodes WHERE run_id = ?1",
                )
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            let rows: Vec<Result<elspeth_core::Node, StoreError>> = stmt
                .query_map(params![run_id.as_str()], |row| {
                    let node_type: String = row.get(3)?;
                    let determinism: String = row.get(7)?;
                    Ok((|| -> Result<elspeth_core::Node, StoreError> {
                        Ok(elspeth_core::Node {
                            node_id: NodeId::from_raw(row.get::<_, String>(0)?),
                            run_id: RunId::from_raw(row.get::<_, String>(1)?),
                            label: row.get(2)?,
                            node_type: text_to_enum(&node_type).map_err(SqliteError_into)?,
                            plugin_name: row.get(4)?,
                            plugin_version: row.get(5)?,
                            config_hash: row.get(6)?,
                            determinism: text_to_enum(&determinism).map_err(SqliteError_into)?,
                        })
                    })())
                })
                .map_err(|err| StoreError::from(SqliteError::from(err)))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            rows.into_iter().collect()
        })
    }

    /// Returns every edge registered for `run_id`, for rebuilding the
    /// `Graph` a resumed run walks without re-registering it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn edges_for_run(&self, run_id: &RunId) -> Result<Vec<elspeth_core::Edge>, StoreError> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare("SELECT edge_id, run_id, from_node_id, to_node_id, route_label FROM edges WHERE run_id = ?1")
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            let rows: Vec<Result<elspeth_core::Edge, StoreError>> = stmt
                .query_map(params![run_id.as_str()], |row| {
                    Ok((|| -> Result<elspeth_core::Edge, StoreError> {
                        Ok(elspeth_core::Edge {
                            edge_id: EdgeId::from_raw(row.get::<_, String>(0)?),
                            run_id: RunId::from_raw(row.get::<_, String>(1)?),
                            from_node_id: NodeId::from_raw(row.get::<_, String>(2)?),
                            to_node_id: NodeId::from_raw(row.get::<_, String>(3)?),
                            route_label: row.get(4)?,
                        })
                    })())
                })
                .map_err(|err| StoreError::from(SqliteError::from(err)))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            rows.into_iter().collect()
        })
    }
}

/// Inserts a fresh token row.
fn insert_token(conn: &Connection, run_id: &RunId, row_id: &RowId, origin_node_id: &NodeId) -> Result<TokenId, StoreError> {
    let token_id = TokenId::from_raw(generate_id());
    conn.execute(
        "INSERT INTO tokens (token_id, run_id, row_id, created_at, origin_node_id) VALUES \
         (?1, ?2, ?3, ?4, ?5)",
        params![
            token_id.as_str(),
            run_id.as_str(),
            row_id.as_str(),
            timestamp_to_text(Timestamp::now()).map_err(SqliteError_into)?,
            origin_node_id.as_str(),
        ],
    )
    .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    Ok(token_id)
}

/// Records one parent/child edge in the token lineage DAG.
fn insert_token_parent(
    conn: &Connection,
    token_id: &TokenId,
    parent_token_id: &TokenId,
    relation: TokenRelation,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO token_parents (token_id, parent_token_id, relation) VALUES (?1, ?2, ?3)",
        params![token_id.as_str(), parent_token_id.as_str(), enum_to_text(&relation).map_err(SqliteError_into)?],
    )
    .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    Ok(())
}

/// Looks up the `(run_id, row_id)` pair a token belongs to, needed so
/// fork/coalesce/expand can stamp the same pair onto derived children.
fn run_and_row_for_token(conn: &Connection, token_id: &TokenId) -> Result<(RunId, RowId), StoreError> {
    conn.query_row(
        "SELECT run_id, row_id FROM tokens WHERE token_id = ?1",
        params![token_id.as_str()],
        |row| {
            let run_id: String = row.get(0)?;
            let row_id: String = row.get(1)?;
            Ok((RunId::from_raw(run_id), RowId::from_raw(row_id)))
        },
    )
    .map_err(|err| StoreError::from(SqliteError::from(err)))
}

/// Maps one `checkpoints` row into a `Checkpoint`.
fn map_checkpoint_row(row: &SqlRow<'_>) -> rusqlite::Result<Result<Checkpoint, StoreError>> {
    let checkpoint_id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let token_id: String = row.get(2)?;
    let node_id: String = row.get(3)?;
    let sequence_number: i64 = row.get(4)?;
    let created_at: String = row.get(5)?;
    let aggregation_state_ref: Option<String> = row.get(6)?;
    let row_ref: Option<String> = row.get(7)?;
    let route_label: Option<String> = row.get(8)?;
    let coalesce_key: Option<String> = row.get(9)?;
    Ok((|| -> Result<Checkpoint, StoreError> {
        Ok(Checkpoint {
            checkpoint_id: CheckpointId::from_raw(checkpoint_id),
            run_id: RunId::from_raw(run_id),
            token_id: TokenId::from_raw(token_id),
            node_id: NodeId::from_raw(node_id),
            sequence_number: u64::try_from(sequence_number).unwrap_or_default(),
            created_at: timestamp_from_text(&created_at).map_err(SqliteError_into)?,
            aggregation_state_ref,
            row_ref,
            route_label,
            coalesce_key,
        })
    })())
}

/// Assembles the full lineage DAG rooted at a row (§4.5's `explain`
/// query), walking `token_parents` breadth-first from the row's own
/// tokens.
fn explain_row(conn: &Connection, row_id: &RowId) -> Result<RowExplanation, StoreError> {
    let row = conn
        .query_row(
            "SELECT row_id, run_id, source_node_id, row_index, input_hash, source_data_ref, \
             loaded_at FROM rows_ WHERE row_id = ?1",
            params![row_id.as_str()],
            |sql_row| {
                let row_index: i64 = sql_row.get(3)?;
                let loaded_at: String = sql_row.get(6)?;
                Ok((
                    sql_row.get::<_, String>(0)?,
                    sql_row.get::<_, String>(1)?,
                    sql_row.get::<_, String>(2)?,
                    row_index,
                    sql_row.get::<_, String>(4)?,
                    sql_row.get::<_, Option<String>>(5)?,
                    loaded_at,
                ))
            },
        )
        .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    let row = Row {
        row_id: RowId::from_raw(row.0),
        run_id: RunId::from_raw(row.1),
        source_node_id: NodeId::from_raw(row.2),
        row_index: u64::try_from(row.3).unwrap_or_default(),
        input_hash: row.4,
        source_data_ref: row.5,
        loaded_at: timestamp_from_text(&row.6).map_err(SqliteError_into)?,
    };

    let mut token_ids: Vec<String> = conn
        .prepare("SELECT token_id FROM tokens WHERE row_id = ?1")
        .and_then(|mut stmt| stmt.query_map(params![row_id.as_str()], |r| r.get(0))?.collect())
        .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    let mut seen: std::collections::BTreeSet<String> = token_ids.iter().cloned().collect();
    let mut frontier = token_ids.clone();
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for token_id in &frontier {
            let children: Vec<String> = conn
                .prepare("SELECT token_id FROM token_parents WHERE parent_token_id = ?1")
                .and_then(|mut stmt| stmt.query_map(params![token_id], |r| r.get(0))?.collect())
                .map_err(|err| StoreError::from(SqliteError::from(err)))?;
            for child in children {
                if seen.insert(child.clone()) {
                    next.push(child.clone());
                    token_ids.push(child);
                }
            }
        }
        frontier = next;
    }

    let mut tokens = Vec::new();
    let mut states = Vec::new();
    let mut calls = Vec::new();
    let mut routing_events = Vec::new();
    let mut artifacts = Vec::new();
    let mut outcomes = Vec::new();
    for token_id in &token_ids {
        tokens.push(load_token(conn, token_id)?);
        let mut token_states = load_states_for_token(conn, token_id)?;
        for state in &token_states {
            let state_id = state.state_id().as_str().to_string();
            calls.extend(load_calls_for_state(conn, &state_id)?);
            routing_events.extend(load_routing_events_for_state(conn, &state_id)?);
            artifacts.extend(load_artifacts_for_state(conn, &state_id)?);
        }
        states.append(&mut token_states);
        if let Some(outcome) = load_outcome_for_token(conn, token_id)? {
            outcomes.push(outcome);
        }
    }

    Ok(RowExplanation { row, tokens, states, calls, routing_events, artifacts, outcomes })
}

/// Loads one `Token` by id.
fn load_token(conn: &Connection, token_id: &str) -> Result<Token, StoreError> {
    conn.query_row(
        "SELECT token_id, run_id, row_id, created_at, origin_node_id FROM tokens WHERE \
         token_id = ?1",
        params![token_id],
        |row| {
            let created_at: String = row.get(3)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                created_at,
                row.get::<_, String>(4)?,
            ))
        },
    )
    .map_err(|err| StoreError::from(SqliteError::from(err)))
    .and_then(|(token_id, run_id, row_id, created_at, origin_node_id)| {
        Ok(Token {
            token_id: TokenId::from_raw(token_id),
            run_id: RunId::from_raw(run_id),
            row_id: RowId::from_raw(row_id),
            created_at: timestamp_from_text(&created_at).map_err(SqliteError_into)?,
            origin_node_id: NodeId::from_raw(origin_node_id),
        })
    })
}

/// Loads every `NodeState` recorded for a token, oldest attempt first.
fn load_states_for_token(conn: &Connection, token_id: &str) -> Result<Vec<NodeState>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT state_id, token_id, node_id, attempt, started_at, input_hash, \
             context_before_ref, status, completed_at, output_hash, context_after_ref, \
             duration_ms, error_json FROM node_states WHERE token_id = ?1 ORDER BY attempt ASC",
        )
        .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    let rows: Vec<Result<NodeState, StoreError>> = stmt
        .query_map(params![token_id], map_node_state_columns)
        .map_err(|err| StoreError::from(SqliteError::from(err)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    rows.into_iter().collect()
}

/// Columns shared by every `node_states` row, before discrimination on
/// `status`.
#[allow(
    clippy::type_complexity,
    reason = "a row tuple wider than usual; splitting it would only move the width"
)]
#[allow(
    clippy::panic,
    clippy::panic_in_result_fn,
    reason = "a completed node state with no output_hash is a Tier-1 invariant violation that aborts the process"
)]
fn map_node_state_columns(
    row: &SqlRow<'_>,
) -> rusqlite::Result<Result<NodeState, StoreError>> {
    let state_id: String = row.get(0)?;
    let token_id: String = row.get(1)?;
    let node_id: String = row.get(2)?;
    let attempt: u32 = row.get(3)?;
    let started_at: String = row.get(4)?;
    let input_hash: String = row.get(5)?;
    let context_before_ref: Option<String> = row.get(6)?;
    let status: String = row.get(7)?;
    let completed_at: Option<String> = row.get(8)?;
    let output_hash: Option<String> = row.get(9)?;
    let context_after_ref: Option<String> = row.get(10)?;
    let duration_ms: Option<i64> = row.get(11)?;
    let error_json: Option<String> = row.get(12)?;
    Ok((|| -> Result<NodeState, StoreError> {
        let common = NodeStateCommon {
            state_id: StateId::from_raw(state_id.clone()),
            token_id: TokenId::from_raw(token_id),
            node_id: NodeId::from_raw(node_id),
            attempt,
            started_at: timestamp_from_text(&started_at).map_err(SqliteError_into)?,
            input_hash,
            context_before_ref,
        };
        match status.as_str() {
            "open" => Ok(NodeState::Open { common }),
            "completed" => {
                let Some(output_hash) = output_hash else {
                    panic!("{}", InvariantViolation::CompletedStateMissingOutputHash { state_id });
                };
                Ok(NodeState::Completed {
                    common,
                    completed_at: timestamp_from_text(&completed_at.unwrap_or_default()).map_err(SqliteError_into)?,
                    output_hash,
                    context_after_ref,
                    duration_ms: duration_ms.map(|value| u64::try_from(value).unwrap_or_default()).unwrap_or_default(),
                })
            }
            "failed" => {
                let error_json = error_json
                    .ok_or_else(|| StoreError::Corrupt(format!("failed node state {state_id} has no error_json")))?;
                let error: ErrorDetail =
                    serde_json::from_str(&error_json).map_err(|err| StoreError::Corrupt(err.to_string()))?;
                Ok(NodeState::Failed {
                    common,
                    completed_at: timestamp_from_text(&completed_at.unwrap_or_default()).map_err(SqliteError_into)?,
                    error_json: error,
                    duration_ms: duration_ms.map(|value| u64::try_from(value).unwrap_or_default()).unwrap_or_default(),
                })
            }
            other => Err(StoreError::Corrupt(format!("unknown node state status {other:?}"))),
        }
    })())
}

/// Loads every `Call` recorded against one `NodeState`.
fn load_calls_for_state(conn: &Connection, state_id: &str) -> Result<Vec<Call>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT call_id, state_id, call_type, endpoint, started_at, completed_at, \
             duration_ms, status, request_hash, response_hash, request_ref, response_ref, \
             secret_fingerprint, attempt, provider_request_id FROM calls WHERE state_id = ?1 \
             ORDER BY attempt ASC",
        )
        .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    let rows = stmt
        .query_map(params![state_id], |row| {
            let started_at: String = row.get(4)?;
            let completed_at: String = row.get(5)?;
            let duration_ms: i64 = row.get(6)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                started_at,
                completed_at,
                duration_ms,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, Option<String>>(12)?,
                row.get::<_, u32>(13)?,
                row.get::<_, Option<String>>(14)?,
            ))
        })
        .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    rows.map(|row| {
        let row = row.map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(Call {
            call_id: CallId::from_raw(row.0),
            state_id: StateId::from_raw(row.1),
            call_type: text_to_enum(&row.2).map_err(SqliteError_into)?,
            endpoint: row.3,
            started_at: timestamp_from_text(&row.4).map_err(SqliteError_into)?,
            completed_at: timestamp_from_text(&row.5).map_err(SqliteError_into)?,
            duration_ms: u64::try_from(row.6).unwrap_or_default(),
            status: text_to_enum(&row.7).map_err(SqliteError_into)?,
            request_hash: row.8,
            response_hash: row.9,
            request_ref: row.10,
            response_ref: row.11,
            secret_fingerprint: row.12,
            attempt: row.13,
            provider_request_id: row.14,
        })
    })
    .collect()
}

/// Loads every `RoutingEvent` recorded against one `NodeState`.
fn load_routing_events_for_state(conn: &Connection, state_id: &str) -> Result<Vec<RoutingEvent>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT event_id, state_id, edge_id, decided_at, rule, reason_ref, mode FROM \
             routing_events WHERE state_id = ?1",
        )
        .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    let rows = stmt
        .query_map(params![state_id], |row| {
            let decided_at: String = row.get(3)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                decided_at,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    rows.map(|row| {
        let row = row.map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(RoutingEvent {
            event_id: RoutingEventId::from_raw(row.0),
            state_id: StateId::from_raw(row.1),
            edge_id: EdgeId::from_raw(row.2),
            decided_at: timestamp_from_text(&row.3).map_err(SqliteError_into)?,
            rule: text_to_enum(&row.4).map_err(SqliteError_into)?,
            reason_ref: row.5,
            mode: text_to_enum(&row.6).map_err(SqliteError_into)?,
        })
    })
    .collect()
}

/// Loads every `Artifact` recorded against one `NodeState`.
fn load_artifacts_for_state(conn: &Connection, state_id: &str) -> Result<Vec<Artifact>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT artifact_id, run_id, state_id, kind, uri, content_hash, size_bytes, \
             created_at FROM artifacts WHERE state_id = ?1",
        )
        .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    let rows = stmt
        .query_map(params![state_id], |row| {
            let size_bytes: i64 = row.get(6)?;
            let created_at: String = row.get(7)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                size_bytes,
                created_at,
            ))
        })
        .map_err(|err| StoreError::from(SqliteError::from(err)))?;
    rows.map(|row| {
        let row = row.map_err(|err| StoreError::from(SqliteError::from(err)))?;
        Ok(Artifact {
            artifact_id: ArtifactId::from_raw(row.0),
            run_id: RunId::from_raw(row.1),
            state_id: StateId::from_raw(row.2),
            kind: row.3,
            uri: row.4,
            content_hash: row.5,
            size_bytes: u64::try_from(row.6).unwrap_or_default(),
            created_at: timestamp_from_text(&row.7).map_err(SqliteError_into)?,
        })
    })
    .collect()
}

/// Loads the terminal outcome recorded for a token, if any.
fn load_outcome_for_token(conn: &Connection, token_id: &str) -> Result<Option<TokenOutcome>, StoreError> {
    conn.query_row(
        "SELECT outcome_id, run_id, token_id, outcome, recorded_at FROM token_outcomes WHERE \
         token_id = ?1 AND outcome != 'buffered' LIMIT 1",
        params![token_id],
        |row| {
            let recorded_at: String = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                recorded_at,
            ))
        },
    )
    .optional()
    .map_err(|err| StoreError::from(SqliteError::from(err)))?
    .map(|(outcome_id, run_id, token_id, outcome, recorded_at)| {
        Ok(TokenOutcome {
            outcome_id: OutcomeId::from_raw(outcome_id),
            run_id: RunId::from_raw(run_id),
            token_id: TokenId::from_raw(token_id),
            outcome: text_to_enum(&outcome).map_err(SqliteError_into)?,
            recorded_at: timestamp_from_text(&recorded_at).map_err(SqliteError_into)?,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use elspeth_core::Recorder as _;

    use super::*;
    use crate::config::SqliteRecorderConfig;

    fn open_test_recorder() -> (tempfile::TempDir, SqliteRecorder) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SqliteRecorderConfig {
            path: dir.path().join("audit.sqlite3"),
            busy_timeout_ms: 1_000,
            journal_mode: crate::config::SqliteJournalMode::Wal,
            sync_mode: crate::config::SqliteSyncMode::Normal,
            read_pool_size: 2,
            payload_root: Some(dir.path().join("payloads")),
        };
        let recorder = SqliteRecorder::open(&config).expect("open recorder");
        (dir, recorder)
    }

    #[test]
    fn begin_run_round_trips_mode_and_fingerprint() {
        let (_dir, recorder) = open_test_recorder();
        let run_id = recorder.begin_run("fingerprint".to_string(), RunMode::Live, None).expect("begin run");
        assert!(!run_id.as_str().is_empty());
    }

    #[test]
    fn explain_returns_lineage_for_a_completed_token() {
        let (_dir, recorder) = open_test_recorder();
        let run_id = recorder.begin_run("fp".to_string(), RunMode::Live, None).expect("begin run");
        let node_id = recorder
            .register_node(&run_id, "source", NodeType::Source, "csv", "1.0.0", "cfg-hash", Determinism::Deterministic)
            .expect("register node");
        let row_id = recorder.create_row(&run_id, &node_id, 0, "input-hash", None).expect("create row");
        let token_id = recorder.create_token(&run_id, &row_id, &node_id).expect("create token");
        let state_id = recorder.begin_node_state(&token_id, &node_id, 0, "input-hash", None).expect("begin state");
        recorder.complete_node_state(&state_id, "output-hash", None, 5).expect("complete state");
        recorder.record_token_outcome(&run_id, &token_id, RowOutcome::Completed).expect("record outcome");

        let explanation = recorder.explain(&row_id).expect("explain");
        assert_eq!(explanation.tokens.len(), 1);
        assert_eq!(explanation.states.len(), 1);
        assert_eq!(explanation.outcomes.len(), 1);
    }

    #[test]
    #[should_panic(expected = "non-dense attempt numbering")]
    fn begin_node_state_rejects_non_dense_attempt() {
        let (_dir, recorder) = open_test_recorder();
        let run_id = recorder.begin_run("fp".to_string(), RunMode::Live, None).expect("begin run");
        let node_id = recorder
            .register_node(&run_id, "source", NodeType::Source, "csv", "1.0.0", "cfg-hash", Determinism::Deterministic)
            .expect("register node");
        let row_id = recorder.create_row(&run_id, &node_id, 0, "input-hash", None).expect("create row");
        let token_id = recorder.create_token(&run_id, &row_id, &node_id).expect("create token");
        let _ = recorder.begin_node_state(&token_id, &node_id, 5, "input-hash", None);
    }
}
