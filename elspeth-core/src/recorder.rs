// elspeth-core/src/recorder.rs
// ============================================================================
// Module: Audit Recorder Contract
// Description: The `Recorder` trait every persistence backend implements,
//              plus the errors and query result shapes it returns (§4.5).
// Purpose: Give the scheduler and every executor one seam for turning a
//          state transition into a durable, queryable audit record, so a
//          backend (SQLite today) can be swapped without touching §4.1/§4.9
//          logic.
// Dependencies: crate::{entities, enums, identifiers, interfaces, time}
// ============================================================================

//! ## Overview
//! `Recorder` is deliberately synchronous: every method is a short,
//! transactional write or read against the audit database, and the default
//! scheduler is single-threaded (§5), so there is nothing to gain from an
//! async seam here. Executors bracket a plugin call with paired
//! `begin_*`/`complete_*`/`fail_*` calls so an "open" row is durable and
//! visible even if the process crashes mid-operation.

use serde::Serialize;
use thiserror::Error;

use crate::entities::Artifact;
use crate::entities::Call;
use crate::entities::Checkpoint;
use crate::entities::ErrorDetail;
use crate::entities::NodeState;
use crate::entities::Row;
use crate::entities::RoutingEvent;
use crate::entities::Token;
use crate::entities::TokenOutcome;
use crate::enums::BatchStatus;
use crate::enums::CallStatus;
use crate::enums::CallType;
use crate::enums::Determinism;
use crate::enums::NodeType;
use crate::enums::RoutingKind;
use crate::enums::RoutingMode;
use crate::enums::RowOutcome;
use crate::enums::RunMode;
use crate::enums::TokenRelation;
use crate::identifiers::ArtifactId;
use crate::identifiers::BatchId;
use crate::identifiers::CallId;
use crate::identifiers::CheckpointId;
use crate::identifiers::EdgeId;
use crate::identifiers::NodeId;
use crate::identifiers::RowId;
use crate::identifiers::RoutingEventId;
use crate::identifiers::RunId;
use crate::identifiers::StateId;
use crate::identifiers::TokenId;
use crate::interfaces::RowDataResult;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by a `Recorder` implementation.
///
/// These are the Tier-1 boundary for the audit database itself: a
/// `Corrupt`/`VersionMismatch` result here means the audit trail cannot be
/// trusted, and callers are expected to treat it as fatal rather than
/// retried or coerced.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be read or written due to an I/O failure.
    #[error("store io error: {0}")]
    Io(String),
    /// The underlying storage engine reported an error.
    #[error("store error: {0}")]
    Store(String),
    /// Stored data failed an integrity check (hash mismatch, impossible
    /// enum value, missing required field on a terminal record).
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// The store's schema version does not match what this build expects.
    #[error("store schema version mismatch: {0}")]
    VersionMismatch(String),
    /// The caller supplied a value the store will not persist (oversized
    /// payload, malformed identifier, violated invariant).
    #[error("invalid store operation: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Query Result Shapes
// ============================================================================

/// The full lineage rooted at one `Row`: every token, state, call, routing
/// event, and artifact descended from it, returned by `Recorder::explain`.
#[derive(Debug, Clone, Serialize)]
pub struct RowExplanation {
    /// The row this explanation is rooted at.
    pub row: Row,
    /// Every token descended from this row, including the root tokens.
    pub tokens: Vec<Token>,
    /// Every `NodeState` attempt recorded against any of `tokens`.
    pub states: Vec<NodeState>,
    /// Every external call made during any of `states`.
    pub calls: Vec<Call>,
    /// Every routing decision made for any of `tokens`.
    pub routing_events: Vec<RoutingEvent>,
    /// Every artifact produced for any of `tokens`.
    pub artifacts: Vec<Artifact>,
    /// The terminal outcome recorded for each token, if reached.
    pub outcomes: Vec<TokenOutcome>,
}

/// The result of resolving a prior call's response, for replay/verify
/// dispatch and the `explain`/`get_call_response` CLI surface.
#[derive(Debug, Clone, Serialize)]
pub struct CallResponse {
    /// The call this response belongs to.
    pub call_id: CallId,
    /// The resolved response body, or a tier-3 degradation signal.
    pub body: RowDataResult,
}

/// A summary of one purge sweep (`Recorder::purge`), naming what was
/// dropped so operators can audit retention decisions after the fact.
#[derive(Debug, Clone, Default)]
pub struct PurgeReport {
    /// Number of payload-store blobs deleted.
    pub payloads_deleted: u64,
    /// Number of checkpoints deleted (normally zero outside of `resume`;
    /// `purge` only removes checkpoints belonging to completed runs).
    pub checkpoints_deleted: u64,
    /// Runs whose payloads were swept, oldest first.
    pub runs_purged: Vec<RunId>,
}

// ============================================================================
// SECTION: Recorder Trait
// ============================================================================

/// The audit recorder contract (§4.5): append-only, begin/complete paired,
/// fail-closed on read.
pub trait Recorder: Send + Sync {
    /// Begins a new run, returning its freshly assigned identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the run cannot be durably recorded.
    fn begin_run(
        &self,
        config_fingerprint: String,
        mode: RunMode,
        source_run_id: Option<RunId>,
    ) -> Result<RunId, StoreError>;

    /// Marks a run `completed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the run is unknown or already terminal.
    fn complete_run(&self, run_id: &RunId) -> Result<(), StoreError>;

    /// Marks a run `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the run is unknown or already terminal.
    fn fail_run(&self, run_id: &RunId) -> Result<(), StoreError>;

    /// Registers one DAG node for a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the label is already registered for this
    /// run.
    #[allow(clippy::too_many_arguments)]
    fn register_node(
        &self,
        run_id: &RunId,
        label: &str,
        node_type: NodeType,
        plugin_name: &str,
        plugin_version: &str,
        config_hash: &str,
        determinism: Determinism,
    ) -> Result<NodeId, StoreError>;

    /// Registers one DAG edge for a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if either endpoint is unknown.
    fn register_edge(
        &self,
        run_id: &RunId,
        from_node_id: &NodeId,
        to_node_id: &NodeId,
        route_label: Option<String>,
    ) -> Result<EdgeId, StoreError>;

    /// Records a freshly loaded source row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the row cannot be durably recorded.
    fn create_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        input_hash: &str,
        source_data_ref: Option<String>,
    ) -> Result<RowId, StoreError>;

    /// Creates the first token for a row, at ingest.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the row is unknown.
    fn create_token(
        &self,
        run_id: &RunId,
        row_id: &RowId,
        origin_node_id: &NodeId,
    ) -> Result<TokenId, StoreError>;

    /// Forks one parent token into `n` children at a gate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the parent is unknown or already terminal.
    fn fork_token(
        &self,
        parent_token_id: &TokenId,
        origin_node_id: &NodeId,
        count: usize,
    ) -> Result<Vec<TokenId>, StoreError>;

    /// Merges several parent tokens into one child at a coalesce barrier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any parent is unknown.
    fn coalesce_tokens(
        &self,
        parent_token_ids: &[TokenId],
        origin_node_id: &NodeId,
    ) -> Result<TokenId, StoreError>;

    /// Expands one parent token (an aggregation batch input) into `n`
    /// output children at flush.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any parent is unknown.
    fn expand_token(
        &self,
        parent_token_ids: &[TokenId],
        origin_node_id: &NodeId,
        count: usize,
    ) -> Result<Vec<TokenId>, StoreError>;

    /// Opens a new `NodeState` attempt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `attempt` would violate dense numbering
    /// (invariant 8).
    fn begin_node_state(
        &self,
        token_id: &TokenId,
        node_id: &NodeId,
        attempt: u32,
        input_hash: &str,
        context_before_ref: Option<String>,
    ) -> Result<StateId, StoreError>;

    /// Completes an open `NodeState` successfully.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `state_id` is unknown or not `Open`.
    fn complete_node_state(
        &self,
        state_id: &StateId,
        output_hash: &str,
        context_after_ref: Option<String>,
        duration_ms: u64,
    ) -> Result<(), StoreError>;

    /// Fails an open `NodeState`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `state_id` is unknown or not `Open`.
    fn fail_node_state(
        &self,
        state_id: &StateId,
        error: ErrorDetail,
        duration_ms: u64,
    ) -> Result<(), StoreError>;

    /// Records one external call attempt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `state_id` is unknown.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<CallId, StoreError>;

    /// Records one gate routing decision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `state_id` or `edge_id` is unknown.
    fn record_routing_event(
        &self,
        state_id: &StateId,
        edge_id: &EdgeId,
        rule: RoutingKind,
        reason_ref: Option<String>,
        mode: RoutingMode,
    ) -> Result<RoutingEventId, StoreError>;

    /// Records one artifact produced by a sink.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `state_id` is unknown.
    fn record_artifact(
        &self,
        state_id: &StateId,
        kind: &str,
        uri: &str,
        content_hash: &str,
        size_bytes: u64,
    ) -> Result<ArtifactId, StoreError>;

    /// Records a token's terminal classification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a terminal outcome is already recorded for
    /// this token (invariant 2).
    fn record_token_outcome(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        outcome: RowOutcome,
    ) -> Result<(), StoreError>;

    /// Opens a new aggregation batch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the node is unknown.
    fn open_batch(&self, run_id: &RunId, node_id: &NodeId) -> Result<BatchId, StoreError>;

    /// Appends one token to an open batch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the batch is unknown or already closed.
    fn add_batch_member(
        &self,
        batch_id: &BatchId,
        token_id: &TokenId,
        position: u32,
    ) -> Result<(), StoreError>;

    /// Closes a batch, recording its outputs and trigger.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the batch is unknown or already closed.
    fn close_batch(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        trigger: Option<String>,
        outputs: &[TokenId],
    ) -> Result<(), StoreError>;

    /// Writes a checkpoint marking a safe restart boundary: the row and
    /// route label a token is about to continue with at `node_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write is not atomic with the state it
    /// follows.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<CheckpointId, StoreError>;

    /// Returns the latest checkpoint recorded for a token, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a read failure.
    fn latest_checkpoint(&self, token_id: &TokenId) -> Result<Option<Checkpoint>, StoreError>;

    /// Returns every checkpoint recorded for a run, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a read failure.
    fn checkpoints_for_run(&self, run_id: &RunId) -> Result<Vec<Checkpoint>, StoreError>;

    /// Deletes every checkpoint for a run, on successful completion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a write failure.
    fn delete_checkpoints(&self, run_id: &RunId) -> Result<(), StoreError>;

    /// Returns every token in `run_id` with a recorded terminal outcome
    /// (anything but `Buffered`), so a resumed run does not re-enqueue work
    /// that already reached a conclusion before the crash.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a read failure.
    fn terminal_token_ids(&self, run_id: &RunId) -> Result<std::collections::BTreeSet<TokenId>, StoreError>;

    /// Transitions a `failed` run back to `running`, the precondition for a
    /// resume.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] if the run is not currently `failed`.
    fn reopen_failed_run(&self, run_id: &RunId) -> Result<(), StoreError>;

    /// Returns the full lineage DAG rooted at a row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `row_id` is unknown or a Tier-1 invariant
    /// is violated by the stored data.
    fn explain(&self, row_id: &RowId) -> Result<RowExplanation, StoreError>;

    /// Resolves a call's response payload, reporting `Purged`/`NeverStored`
    /// when the underlying payload is no longer (or was never) available.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if `call_id` is unknown.
    fn get_call_response(&self, call_id: &CallId) -> Result<CallResponse, StoreError>;

    /// Deletes every payload reference belonging to completed runs
    /// older than `as_of`, leaving hashes as valid historical references
    /// (§4.6).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a write failure.
    fn purge(&self, as_of: Timestamp) -> Result<PurgeReport, StoreError>;
}

/// Relation kind passed to `Recorder::coalesce_tokens`/`expand_token`
/// callers constructing `TokenParent` rows; re-exported here so backend
/// implementations do not need a separate import for it.
pub const COALESCE_RELATION: TokenRelation = TokenRelation::Coalesce;
/// See [`COALESCE_RELATION`].
pub const EXPAND_RELATION: TokenRelation = TokenRelation::Expand;
/// See [`COALESCE_RELATION`].
pub const FORK_RELATION: TokenRelation = TokenRelation::Fork;

/// Convenience alias for a shared, thread-safe recorder handle, the shape
/// every plugin context and executor actually holds.
pub type SharedRecorder = std::sync::Arc<dyn Recorder>;
