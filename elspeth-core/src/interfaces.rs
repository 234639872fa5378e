// elspeth-core/src/interfaces.rs
// ============================================================================
// Module: Plugin Protocol Interfaces
// Description: Backend-agnostic traits the scheduler depends on (§6).
// Purpose: Define the contract surfaces plugin implementations satisfy,
//          without embedding any concrete plugin body into the core.
// Dependencies: async-trait, crate::{entities, hashing, identifiers}
// ============================================================================

//! ## Overview
//! The scheduler depends on a small, closed set of node-kind interfaces —
//! one per entry in `NodeType` — rather than a single duck-typed plugin
//! trait. Discovery (turning a config-declared plugin name into one of these
//! trait objects) is a loader's job, entirely outside this crate; the core
//! never performs runtime reflection.
//!
//! Security posture: plugin implementations consume untrusted external data
//! (source rows, HTTP responses); interfaces are designed so a
//! non-conforming implementation fails closed (an error variant) rather than
//! producing a value the scheduler must guess how to interpret.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::enums::CallStatus;
use crate::enums::CallType;
use crate::identifiers::CheckpointId;
use crate::identifiers::RunId;
use crate::time::Timestamp;

/// One row flowing through the pipeline: an ordered JSON object.
///
/// Rows are represented as plain JSON objects (not a bespoke struct) because
/// their shape is entirely plugin-defined; the canonical hashing module
/// (§4.9) is what gives them a deterministic identity regardless of shape.
pub type RowData = serde_json::Map<String, Value>;

// ============================================================================
// SECTION: Plugin Context
// ============================================================================

/// Context passed to every plugin protocol method.
///
/// # Invariants
/// - `run_id` and `node_label` are stable for the lifetime of one node
///   execution; plugins must not cache them across runs.
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// The run this invocation belongs to.
    pub run_id: RunId,
    /// The label of the node this invocation is for.
    pub node_label: String,
    /// The plugin's resolved, validated configuration.
    pub config: Value,
    /// Checkpoint snapshot for this node, if resuming from one.
    pub checkpoint: Option<CheckpointSnapshot>,
    /// Sink for external-call detail a plugin wants recorded as `Call`
    /// rows once this node execution completes.
    ///
    /// Plugins that perform external calls (typically via
    /// `elspeth-retry::AuditedClient`) append one [`PendingCall`] per
    /// attempt here; the executor drains it and forwards each entry to
    /// `Recorder::record_call` against this invocation's `state_id`, which
    /// plugins never see directly. `None` when the caller (e.g. a unit
    /// test) does not need call auditing.
    pub call_log: Option<Arc<Mutex<Vec<PendingCall>>>>,
}

/// One external-call attempt a plugin wants audited, recorded by the
/// executor as a `Call` row against the node's current `state_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    /// The kind of call made.
    pub call_type: CallType,
    /// The endpoint called.
    pub endpoint: String,
    /// When the attempt started.
    pub started_at: Timestamp,
    /// When the attempt completed.
    pub completed_at: Timestamp,
    /// Wall-clock duration of the attempt, in milliseconds.
    pub duration_ms: u64,
    /// Whether the attempt succeeded.
    pub status: CallStatus,
    /// Canonical hash of the request.
    pub request_hash: String,
    /// Canonical hash of the response, if one was received.
    pub response_hash: Option<String>,
    /// Payload-store reference for the request body, if stored.
    pub request_ref: Option<String>,
    /// Payload-store reference for the response body, if stored.
    pub response_ref: Option<String>,
    /// Fingerprint of any secret used to make the call, never the secret
    /// itself.
    pub secret_fingerprint: Option<String>,
    /// 1-indexed attempt number within this call's retry sequence.
    pub attempt: u32,
    /// Provider-assigned request identifier, if any.
    pub provider_request_id: Option<String>,
}

/// A previously written checkpoint snapshot, handed back to a node on
/// resume so it can rehydrate aggregation/coalesce state.
#[derive(Debug, Clone)]
pub struct CheckpointSnapshot {
    /// The checkpoint this snapshot was recorded under.
    pub checkpoint_id: CheckpointId,
    /// The deserialized aggregation/coalesce state, if the node owns any.
    pub state: Option<Value>,
}

// ============================================================================
// SECTION: Discriminated Unions
// ============================================================================

/// The result of a gate's predicate evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoutingAction {
    /// Continue along the single default edge.
    Continue,
    /// Follow one specific labeled edge.
    Route {
        /// The route label to follow.
        label: String,
    },
    /// Fork into one child token per labeled path.
    ForkToPaths {
        /// The route labels to fork onto; each yields one child token.
        labels: Vec<String>,
    },
}

/// The result of a transform's invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformResult {
    /// The transform produced one or more output rows.
    Success {
        /// The produced rows, in order.
        rows: Vec<RowData>,
    },
    /// The transform failed.
    Error {
        /// Error taxonomy kind.
        kind: String,
        /// Human-readable message.
        message: String,
        /// Whether the failure is retryable.
        retryable: bool,
    },
}

/// The result of resolving a `*_ref` payload reference for a Tier-3 read
/// (e.g. `get_call_response`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RowDataResult {
    /// The payload is available and has been verified.
    Available {
        /// The payload's bytes, base64-encoded for JSON transport.
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
    /// The payload existed but has since been purged.
    Purged,
    /// No payload was ever stored for this reference.
    NeverStored,
}

/// `serde` helper for base64-encoding a byte vector as a JSON string.
mod base64_bytes {
    use base64::Engine;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors a `Source` plugin may raise.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source failed to load rows.
    #[error("source error: {0}")]
    Load(String),
}

/// Errors a `Gate` plugin may raise. Per §4.3, an exception here becomes a
/// `failed` `NodeState`, never a routing decision.
#[derive(Debug, Error)]
pub enum GateError {
    /// Predicate evaluation raised an error.
    #[error("gate error: {0}")]
    Evaluation(String),
}

/// Errors an `Aggregation` plugin may raise.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The aggregation function raised an error.
    #[error("aggregation error: {0}")]
    Failed(String),
}

/// Errors a `Coalesce` plugin may raise.
#[derive(Debug, Error)]
pub enum CoalesceError {
    /// The merge function raised an error, or the arrival did not match the
    /// expected lineage.
    #[error("coalesce error: {0}")]
    Failed(String),
}

/// Errors a `Sink` plugin may raise.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink failed to write its output.
    #[error("sink error: {0}")]
    Write(String),
}

// ============================================================================
// SECTION: Plugin Protocol Traits
// ============================================================================

/// Produces rows at the start of a pipeline.
///
/// Sources may coerce external data into the declared output schema; this is
/// the one node kind explicitly permitted to coerce (§6), since it is the
/// boundary between the untyped outside world and the pipeline's typed rows.
#[async_trait]
pub trait Source: Send + Sync {
    /// Loads the next row, or `None` once exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when a row cannot be loaded; per §4.1, source
    /// errors fail the run immediately rather than being retried.
    async fn next_row(&mut self, ctx: &PluginContext) -> Result<Option<RowData>, SourceError>;
}

/// Maps one row to zero or more rows. Must not silently coerce (§6): a
/// transform that cannot produce a conforming row returns `TransformResult::Error`.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Processes one row.
    ///
    /// # Errors
    ///
    /// This method itself is infallible at the Rust type level; failure is
    /// represented in the returned [`TransformResult::Error`] variant so the
    /// scheduler can apply the transform error policy (quarantine, retry)
    /// without a second error channel to reconcile against the first.
    async fn process(&self, row: RowData, ctx: &PluginContext) -> TransformResult;
}

/// Routes a row to one or more outgoing edges. Must be side-effect free.
#[async_trait]
pub trait Gate: Send + Sync {
    /// Evaluates the gate's predicate against one row.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when evaluation itself fails; this never
    /// produces a routing decision (§4.3).
    async fn evaluate(&self, row: &RowData, ctx: &PluginContext) -> Result<RoutingAction, GateError>;
}

/// Buffers many rows and emits fewer, on a configured trigger.
#[async_trait]
pub trait Aggregation: Send + Sync {
    /// Accepts one row into the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] when the row cannot be buffered.
    async fn accept(&mut self, row: RowData, ctx: &PluginContext) -> Result<(), AggregationError>;

    /// Flushes the buffer, producing zero or more output rows.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] when the flush function fails.
    async fn flush(
        &mut self,
        ctx: &PluginContext,
        reason: FlushReason,
    ) -> Result<Vec<RowData>, AggregationError>;

    /// Serializes the aggregator's internal state for checkpointing.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] when the state cannot be serialized.
    fn snapshot(&self) -> Result<Value, AggregationError>;

    /// Rehydrates the aggregator's internal state from a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] when the snapshot cannot be restored.
    fn restore(&mut self, snapshot: Value) -> Result<(), AggregationError>;
}

/// Why an aggregation flush occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// The configured count trigger was reached.
    Count,
    /// The configured byte-size trigger was reached.
    Bytes,
    /// The configured wall-time trigger elapsed.
    Time,
    /// The source was exhausted; this is a partial flush.
    SourceExhausted,
}

/// Merges parallel paths of one ancestor token into a single output row.
#[async_trait]
pub trait Coalesce: Send + Sync {
    /// Merges rows arrived under distinct labels.
    ///
    /// # Errors
    ///
    /// Returns [`CoalesceError`] when the merge function fails or an
    /// arrival does not match the expected lineage.
    async fn merge(
        &self,
        rows_by_label: BTreeMap<String, RowData>,
        ctx: &PluginContext,
    ) -> Result<RowData, CoalesceError>;
}

/// Consumes rows, producing a persisted artifact.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Writes one or more rows.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the write fails.
    async fn write(
        &mut self,
        rows: Vec<RowData>,
        ctx: &PluginContext,
    ) -> Result<ArtifactDescriptor, SinkError>;
}

/// Describes an artifact a sink just wrote, before it has been recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Locator for the artifact's content.
    pub uri: String,
    /// Canonical hash of the artifact's content.
    pub content_hash: String,
    /// Size of the artifact's content, in bytes.
    pub size_bytes: u64,
    /// Free-form artifact kind.
    pub kind: String,
}
