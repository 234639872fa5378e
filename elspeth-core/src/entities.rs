// elspeth-core/src/entities.rs
// ============================================================================
// Module: Data Model Entities
// Description: Canonical entity structs for runs, the DAG, tokens, and audit
//              records (§3 of the data model).
// Purpose: Provide stable, serializable types that are the single source of
//          truth for the recorder schema and every derived view (CLI JSON,
//          signed export).
// Dependencies: crate::{enums, identifiers, hashing, time}
// ============================================================================

//! ## Overview
//! Every struct here maps one-to-one onto a table in the audit recorder
//! (`elspeth-store-sqlite`). Lifecycle rules (what may change after creation)
//! are documented per type; the recorder is the only code permitted to
//! construct these types from scratch, everything else receives them back
//! from a query.

use serde::Deserialize;
use serde::Serialize;

use crate::enums::BatchStatus;
use crate::enums::CallStatus;
use crate::enums::CallType;
use crate::enums::Determinism;
use crate::enums::NodeType;
use crate::enums::RoutingKind;
use crate::enums::RoutingMode;
use crate::enums::RowOutcome;
use crate::enums::RunMode;
use crate::enums::RunStatus;
use crate::enums::TokenRelation;
use crate::hashing::HashDigest;
use crate::identifiers::ArtifactId;
use crate::identifiers::BatchId;
use crate::identifiers::CallId;
use crate::identifiers::CheckpointId;
use crate::identifiers::EdgeId;
use crate::identifiers::NodeId;
use crate::identifiers::OutcomeId;
use crate::identifiers::RowId;
use crate::identifiers::RoutingEventId;
use crate::identifiers::RunId;
use crate::identifiers::StateId;
use crate::identifiers::TokenId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Run
// ============================================================================

/// One execution of a pipeline.
///
/// # Lifecycle
/// Created at `begin_run`; mutated only to set `completed_at`/`status` at
/// `complete_run`/`fail_run`. Terminal thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run.
    pub run_id: RunId,
    /// When the run began.
    pub started_at: Timestamp,
    /// When the run reached a terminal status, if it has.
    pub completed_at: Option<Timestamp>,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Canonical hash of the resolved configuration, excluding secrets.
    pub config_fingerprint: String,
    /// Schema/canonicalization version in effect for this run.
    pub canonical_version: u32,
    /// Execution mode: live, replay, or verify.
    pub mode: RunMode,
    /// The run being replayed or verified against, if any.
    pub source_run_id: Option<RunId>,
}

// ============================================================================
// SECTION: DAG (Node / Edge)
// ============================================================================

/// One operator in a run's DAG.
///
/// # Lifecycle
/// Created once at registration; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub node_id: NodeId,
    /// The run this node belongs to.
    pub run_id: RunId,
    /// Label, unique within the run.
    pub label: String,
    /// Operator kind.
    pub node_type: NodeType,
    /// Name of the plugin implementation bound to this node.
    pub plugin_name: String,
    /// Version of the plugin implementation.
    pub plugin_version: String,
    /// Canonical hash of this node's resolved configuration.
    pub config_hash: String,
    /// Whether the plugin is declared deterministic.
    pub determinism: Determinism,
}

/// One edge between two nodes.
///
/// # Lifecycle
/// Created once at registration; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier for this edge.
    pub edge_id: EdgeId,
    /// The run this edge belongs to.
    pub run_id: RunId,
    /// Source node.
    pub from_node_id: NodeId,
    /// Destination node.
    pub to_node_id: NodeId,
    /// Route label, required when `from_node_id` is a gate with multiple
    /// outgoing edges; unique among a gate's outgoing edges (invariant 4).
    pub route_label: Option<String>,
}

// ============================================================================
// SECTION: Row / Token / TokenParent
// ============================================================================

/// One row loaded from a source.
///
/// # Lifecycle
/// Created on ingest; immutable thereafter (invariant 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Unique identifier for this row.
    pub row_id: RowId,
    /// The run this row belongs to.
    pub run_id: RunId,
    /// The source node that produced this row.
    pub source_node_id: NodeId,
    /// Zero-based index among rows produced by the same source node.
    pub row_index: u64,
    /// Canonical hash of the row's normalized payload (invariant 3).
    pub input_hash: String,
    /// Payload-store reference for the row's full content, if stored out of
    /// line.
    pub source_data_ref: Option<String>,
    /// When this row was loaded.
    pub loaded_at: Timestamp,
}

/// One instance of a row on one path through the DAG.
///
/// # Lifecycle
/// Created on ingest or by fork/coalesce/expand; never mutated; terminated
/// by a `TokenOutcome`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Unique identifier for this token.
    pub token_id: TokenId,
    /// The run this token belongs to.
    pub run_id: RunId,
    /// The row this token is an instance of.
    pub row_id: RowId,
    /// When this token was created.
    pub created_at: Timestamp,
    /// The node at which this token came into existence (the source node for
    /// an ingest token, or the fork/coalesce/aggregation node for a derived
    /// one).
    pub origin_node_id: NodeId,
}

/// One edge in the token lineage DAG: `(child, parent, relation)`.
///
/// Represented as an explicit table, never as embedded pointers, so that a
/// token with multiple parents (coalesce, aggregation expand) is represented
/// without any single-parent assumption leaking into the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenParent {
    /// The child token.
    pub token_id: TokenId,
    /// One parent of the child token.
    pub parent_token_id: TokenId,
    /// How the parent relates to the child.
    pub relation: TokenRelation,
}

// ============================================================================
// SECTION: NodeState
// ============================================================================

/// Fields common to every `NodeState`, regardless of status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateCommon {
    /// Unique identifier for this state.
    pub state_id: StateId,
    /// The token this is an attempt for.
    pub token_id: TokenId,
    /// The node this is an attempt at.
    pub node_id: NodeId,
    /// Zero-based, dense attempt number for this `(token_id, node_id)` pair
    /// (invariant 8).
    pub attempt: u32,
    /// When this attempt began.
    pub started_at: Timestamp,
    /// Canonical hash of the input presented to this attempt.
    pub input_hash: String,
    /// Payload-store reference for plugin context captured before
    /// execution, if any.
    pub context_before_ref: Option<String>,
}

/// One attempt of one token at one node, discriminated on outcome.
///
/// # Invariants
/// `Completed` always carries a non-null `output_hash` (invariant 1); this
/// is enforced by construction, not by a runtime check, since the field is
/// simply not `Option` on that variant.
///
/// # Lifecycle
/// `Open -> Completed` or `Open -> Failed`; never reopened. A retry creates
/// a new `NodeState` with `attempt` incremented, not a mutation of this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeState {
    /// The attempt has begun but not yet concluded.
    Open {
        /// Fields common to every status.
        #[serde(flatten)]
        common: NodeStateCommon,
    },
    /// The attempt concluded successfully.
    Completed {
        /// Fields common to every status.
        #[serde(flatten)]
        common: NodeStateCommon,
        /// When the attempt concluded.
        completed_at: Timestamp,
        /// Canonical hash of the attempt's output. Never null on this
        /// variant (invariant 1).
        output_hash: String,
        /// Payload-store reference for plugin context captured after
        /// execution, if any.
        context_after_ref: Option<String>,
        /// Wall-clock duration of the attempt, in milliseconds.
        duration_ms: u64,
    },
    /// The attempt concluded with a failure.
    Failed {
        /// Fields common to every status.
        #[serde(flatten)]
        common: NodeStateCommon,
        /// When the attempt concluded.
        completed_at: Timestamp,
        /// Structured failure detail: `type`, `message`, `attempt`,
        /// `retryable`.
        error_json: ErrorDetail,
        /// Wall-clock duration of the attempt, in milliseconds.
        duration_ms: u64,
    },
}

impl NodeState {
    /// Returns the fields common to every status.
    #[must_use]
    pub const fn common(&self) -> &NodeStateCommon {
        match self {
            Self::Open { common } | Self::Completed { common, .. } | Self::Failed { common, .. } => {
                common
            }
        }
    }

    /// Returns this state's identifier.
    #[must_use]
    pub fn state_id(&self) -> &StateId {
        &self.common().state_id
    }
}

/// Structured detail attached to a `Failed` `NodeState`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error taxonomy kind (e.g. `"TransformError"`, `"GateError"`).
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message.
    pub message: String,
    /// The attempt number this error occurred on.
    pub attempt: u32,
    /// Whether the error is retryable under the configured retry policy.
    pub retryable: bool,
}

// ============================================================================
// SECTION: Call / Artifact / RoutingEvent
// ============================================================================

/// One external call made while executing a `NodeState`.
///
/// # Lifecycle
/// Created at the start of the call (`started_at`) and completed once the
/// call resolves; a retried call is a *new* `Call` row with an incremented
/// `attempt`, linked to the same `state_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Unique identifier for this call.
    pub call_id: CallId,
    /// The `NodeState` this call was made on behalf of.
    pub state_id: StateId,
    /// The kind of external call.
    pub call_type: CallType,
    /// The endpoint contacted (URL, provider+model, etc).
    pub endpoint: String,
    /// When the call was issued.
    pub started_at: Timestamp,
    /// When the call resolved.
    pub completed_at: Timestamp,
    /// Wall-clock duration, in milliseconds.
    pub duration_ms: u64,
    /// Whether the call succeeded.
    pub status: CallStatus,
    /// Canonical hash of the request body.
    pub request_hash: String,
    /// Canonical hash of the response body, if the call produced one.
    pub response_hash: Option<String>,
    /// Payload-store reference for the full request body, if stored.
    pub request_ref: Option<String>,
    /// Payload-store reference for the full response body, if stored.
    pub response_ref: Option<String>,
    /// HMAC-SHA256 fingerprint of any secret used, if applicable.
    pub secret_fingerprint: Option<String>,
    /// The attempt number within the surrounding `NodeState`.
    pub attempt: u32,
    /// Provider-assigned request identifier, if the provider returns one.
    pub provider_request_id: Option<String>,
}

/// One artifact persisted by a sink.
///
/// # Lifecycle
/// Created once when a sink writes output; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier for this artifact.
    pub artifact_id: ArtifactId,
    /// The run this artifact belongs to.
    pub run_id: RunId,
    /// The `NodeState` (sink execution) that produced this artifact.
    pub state_id: StateId,
    /// Free-form artifact kind (e.g. `"json_file"`, `"http_response"`).
    pub kind: String,
    /// Locator for the artifact's content (file path, URL, etc).
    pub uri: String,
    /// Canonical hash of the artifact's content.
    pub content_hash: String,
    /// Size of the artifact's content, in bytes.
    pub size_bytes: u64,
    /// When the artifact was created.
    pub created_at: Timestamp,
}

/// One recorded routing decision at a gate.
///
/// # Lifecycle
/// Created once when a gate resolves a `RoutingAction`; immutable
/// thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEvent {
    /// Unique identifier for this event.
    pub event_id: RoutingEventId,
    /// The gate's `NodeState` that produced this decision.
    pub state_id: StateId,
    /// The edge the token was routed onto.
    pub edge_id: EdgeId,
    /// When the decision was made.
    pub decided_at: Timestamp,
    /// The kind of decision (continue/route/fork).
    pub rule: RoutingKind,
    /// Payload-store reference for a human-readable explanation of the
    /// decision (e.g. the predicate source and the values it observed), if
    /// captured.
    pub reason_ref: Option<String>,
    /// Whether the route was static or evaluated from a predicate.
    pub mode: RoutingMode,
}

// ============================================================================
// SECTION: Batch / BatchMember / BatchOutput
// ============================================================================

/// One aggregation batch: N consumed tokens mapped to M output tokens.
///
/// # Lifecycle
/// `Open -> Completed` or `Open -> Failed`; members may be added while
/// open; outputs are recorded only on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Unique identifier for this batch.
    pub batch_id: BatchId,
    /// The run this batch belongs to.
    pub run_id: RunId,
    /// The aggregation node this batch belongs to.
    pub node_id: NodeId,
    /// Current lifecycle status.
    pub status: BatchStatus,
    /// When the batch was opened.
    pub opened_at: Timestamp,
    /// When the batch reached a terminal status, if it has.
    pub closed_at: Option<Timestamp>,
    /// What triggered the flush, if the batch is closed
    /// (`"count"`/`"bytes"`/`"time"`/`"source_exhausted"`).
    pub trigger: Option<String>,
}

/// One token consumed into a `Batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMember {
    /// The batch this member belongs to.
    pub batch_id: BatchId,
    /// The token consumed into the batch.
    pub token_id: TokenId,
    /// Zero-based position within the batch, in arrival order.
    pub position: u32,
}

/// One token produced by a `Batch`'s flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutput {
    /// The batch that produced this output.
    pub batch_id: BatchId,
    /// The output token produced.
    pub token_id: TokenId,
    /// Zero-based position among the batch's outputs.
    pub position: u32,
}

// ============================================================================
// SECTION: TokenOutcome / Checkpoint
// ============================================================================

/// The terminal classification recorded for a token once its path ends.
///
/// # Invariants
/// A partial unique index on `(token_id)` filtered to terminal outcomes
/// (`RowOutcome::is_terminal`) ensures exactly one per token (invariant 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutcome {
    /// Unique identifier for this outcome record.
    pub outcome_id: OutcomeId,
    /// The run this outcome belongs to.
    pub run_id: RunId,
    /// The token this outcome is for.
    pub token_id: TokenId,
    /// The terminal classification.
    pub outcome: RowOutcome,
    /// When this outcome was recorded.
    pub recorded_at: Timestamp,
}

/// A durable marker identifying a safe restart boundary.
///
/// # Lifecycle
/// Created during execution; deleted on successful run completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique identifier for this checkpoint.
    pub checkpoint_id: CheckpointId,
    /// The run this checkpoint belongs to.
    pub run_id: RunId,
    /// The token this checkpoint marks progress for.
    pub token_id: TokenId,
    /// The node this token is about to execute at; the exact continuation
    /// a resumed run re-enqueues.
    pub node_id: NodeId,
    /// Monotonically increasing sequence number within the run.
    pub sequence_number: u64,
    /// When this checkpoint was written.
    pub created_at: Timestamp,
    /// Payload-store reference for a serialized aggregation/coalesce state
    /// snapshot, if the node owns such state.
    pub aggregation_state_ref: Option<String>,
    /// Payload-store reference for the row content carried into `node_id`,
    /// so a resumed run can rehydrate it without re-reading the source.
    pub row_ref: Option<String>,
    /// The route label the token arrived at `node_id` via, if the edge
    /// carried one.
    pub route_label: Option<String>,
    /// The coalesce grouping key this token's arrival carries downstream,
    /// so a resumed continuation groups correctly at any coalesce barrier
    /// it later reaches.
    pub coalesce_key: Option<String>,
}

// ============================================================================
// SECTION: Quarantine Records
// ============================================================================

/// A structured failure row for a token diverted to a quarantine path
/// because its input failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorRecord {
    /// The token that failed validation.
    pub token_id: TokenId,
    /// The node at which validation was performed.
    pub node_id: NodeId,
    /// Dotted path to the offending field.
    pub field_path: String,
    /// Human-readable validation failure message.
    pub message: String,
}

/// A structured failure row for a token diverted to a quarantine path
/// because a transform raised a non-retryable (or retry-exhausted) error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformErrorRecord {
    /// The token that failed.
    pub token_id: TokenId,
    /// The node at which the transform failed.
    pub node_id: NodeId,
    /// Structured failure detail.
    pub error: ErrorDetail,
}

// ============================================================================
// SECTION: HashDigest re-export convenience
// ============================================================================

/// Convenience alias so callers constructing entities do not need to name
/// `crate::hashing::HashDigest` explicitly when only the string form is
/// needed; entity fields store hashes as plain hex strings (see `input_hash`,
/// `output_hash`, etc.) so this alias exists purely for call sites that want
/// to go through the richer type before formatting.
pub type Digest = HashDigest;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_state_common_accessor_matches_variant() {
        let common = NodeStateCommon {
            state_id: StateId::generate(),
            token_id: TokenId::generate(),
            node_id: NodeId::generate(),
            attempt: 0,
            started_at: Timestamp::now(),
            input_hash: "deadbeef".to_string(),
            context_before_ref: None,
        };
        let state = NodeState::Open { common: common.clone() };
        assert_eq!(state.common().state_id, common.state_id);
    }

    #[test]
    fn node_state_serializes_with_status_tag() {
        let common = NodeStateCommon {
            state_id: StateId::generate(),
            token_id: TokenId::generate(),
            node_id: NodeId::generate(),
            attempt: 0,
            started_at: Timestamp::now(),
            input_hash: "deadbeef".to_string(),
            context_before_ref: None,
        };
        let state = NodeState::Open { common };
        let value = serde_json::to_value(&state).expect("serialize");
        assert_eq!(value.get("status").and_then(|v| v.as_str()), Some("open"));
    }
}
