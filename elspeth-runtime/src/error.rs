// elspeth-runtime/src/error.rs
// ============================================================================
// Module: Runtime Errors
// Description: Error taxonomy for the scheduler, executors, checkpoint
//              resume, and retention passes.
// Purpose: One `thiserror` enum per concern, matching the per-crate `Error`
//          shape used throughout the workspace.
// Dependencies: thiserror, elspeth-core::{GraphError, StoreError}
// ============================================================================

use elspeth_core::GraphError;
use elspeth_core::StoreError;
use elspeth_core::hashing::HashError;
use thiserror::Error;

/// Errors raised while registering or resolving plugins against a graph.
#[derive(Debug, Error)]
pub enum PluginRegistryError {
    /// A node's declared plugin name has no registered factory.
    #[error("no plugin registered for node {label:?} (plugin name {plugin_name:?})")]
    UnknownPlugin {
        /// The node's label.
        label: String,
        /// The plugin name the node declared.
        plugin_name: String,
    },
    /// A node of a given kind was handed a plugin for the wrong kind.
    #[error("node {label:?} is a {expected:?} node but its plugin does not implement that protocol")]
    KindMismatch {
        /// The node's label.
        label: String,
        /// The node kind the plugin was registered against.
        expected: elspeth_core::NodeType,
    },
}

/// Errors raised by the scheduler's control loop (C10).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The graph failed structural validation before any row was read.
    #[error("graph validation failed: {0}")]
    Graph(#[from] GraphError),
    /// A plugin could not be resolved for a node.
    #[error("plugin resolution failed: {0}")]
    Plugin(#[from] PluginRegistryError),
    /// The audit recorder reported a failure.
    #[error("recorder error: {0}")]
    Store(#[from] StoreError),
    /// A row or state could not be canonically hashed.
    #[error("hashing error: {0}")]
    Hashing(#[from] HashError),
    /// A source failed to load rows; per §4.1 this fails the run
    /// immediately rather than being retried.
    #[error("source {label} failed: {message}")]
    SourceFailed {
        /// The failing source node's label.
        label: String,
        /// The source's error message.
        message: String,
    },
    /// The in-flight work queue exceeded its configured ceiling.
    #[error("work queue exceeded its configured ceiling of {ceiling} items")]
    QueueCeilingExceeded {
        /// The configured ceiling.
        ceiling: usize,
    },
    /// A node execution did not complete within its configured timeout.
    #[error("node {label} exceeded its {budget_ms}ms execution budget")]
    Timeout {
        /// The node's label.
        label: String,
        /// The configured budget, in milliseconds.
        budget_ms: u64,
    },
    /// The run was cancelled cooperatively before completion.
    #[error("run was cancelled")]
    Cancelled,
    /// A non-terminal node had no outgoing edge to continue a token along.
    #[error("node {label} has no outgoing edge to continue along")]
    DeadEnd {
        /// The node's label.
        label: String,
    },
    /// A coalesce node received an arrival that could not be attributed to
    /// one of its expected route labels.
    #[error("node {label} received a coalesce arrival with no route label")]
    UnlabeledCoalesceArrival {
        /// The coalesce node's label.
        label: String,
    },
    /// A row could not be checkpointed to the payload store.
    #[error("payload store error: {0}")]
    Payload(#[from] elspeth_payload::PayloadError),
    /// A checkpointed row could not be (de)serialized.
    #[error("row (de)serialization error: {0}")]
    RowCodec(#[from] serde_json::Error),
    /// A resume was attempted against a scheduler with no configured
    /// payload store, so a checkpointed row could not be rehydrated.
    #[error("checkpoint for token {token_id} has a row reference but no payload store is configured")]
    MissingPayloadStore {
        /// The token whose row could not be read back.
        token_id: String,
    },
}

/// Errors raised while resuming a run from a checkpoint (C11).
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The recorder failed to read or write checkpoint state.
    #[error("checkpoint store error: {0}")]
    Store(#[from] StoreError),
    /// A resumed token's checkpoint referenced a node no longer present in
    /// the graph being resumed into.
    #[error("checkpoint for token {token_id} references unknown node {node_id}")]
    CheckpointMismatch {
        /// The token the checkpoint belonged to.
        token_id: String,
        /// The node id the checkpoint referenced.
        node_id: String,
    },
    /// The checkpointed aggregation/coalesce state could not be
    /// deserialized by the node's plugin.
    #[error("failed to restore checkpoint state for token {token_id}: {message}")]
    RestoreFailed {
        /// The token whose state failed to restore.
        token_id: String,
        /// The plugin's restore error message.
        message: String,
    },
}

/// Errors raised while running a retention/purge pass (C12).
#[derive(Debug, Error)]
pub enum RetentionError {
    /// The recorder failed to perform the purge.
    #[error("retention store error: {0}")]
    Store(#[from] StoreError),
}
