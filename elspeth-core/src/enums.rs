// elspeth-core/src/enums.rs
// ============================================================================
// Module: Closed-Set Enums
// Description: The data model's closed enumerations (§3).
// Purpose: Give every closed set of string values a single Rust type so
//          invalid values are rejected at deserialization rather than at
//          some later, harder-to-trace point.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

/// Lifecycle status of a `Run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is actively processing tokens.
    Running,
    /// The run reached a terminal state with no unrecovered failure.
    Completed,
    /// The run reached a terminal state via an unrecovered failure.
    Failed,
}

/// The kind of operator a `Node` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Produces rows.
    Source,
    /// Maps rows to zero or more rows.
    Transform,
    /// Routes a row to one or more outgoing edges.
    Gate,
    /// Buffers many rows and emits fewer.
    Aggregation,
    /// Merges parallel paths of one ancestor token.
    Coalesce,
    /// Consumes rows, producing artifacts.
    Sink,
}

/// Status of one `NodeState` (one attempt of one token at one node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStateStatus {
    /// The attempt has begun but not yet concluded.
    Open,
    /// The attempt concluded successfully.
    Completed,
    /// The attempt concluded with a failure.
    Failed,
}

/// Status of an aggregation `Batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// The batch is still accepting members.
    Open,
    /// The batch triggered and produced outputs.
    Completed,
    /// The batch failed before producing outputs.
    Failed,
}

/// The kind of routing decision a gate made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingKind {
    /// The token continues along the single default edge.
    Continue,
    /// The token follows one specific labeled edge.
    Route,
    /// The token forks into children along multiple labeled edges.
    Fork,
}

/// Whether a routing decision was fixed or computed from a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// The route was fixed by configuration, not evaluated per-row.
    Static,
    /// The route was selected by evaluating a gate predicate.
    Conditional,
}

/// The kind of an external `Call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// A call to a large language model provider.
    Llm,
    /// A plain HTTP call.
    Http,
    /// Any other external call.
    Other,
}

/// The outcome of an external `Call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// The call completed successfully.
    Success,
    /// The call failed (retryable or not; see `error_json`).
    Error,
}

/// The mode a `Run` executes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Normal execution; external calls go out over the network.
    Live,
    /// External calls are served from a prior run's recorded responses.
    Replay,
    /// External calls go out, then are diffed against a prior run's responses.
    Verify,
}

/// The terminal classification of a token's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOutcome {
    /// The token reached a sink and was written out.
    Completed,
    /// The token was routed away by a gate and superseded by a new token.
    Routed,
    /// The token forked into children and was superseded by them.
    Forked,
    /// The token was consumed into an aggregation batch.
    ConsumedInBatch,
    /// The token was merged at a coalesce barrier.
    Coalesced,
    /// The token was diverted to a quarantine destination.
    Quarantined,
    /// The token's path ended in an unrecovered failure.
    Failed,
    /// The token was expanded into aggregation output children.
    Expanded,
    /// The token is held open inside an aggregation buffer.
    Buffered,
}

impl RowOutcome {
    /// Returns whether this outcome is a *terminal* classification, i.e. one
    /// that should never be recorded twice for the same token (invariant 2).
    ///
    /// `Buffered` is explicitly non-terminal: a buffered token is still
    /// in flight inside an aggregator and is expected to receive a terminal
    /// outcome (`ConsumedInBatch` or `Failed`) later.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Buffered)
    }
}

/// Whether a node's behavior is guaranteed to be reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Determinism {
    /// Same input and config always produce the same output.
    Deterministic,
    /// Output may vary across runs even with identical input and config.
    Nondeterministic,
}

/// Relation between a token and one of its parents in the lineage DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRelation {
    /// The child is one of several tokens produced by a gate fork.
    Fork,
    /// The child is the single output of a coalesce barrier.
    Coalesce,
    /// The child is one of several outputs of an aggregation flush.
    Expand,
}

#[cfg(test)]
mod tests {
    use super::RunStatus;
    use super::RowOutcome;

    #[test]
    fn serializes_as_snake_case_string() {
        let value = serde_json::to_string(&RunStatus::Running).expect("serialize");
        assert_eq!(value, "\"running\"");
    }

    #[test]
    fn buffered_is_not_terminal() {
        assert!(!RowOutcome::Buffered.is_terminal());
        assert!(RowOutcome::Completed.is_terminal());
    }
}
