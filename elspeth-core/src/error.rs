// elspeth-core/src/error.rs
// ============================================================================
// Module: Invariant Violations
// Description: The Tier-1 "this should be impossible" error type (§7).
// Purpose: Give every invariant check in the codebase a single error type to
//          return, so the one decision of whether to abort on it is made in
//          one place rather than re-litigated at each call site.
// Dependencies: thiserror
// ============================================================================

use thiserror::Error;

/// A violation of one of the data model's structural invariants (§3).
///
/// This is the only error type in the codebase ever turned into a panic,
/// and only at the handful of call sites that decide a violation is
/// unrecoverable — a caller that can still do something useful with the
/// error (e.g. reject a malformed resume request) should match on this
/// type and return a normal `Result` instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Attempt numbers for a token at a node were not dense starting at 1.
    #[error("non-dense attempt numbering for token {token_id} at node {node_label}: got {attempt}")]
    NonDenseAttemptNumbering {
        /// The token whose attempts are not densely numbered.
        token_id: String,
        /// The node label the attempts belong to.
        node_label: String,
        /// The offending attempt number.
        attempt: u32,
    },

    /// A token received more than one terminal outcome.
    #[error("token {token_id} already has a terminal outcome, cannot record a second")]
    DuplicateTerminalOutcome {
        /// The token that already has a terminal outcome.
        token_id: String,
    },

    /// Code attempted to mutate a field the data model declares immutable.
    #[error("attempted to mutate immutable field `{field}` on {entity} {id}")]
    ImmutableFieldMutation {
        /// The entity kind (e.g. `"row"`, `"token"`, `"edge"`, `"node"`).
        entity: &'static str,
        /// The entity's identifier.
        id: String,
        /// The field that mutation was attempted on.
        field: &'static str,
    },

    /// A `NodeState` in `Completed` status carries no `output_hash`.
    #[error("completed node state {state_id} has no output_hash")]
    CompletedStateMissingOutputHash {
        /// The offending node state.
        state_id: String,
    },
}
