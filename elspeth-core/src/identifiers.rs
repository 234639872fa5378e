// elspeth-core/src/identifiers.rs
// ============================================================================
// Module: Entity Identifiers
// Description: Opaque identifier newtypes for every entity in the data model.
// Purpose: Prevent identifier confusion (a RowId passed where a TokenId is
//          expected) at compile time while keeping the wire representation a
//          plain string.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! Every entity in §3 of the data model is identified by an opaque,
//! UUID-shaped string. Each identifier is its own newtype so the compiler
//! rejects mixing them up; all of them serialize as a bare string
//! (`#[serde(transparent)]`) so the audit database and JSON exports carry no
//! wrapper structure.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Generates an opaque string identifier newtype.
///
/// # Invariants
/// - The wrapped string is never empty.
/// - Equality and ordering are byte-for-byte on the wrapped string.
macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh, randomly assigned identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Wraps an existing identifier string (e.g. one read back from storage).
            ///
            /// # Invariants
            /// Callers must not construct a new logical entity's identifier this
            /// way; only the recorder does that, via [`Self::generate`].
            #[must_use]
            pub fn from_raw(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::from_raw(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from_raw(value)
            }
        }
    };
}

entity_id!(
    /// Identifies a single execution of a pipeline.
    RunId
);
entity_id!(
    /// Identifies one operator in a run's DAG.
    NodeId
);
entity_id!(
    /// Identifies one edge between two nodes.
    EdgeId
);
entity_id!(
    /// Identifies one row loaded from a source.
    RowId
);
entity_id!(
    /// Identifies one token: a row's instance on one path through the DAG.
    TokenId
);
entity_id!(
    /// Identifies one `NodeState` (one attempt of one token at one node).
    StateId
);
entity_id!(
    /// Identifies one external call made while executing a `NodeState`.
    CallId
);
entity_id!(
    /// Identifies one artifact persisted by a sink.
    ArtifactId
);
entity_id!(
    /// Identifies one recorded routing decision at a gate.
    RoutingEventId
);
entity_id!(
    /// Identifies one aggregation batch.
    BatchId
);
entity_id!(
    /// Identifies one terminal outcome recorded for a token.
    OutcomeId
);
entity_id!(
    /// Identifies one checkpoint record.
    CheckpointId
);

#[cfg(test)]
mod tests {
    use super::RunId;

    #[test]
    fn generated_ids_are_unique() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_string() {
        let id = RunId::from_raw("fixed-value");
        assert_eq!(id.as_str(), "fixed-value");
        assert_eq!(id.to_string(), "fixed-value");
    }
}
