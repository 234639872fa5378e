// elspeth-core/src/lib.rs
// ============================================================================
// Module: ELSPETH Core Library
// Description: Public API surface for the ELSPETH data model.
// Purpose: Expose the entity model, identifiers, canonical hashing, the DAG
//          model, and the plugin protocol traits.
// Dependencies: crate::{dag, entities, enums, error, hashing, identifiers,
//               interfaces, time}
// ============================================================================

//! ## Overview
//! `elspeth-core` has no knowledge of SQLite, the filesystem, or the
//! network. It defines the entities an audited run is made of, the
//! canonical-hashing rules that give those entities a stable identity, and
//! the plugin protocol traits the scheduler programs against. Every other
//! crate in the workspace depends on this one; this one depends on nothing
//! but `elspeth-expr`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod dag;
pub mod entities;
pub mod enums;
pub mod error;
pub mod hashing;
pub mod identifiers;
pub mod interfaces;
pub mod recorder;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use dag::Graph;
pub use dag::GraphError;
pub use entities::Artifact;
pub use entities::Batch;
pub use entities::BatchMember;
pub use entities::BatchOutput;
pub use entities::Call;
pub use entities::Checkpoint;
pub use entities::Digest;
pub use entities::Edge;
pub use entities::ErrorDetail;
pub use entities::Node;
pub use entities::NodeState;
pub use entities::NodeStateCommon;
pub use entities::RoutingEvent;
pub use entities::Row;
pub use entities::Run;
pub use entities::Token;
pub use entities::TokenOutcome;
pub use entities::TokenParent;
pub use entities::TransformErrorRecord;
pub use entities::ValidationErrorRecord;
pub use enums::BatchStatus;
pub use enums::CallStatus;
pub use enums::CallType;
pub use enums::Determinism;
pub use enums::NodeStateStatus;
pub use enums::NodeType;
pub use enums::RoutingKind;
pub use enums::RoutingMode;
pub use enums::RowOutcome;
pub use enums::RunMode;
pub use enums::RunStatus;
pub use enums::TokenRelation;
pub use error::InvariantViolation;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use identifiers::ArtifactId;
pub use identifiers::BatchId;
pub use identifiers::CallId;
pub use identifiers::CheckpointId;
pub use identifiers::EdgeId;
pub use identifiers::NodeId;
pub use identifiers::OutcomeId;
pub use identifiers::RoutingEventId;
pub use identifiers::RowId;
pub use identifiers::RunId;
pub use identifiers::StateId;
pub use identifiers::TokenId;
pub use interfaces::Aggregation;
pub use interfaces::AggregationError;
pub use interfaces::ArtifactDescriptor;
pub use interfaces::Coalesce;
pub use interfaces::CoalesceError;
pub use interfaces::FlushReason;
pub use interfaces::Gate;
pub use interfaces::GateError;
pub use interfaces::PendingCall;
pub use interfaces::PluginContext;
pub use interfaces::RoutingAction;
pub use interfaces::RowData;
pub use interfaces::RowDataResult;
pub use interfaces::Sink;
pub use interfaces::SinkError;
pub use interfaces::Source;
pub use interfaces::SourceError;
pub use interfaces::Transform;
pub use interfaces::TransformResult;
pub use recorder::CallResponse;
pub use recorder::PurgeReport;
pub use recorder::Recorder;
pub use recorder::RowExplanation;
pub use recorder::SharedRecorder;
pub use recorder::StoreError;
pub use time::Timestamp;
