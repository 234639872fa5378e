// elspeth-runtime/src/checkpoint.rs
// ============================================================================
// Module: Checkpoint / Resume (C11)
// Description: Records the scheduling boundary at which it is safe to
//              restart, and turns a failed run's checkpoints into a plan
//              the scheduler can resume from.
// Purpose: Keep "where did we leave off" bookkeeping out of the scheduler's
//          control-flow loop, so §4.7's atomicity and mismatch rules live
//          in one place.
// Dependencies: elspeth-core::{dag, recorder, entities, identifiers}
// ============================================================================

//! ## Overview
//! A checkpoint is written after a `NodeState` completes, before its
//! continuation is enqueued: `(run_id, token_id, node_id, sequence_number)`
//! plus an optional reference to a serialized aggregation/coalesce state
//! snapshot. Resume loads the latest checkpoint per token, validates every
//! referenced node still exists in the graph being resumed into, and hands
//! the scheduler a [`ResumePlan`] naming each token's last completed node so
//! it can skip straight to the continuation instead of replaying work.

use std::collections::BTreeMap;

use elspeth_core::dag::Graph;
use elspeth_core::entities::Checkpoint;
use elspeth_core::identifiers::CheckpointId;
use elspeth_core::identifiers::NodeId;
use elspeth_core::identifiers::RunId;
use elspeth_core::identifiers::TokenId;
use elspeth_core::recorder::SharedRecorder;

use crate::error::CheckpointError;

/// Writes and reads checkpoints for one recorder, on behalf of the
/// scheduler.
pub struct Checkpointer {
    recorder: SharedRecorder,
}

impl Checkpointer {
    /// Builds a checkpointer over `recorder`.
    #[must_use]
    pub fn new(recorder: SharedRecorder) -> Self {
        Self { recorder }
    }

    /// Records a checkpoint at the given scheduling boundary.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Store`] if the write is not atomic with
    /// the `NodeState` it follows.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        node_id: &NodeId,
        sequence_number: u64,
        aggregation_state_ref: Option<String>,
        row_ref: Option<String>,
        route_label: Option<String>,
        coalesce_key: Option<String>,
    ) -> Result<CheckpointId, CheckpointError> {
        self.recorder
            .write_checkpoint(run_id, token_id, node_id, sequence_number, aggregation_state_ref, row_ref, route_label, coalesce_key)
            .map_err(CheckpointError::from)
    }

    /// Deletes every checkpoint for a run that just completed successfully.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Store`] on a write failure.
    pub fn clear(&self, run_id: &RunId) -> Result<(), CheckpointError> {
        self.recorder.delete_checkpoints(run_id).map_err(CheckpointError::from)
    }

    /// Verifies `run_id` is in a `failed` state and transitions it back to
    /// `running`, the precondition §4.7 requires before a resume proceeds.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Store`] if the run is not `failed`.
    pub fn begin_resume(&self, run_id: &RunId) -> Result<(), CheckpointError> {
        self.recorder.reopen_failed_run(run_id).map_err(CheckpointError::from)
    }

    /// Builds a [`ResumePlan`] for `run_id` against `graph`, the DAG being
    /// resumed into. Tokens that already reached a terminal outcome before
    /// the run failed are excluded: their last checkpoint named a
    /// continuation that was already superseded.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Store`] on a read failure, or
    /// [`CheckpointError::CheckpointMismatch`] if a checkpoint names a node
    /// no longer present in `graph`.
    pub fn plan_resume(&self, run_id: &RunId, graph: &Graph) -> Result<ResumePlan, CheckpointError> {
        let checkpoints = self.recorder.checkpoints_for_run(run_id).map_err(CheckpointError::from)?;
        let terminal = self.recorder.terminal_token_ids(run_id).map_err(CheckpointError::from)?;
        let mut latest: BTreeMap<TokenId, Checkpoint> = BTreeMap::new();
        for checkpoint in checkpoints {
            if terminal.contains(&checkpoint.token_id) {
                continue;
            }
            latest
                .entry(checkpoint.token_id.clone())
                .and_modify(|existing| {
                    if checkpoint.sequence_number > existing.sequence_number {
                        *existing = checkpoint.clone();
                    }
                })
                .or_insert(checkpoint);
        }
        for checkpoint in latest.values() {
            if graph.node(&checkpoint.node_id).is_none() {
                return Err(CheckpointError::CheckpointMismatch {
                    token_id: checkpoint.token_id.to_string(),
                    node_id: checkpoint.node_id.to_string(),
                });
            }
        }
        Ok(ResumePlan { resume_points: latest })
    }
}

/// Per-token resume boundaries computed from a run's checkpoints.
///
/// Tokens with no entry here had no checkpoint recorded and must be
/// replayed from their origin.
pub struct ResumePlan {
    resume_points: BTreeMap<TokenId, Checkpoint>,
}

impl ResumePlan {
    /// Returns the node a token last completed before the run failed, if
    /// any checkpoint was recorded for it.
    #[must_use]
    pub fn last_completed_node(&self, token_id: &TokenId) -> Option<&NodeId> {
        self.resume_points.get(token_id).map(|checkpoint| &checkpoint.node_id)
    }

    /// Returns the aggregation/coalesce state snapshot reference recorded
    /// alongside a token's last checkpoint, if any.
    #[must_use]
    pub fn aggregation_state_ref(&self, token_id: &TokenId) -> Option<&str> {
        self.resume_points.get(token_id).and_then(|checkpoint| checkpoint.aggregation_state_ref.as_deref())
    }

    /// Returns true if no tokens have been checkpointed at all, meaning a
    /// resume would be equivalent to a fresh run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resume_points.is_empty()
    }

    /// Number of tokens with a recorded resume boundary.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resume_points.len()
    }

    /// Iterates every token's last recorded checkpoint, the continuations a
    /// resumed scheduler re-enqueues.
    pub fn checkpoints(&self) -> impl Iterator<Item = &Checkpoint> {
        self.resume_points.values()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test module; workspace lints exempt #[cfg(test)] code")]
mod tests {
    use elspeth_core::Edge;
    use elspeth_core::Graph;
    use elspeth_core::Recorder;
    use elspeth_core::RunMode;
    use elspeth_core::enums::Determinism;
    use elspeth_core::enums::NodeType;
    use elspeth_store_sqlite::config::SqliteJournalMode;
    use elspeth_store_sqlite::config::SqliteRecorderConfig;
    use elspeth_store_sqlite::config::SqliteSyncMode;
    use elspeth_store_sqlite::recorder::SqliteRecorder;

    use super::*;

    fn open_recorder() -> (tempfile::TempDir, SharedRecorder) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SqliteRecorderConfig {
            path: dir.path().join("audit.sqlite3"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteJournalMode::Wal,
            sync_mode: SqliteSyncMode::Normal,
            read_pool_size: 1,
            payload_root: None,
        };
        let recorder: SharedRecorder = std::sync::Arc::new(SqliteRecorder::open(&config).expect("open recorder"));
        (dir, recorder)
    }

    #[test]
    fn plan_resume_picks_the_highest_sequence_number_per_token() {
        let (_dir, recorder) = open_recorder();
        let run_id = recorder.begin_run("fingerprint".to_string(), RunMode::Live, None).expect("begin run");
        let node_id = recorder
            .register_node(&run_id, "source", NodeType::Source, "csv", "0.0.0", "hash", Determinism::Deterministic)
            .expect("register node");
        let sink_id = recorder
            .register_node(&run_id, "sink", NodeType::Sink, "json", "0.0.0", "hash", Determinism::Deterministic)
            .expect("register node");
        recorder.register_edge(&run_id, &node_id, &sink_id, None).expect("register edge");
        let row_id = recorder.create_row(&run_id, &node_id, 0, "hash", None).expect("row");
        let token_id = recorder.create_token(&run_id, &row_id, &node_id).expect("token");

        recorder.write_checkpoint(&run_id, &token_id, &node_id, 1, None, None, None, None).expect("checkpoint 1");
        recorder.write_checkpoint(&run_id, &token_id, &sink_id, 2, None, None, None, None).expect("checkpoint 2");

        let graph = Graph::build(
            vec![
                node_of(&run_id, &node_id, "source", NodeType::Source),
                node_of(&run_id, &sink_id, "sink", NodeType::Sink),
            ],
            vec![Edge {
                edge_id: elspeth_core::identifiers::EdgeId::generate(),
                run_id: run_id.clone(),
                from_node_id: node_id.clone(),
                to_node_id: sink_id.clone(),
                route_label: None,
            }],
        )
        .expect("graph");

        let checkpointer = Checkpointer::new(recorder);
        let plan = checkpointer.plan_resume(&run_id, &graph).expect("plan");
        assert_eq!(plan.last_completed_node(&token_id), Some(&sink_id));
        assert_eq!(plan.len(), 1);
    }

    fn node_of(run_id: &RunId, node_id: &NodeId, label: &str, node_type: NodeType) -> elspeth_core::entities::Node {
        elspeth_core::entities::Node {
            node_id: node_id.clone(),
            run_id: run_id.clone(),
            label: label.to_string(),
            node_type,
            plugin_name: "test".to_string(),
            plugin_version: "0.0.0".to_string(),
            config_hash: "hash".to_string(),
            determinism: Determinism::Deterministic,
        }
    }
}
