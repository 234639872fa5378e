// elspeth-runtime/src/executors.rs
// ============================================================================
// Module: Per-Node-Kind Executors
// Description: Brackets one plugin invocation with the recorder's
//              begin/complete/fail lifecycle, draining call-log detail and
//              mapping plugin results onto audit rows (C9).
// Purpose: Keep the audit bracket discipline in exactly one place, so the
//          scheduler's control loop never touches `Recorder` directly for
//          the parts of it that belong to a single node execution.
// Dependencies: elspeth-core::{recorder, entities, hashing, interfaces}
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use elspeth_core::entities::ErrorDetail;
use elspeth_core::entities::Node;
use elspeth_core::enums::BatchStatus;
use elspeth_core::hashing;
use elspeth_core::identifiers::BatchId;
use elspeth_core::identifiers::NodeId;
use elspeth_core::identifiers::RowId;
use elspeth_core::identifiers::RunId;
use elspeth_core::identifiers::StateId;
use elspeth_core::identifiers::TokenId;
use elspeth_core::interfaces::ArtifactDescriptor;
use elspeth_core::interfaces::PendingCall;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RoutingAction;
use elspeth_core::interfaces::RowData;
use elspeth_core::interfaces::TransformResult;
use elspeth_core::recorder::SharedRecorder;
use elspeth_core::time::Timestamp;

use crate::error::SchedulerError;
use crate::plugins::PluginSet;

/// Returns the whole-millisecond duration elapsed since `started`.
fn elapsed_ms(started: Timestamp) -> u64 {
    let delta = Timestamp::now().as_offset_date_time() - started.as_offset_date_time();
    u64::try_from(delta.whole_milliseconds().max(0)).unwrap_or(u64::MAX)
}

/// Drains `ctx.call_log`, if present, recording each pending call against
/// `state_id` and leaving the log empty for the next invocation.
fn drain_call_log(recorder: &SharedRecorder, state_id: &StateId, ctx: &PluginContext) -> Result<(), SchedulerError> {
    let Some(log) = &ctx.call_log else { return Ok(()) };
    let pending: Vec<PendingCall> = match log.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    for call in pending {
        recorder.record_call(
            state_id,
            call.call_type,
            &call.endpoint,
            call.started_at,
            call.completed_at,
            call.duration_ms,
            call.status,
            &call.request_hash,
            call.response_hash,
            call.request_ref,
            call.response_ref,
            call.secret_fingerprint,
            call.attempt,
            call.provider_request_id,
        )?;
    }
    Ok(())
}

/// Builds a fresh, empty call log for a `PluginContext`, for executors that
/// want to offer call auditing to the plugin they are about to invoke.
#[must_use]
pub fn new_call_log() -> Arc<Mutex<Vec<PendingCall>>> {
    Arc::new(Mutex::new(Vec::new()))
}

// ============================================================================
// SECTION: Source
// ============================================================================

/// One row freshly ingested from a source, with its assigned audit
/// identifiers already recorded.
pub struct IngestedRow {
    /// The newly created row's identifier.
    pub row_id: RowId,
    /// The newly created ingest token's identifier.
    pub token_id: TokenId,
    /// The row's content.
    pub row: RowData,
}

/// Loads the next row from `label`'s source plugin, recording the row,
/// ingest token, and a single completed `NodeState` for it. Returns `None`
/// once the source is exhausted.
///
/// # Errors
///
/// Returns [`SchedulerError::SourceFailed`] if the source raises an error
/// (fails the run immediately, per §4.1, rather than being retried), or a
/// [`SchedulerError::Store`]/[`SchedulerError::Hashing`] if recording the
/// ingested row fails.
pub async fn execute_source(
    recorder: &SharedRecorder,
    plugins: &mut PluginSet,
    node: &Node,
    run_id: &RunId,
    row_index: u64,
    ctx: &PluginContext,
) -> Result<Option<IngestedRow>, SchedulerError> {
    let source = plugins.source_mut(&node.label)?;
    let loaded = source.next_row(ctx).await.map_err(|err| SchedulerError::SourceFailed {
        label: node.label.clone(),
        message: err.to_string(),
    })?;
    let Some(row) = loaded else { return Ok(None) };

    let input_hash = hashing::stable_hash(&row)?;
    let row_id = recorder.create_row(run_id, &node.node_id, row_index, &input_hash, None)?;
    let token_id = recorder.create_token(run_id, &row_id, &node.node_id)?;

    let started = Timestamp::now();
    let state_id = recorder.begin_node_state(&token_id, &node.node_id, 0, &input_hash, None)?;
    recorder.complete_node_state(&state_id, &input_hash, None, elapsed_ms(started))?;

    Ok(Some(IngestedRow { row_id, token_id, row }))
}

// ============================================================================
// SECTION: Transform
// ============================================================================

/// The result of one transform execution, after its `NodeState` has already
/// been completed or failed.
pub enum TransformOutcome {
    /// The transform produced output rows.
    Success(Vec<RowData>),
    /// The transform failed; the caller decides retry/quarantine policy.
    Failed {
        /// Error taxonomy kind.
        kind: String,
        /// Human-readable message.
        message: String,
        /// Whether the configured retry policy should retry this attempt.
        retryable: bool,
    },
}

/// Runs one attempt of `node`'s transform plugin against `row`, bracketed by
/// a `NodeState` and draining any call log the transform populated.
///
/// # Errors
///
/// Returns a [`SchedulerError`] if the plugin is unresolved or any recorder
/// call fails; a transform-level failure is reported via
/// [`TransformOutcome::Failed`], not an `Err`.
pub async fn execute_transform(
    recorder: &SharedRecorder,
    plugins: &PluginSet,
    node: &Node,
    token_id: &TokenId,
    attempt: u32,
    row: RowData,
    ctx: &PluginContext,
) -> Result<TransformOutcome, SchedulerError> {
    let input_hash = hashing::stable_hash(&row)?;
    let started = Timestamp::now();
    let state_id = recorder.begin_node_state(token_id, &node.node_id, attempt, &input_hash, None)?;

    let transform = plugins.transform(&node.label)?;
    let result = transform.process(row, ctx).await;
    drain_call_log(recorder, &state_id, ctx)?;
    let duration_ms = elapsed_ms(started);

    match result {
        TransformResult::Success { rows } => {
            let output_hash = hashing::stable_hash(&rows)?;
            recorder.complete_node_state(&state_id, &output_hash, None, duration_ms)?;
            Ok(TransformOutcome::Success(rows))
        }
        TransformResult::Error { kind, message, retryable } => {
            let error = ErrorDetail { error_type: kind.clone(), message: message.clone(), attempt, retryable };
            recorder.fail_node_state(&state_id, error, duration_ms)?;
            Ok(TransformOutcome::Failed { kind, message, retryable })
        }
    }
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// The result of one gate evaluation, after its `NodeState` has already
/// been completed or failed.
pub enum GateOutcome {
    /// The gate resolved a routing decision. `state_id` is carried back so
    /// the scheduler can attach a `RoutingEvent` to the edge it follows.
    Action {
        /// The `NodeState` this evaluation completed.
        state_id: StateId,
        /// The resolved routing decision.
        action: RoutingAction,
    },
    /// Evaluation itself raised an error; never a routing decision (§4.3).
    Failed {
        /// Human-readable message.
        message: String,
    },
}

/// Runs `node`'s gate plugin against `row`, bracketed by a `NodeState`.
/// Evaluation errors always fail the state rather than resolve to an
/// action, and are never retryable: a gate is defined as a pure function,
/// so a fresh attempt without a config change cannot produce a different
/// result.
///
/// # Errors
///
/// Returns a [`SchedulerError`] if the plugin is unresolved or any recorder
/// call fails.
pub async fn execute_gate(
    recorder: &SharedRecorder,
    plugins: &PluginSet,
    node: &Node,
    token_id: &TokenId,
    attempt: u32,
    row: &RowData,
    ctx: &PluginContext,
) -> Result<GateOutcome, SchedulerError> {
    let input_hash = hashing::stable_hash(row)?;
    let started = Timestamp::now();
    let state_id = recorder.begin_node_state(token_id, &node.node_id, attempt, &input_hash, None)?;

    let gate = plugins.gate(&node.label)?;
    let result = gate.evaluate(row, ctx).await;
    let duration_ms = elapsed_ms(started);

    match result {
        Ok(action) => {
            let output_hash = hashing::stable_hash(&action)?;
            recorder.complete_node_state(&state_id, &output_hash, None, duration_ms)?;
            Ok(GateOutcome::Action { state_id, action })
        }
        Err(err) => {
            let message = err.to_string();
            let error = ErrorDetail { error_type: "gate_error".to_string(), message: message.clone(), attempt, retryable: false };
            recorder.fail_node_state(&state_id, error, duration_ms)?;
            Ok(GateOutcome::Failed { message })
        }
    }
}

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// The result of buffering one row into an aggregation.
pub enum AggregationAcceptOutcome {
    /// The row was buffered successfully.
    Buffered,
    /// The aggregation function rejected the row.
    Failed {
        /// Human-readable message.
        message: String,
    },
}

/// Buffers `row` into `node`'s aggregation plugin, recording a completed
/// (or failed) `NodeState` for the acceptance itself and appending the token
/// as member `position` of `batch_id`. The token's terminal outcome
/// (`ConsumedInBatch`/`Failed`) is recorded separately once its containing
/// batch closes.
///
/// # Errors
///
/// Returns a [`SchedulerError`] if the plugin is unresolved or any recorder
/// call fails.
pub async fn execute_aggregation_accept(
    recorder: &SharedRecorder,
    plugins: &mut PluginSet,
    node: &Node,
    token_id: &TokenId,
    batch_id: &BatchId,
    position: u32,
    row: RowData,
    ctx: &PluginContext,
) -> Result<AggregationAcceptOutcome, SchedulerError> {
    let input_hash = hashing::stable_hash(&row)?;
    let started = Timestamp::now();
    let state_id = recorder.begin_node_state(token_id, &node.node_id, 0, &input_hash, None)?;

    let aggregation = plugins.aggregation_mut(&node.label)?;
    let result = aggregation.accept(row, ctx).await;
    let duration_ms = elapsed_ms(started);

    match result {
        Ok(()) => {
            recorder.complete_node_state(&state_id, &input_hash, None, duration_ms)?;
            recorder.add_batch_member(batch_id, token_id, position)?;
            Ok(AggregationAcceptOutcome::Buffered)
        }
        Err(err) => {
            let message = err.to_string();
            let error = ErrorDetail { error_type: "aggregation_error".to_string(), message: message.clone(), attempt: 0, retryable: false };
            recorder.fail_node_state(&state_id, error, duration_ms)?;
            Ok(AggregationAcceptOutcome::Failed { message })
        }
    }
}

/// Flushes `node`'s aggregation plugin, expanding `parent_token_ids` into
/// one freshly minted output token per produced row, recording one
/// completed `NodeState` per output token, and closing `batch_id` with the
/// resulting output set.
///
/// # Errors
///
/// Returns a [`SchedulerError`] if the plugin is unresolved, flush fails, or
/// any recorder call fails.
pub async fn execute_aggregation_flush(
    recorder: &SharedRecorder,
    plugins: &mut PluginSet,
    node: &Node,
    parent_token_ids: &[TokenId],
    batch_id: &BatchId,
    reason: elspeth_core::interfaces::FlushReason,
    ctx: &PluginContext,
) -> Result<Vec<(TokenId, RowData)>, SchedulerError> {
    let aggregation = plugins.aggregation_mut(&node.label)?;
    let started = Timestamp::now();
    let flushed = match aggregation.flush(ctx, reason).await {
        Ok(flushed) => flushed,
        Err(err) => {
            recorder.close_batch(batch_id, BatchStatus::Failed, Some(format!("{reason:?}")), &[])?;
            return Err(SchedulerError::SourceFailed { label: node.label.clone(), message: err.to_string() });
        }
    };
    let duration_ms = elapsed_ms(started);

    if flushed.is_empty() {
        recorder.close_batch(batch_id, BatchStatus::Completed, Some(format!("{reason:?}")), &[])?;
        return Ok(Vec::new());
    }

    let input_hash = hashing::stable_hash(parent_token_ids)?;
    let output_tokens = recorder.expand_token(parent_token_ids, &node.node_id, flushed.len())?;
    let mut results = Vec::with_capacity(flushed.len());
    for (output_token_id, row) in output_tokens.into_iter().zip(flushed) {
        let output_hash = hashing::stable_hash(&row)?;
        let state_id = recorder.begin_node_state(&output_token_id, &node.node_id, 0, &input_hash, None)?;
        recorder.complete_node_state(&state_id, &output_hash, None, duration_ms)?;
        results.push((output_token_id, row));
    }
    let output_ids: Vec<TokenId> = results.iter().map(|(id, _)| id.clone()).collect();
    recorder.close_batch(batch_id, BatchStatus::Completed, Some(format!("{reason:?}")), &output_ids)?;
    Ok(results)
}

// ============================================================================
// SECTION: Coalesce
// ============================================================================

/// Merges `rows_by_label` at `node`'s coalesce plugin, recording the merge
/// as one `NodeState` for the freshly coalesced token.
///
/// # Errors
///
/// Returns a [`SchedulerError`] if the plugin is unresolved, the merge fails,
/// or any recorder call fails.
pub async fn execute_coalesce(
    recorder: &SharedRecorder,
    plugins: &PluginSet,
    node: &Node,
    parent_token_ids: &[TokenId],
    rows_by_label: BTreeMap<String, RowData>,
    ctx: &PluginContext,
) -> Result<(TokenId, RowData), SchedulerError> {
    let input_hash = hashing::stable_hash(&rows_by_label)?;
    let coalesce = plugins.coalesce(&node.label)?;
    let started = Timestamp::now();
    let merged = coalesce.merge(rows_by_label, ctx).await.map_err(|err| SchedulerError::SourceFailed {
        label: node.label.clone(),
        message: err.to_string(),
    })?;
    let duration_ms = elapsed_ms(started);

    let output_token_id = recorder.coalesce_tokens(parent_token_ids, &node.node_id)?;
    let output_hash = hashing::stable_hash(&merged)?;
    let state_id = recorder.begin_node_state(&output_token_id, &node.node_id, 0, &input_hash, None)?;
    recorder.complete_node_state(&state_id, &output_hash, None, duration_ms)?;
    Ok((output_token_id, merged))
}

/// Records a `failed` `NodeState` for a coalesce arrival that the scheduler
/// has already judged invalid (§4.4: "mismatched or stale arrivals are
/// failed explicitly") — a route label the barrier does not expect, or a
/// second arrival for a label already buffered. No merge is attempted.
///
/// # Errors
///
/// Returns a [`SchedulerError`] if any recorder call fails.
pub async fn fail_coalesce_arrival(
    recorder: &SharedRecorder,
    node: &Node,
    token_id: &TokenId,
    row: &RowData,
    reason: &str,
) -> Result<(), SchedulerError> {
    let input_hash = hashing::stable_hash(row)?;
    let started = Timestamp::now();
    let state_id = recorder.begin_node_state(token_id, &node.node_id, 0, &input_hash, None)?;
    let duration_ms = elapsed_ms(started);
    let error = ErrorDetail { error_type: "coalesce_mismatch".to_string(), message: reason.to_string(), attempt: 0, retryable: false };
    recorder.fail_node_state(&state_id, error, duration_ms)?;
    Ok(())
}

// ============================================================================
// SECTION: Sink
// ============================================================================

/// Writes `row` to `node`'s sink plugin, recording a completed `NodeState`
/// and the produced artifact.
///
/// # Errors
///
/// Returns a [`SchedulerError`] if the plugin is unresolved, the write
/// fails, or any recorder call fails.
pub async fn execute_sink(
    recorder: &SharedRecorder,
    plugins: &mut PluginSet,
    node: &Node,
    token_id: &TokenId,
    row: RowData,
    ctx: &PluginContext,
) -> Result<ArtifactDescriptor, SchedulerError> {
    let input_hash = hashing::stable_hash(&row)?;
    let started = Timestamp::now();
    let state_id = recorder.begin_node_state(token_id, &node.node_id, 0, &input_hash, None)?;

    let sink = plugins.sink_mut(&node.label)?;
    let result = sink.write(vec![row], ctx).await;
    let duration_ms = elapsed_ms(started);

    match result {
        Ok(descriptor) => {
            recorder.complete_node_state(&state_id, &descriptor.content_hash, None, duration_ms)?;
            recorder.record_artifact(&state_id, &descriptor.kind, &descriptor.uri, &descriptor.content_hash, descriptor.size_bytes)?;
            Ok(descriptor)
        }
        Err(err) => {
            let message = err.to_string();
            let error = ErrorDetail { error_type: "sink_error".to_string(), message, attempt: 0, retryable: false };
            recorder.fail_node_state(&state_id, error, duration_ms)?;
            Err(SchedulerError::SourceFailed { label: node.label.clone(), message: err.to_string() })
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "test module; workspace lints exempt #[cfg(test)] code"
)]
mod tests {
    use std::sync::Arc;

    use elspeth_core::NodeType;
    use elspeth_core::enums::Determinism;
    use elspeth_core::identifiers::NodeId;
    use elspeth_store_sqlite::config::SqliteJournalMode;
    use elspeth_store_sqlite::config::SqliteRecorderConfig;
    use elspeth_store_sqlite::config::SqliteSyncMode;
    use elspeth_store_sqlite::recorder::SqliteRecorder;
    use serde_json::Value;
    use serde_json::json;

    use super::*;
    use crate::plugins::csv_source::CsvSource;
    use crate::plugins::json_sink::JsonSink;
    use crate::plugins::uppercase_transform::UppercaseTransform;

    fn recorder() -> (tempfile::TempDir, SharedRecorder, RunId) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SqliteRecorderConfig {
            path: dir.path().join("audit.sqlite3"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteJournalMode::Wal,
            sync_mode: SqliteSyncMode::Normal,
            read_pool_size: 1,
            payload_root: None,
        };
        let recorder: SharedRecorder = Arc::new(SqliteRecorder::open(&config).expect("open recorder"));
        let run_id = recorder.begin_run("fingerprint".to_string(), elspeth_core::RunMode::Live, None).expect("begin run");
        (dir, recorder, run_id)
    }

    fn node(run_id: &RunId, label: &str, node_type: NodeType) -> Node {
        Node {
            node_id: NodeId::generate(),
            run_id: run_id.clone(),
            label: label.to_string(),
            node_type,
            plugin_name: "test".to_string(),
            plugin_version: "0.0.0".to_string(),
            config_hash: "hash".to_string(),
            determinism: Determinism::Deterministic,
        }
    }

    fn ctx(run_id: &RunId, label: &str) -> PluginContext {
        PluginContext { run_id: run_id.clone(), node_label: label.to_string(), config: Value::Null, checkpoint: None, call_log: None }
    }

    #[tokio::test]
    async fn source_ingests_a_row_and_records_it() {
        let (_dir, recorder, run_id) = recorder();
        let mut plugins = PluginSet::new();
        plugins.register_source("source", Box::new(CsvSource::from_str("a\n1\n").expect("csv")));
        let source_node = node(&run_id, "source", NodeType::Source);

        let ingested = execute_source(&recorder, &mut plugins, &source_node, &run_id, 0, &ctx(&run_id, "source"))
            .await
            .expect("ingest")
            .expect("row present");
        assert_eq!(ingested.row.get("a"), Some(&json!("1")));
    }

    #[tokio::test]
    async fn transform_success_completes_state_and_produces_rows() {
        let (_dir, recorder, run_id) = recorder();
        let mut plugins = PluginSet::new();
        plugins.register_transform("upper", Box::new(UppercaseTransform::new("a")));
        let transform_node = node(&run_id, "upper", NodeType::Transform);
        let row_id = recorder.create_row(&run_id, &transform_node.node_id, 0, "hash", None).expect("row");
        let token_id = recorder.create_token(&run_id, &row_id, &transform_node.node_id).expect("token");

        let mut row = RowData::new();
        row.insert("a".to_string(), json!("hi"));
        let outcome = execute_transform(&recorder, &plugins, &transform_node, &token_id, 0, row, &ctx(&run_id, "upper"))
            .await
            .expect("executor succeeds");
        match outcome {
            TransformOutcome::Success(rows) => assert_eq!(rows[0].get("a"), Some(&json!("HI"))),
            TransformOutcome::Failed { message, .. } => panic!("unexpected failure: {message}"),
        }
    }

    #[tokio::test]
    async fn sink_write_records_an_artifact() {
        let (_dir, recorder, run_id) = recorder();
        let mut plugins = PluginSet::new();
        plugins.register_sink("sink", Box::new(JsonSink::new("mem://out")));
        let sink_node = node(&run_id, "sink", NodeType::Sink);
        let row_id = recorder.create_row(&run_id, &sink_node.node_id, 0, "hash", None).expect("row");
        let token_id = recorder.create_token(&run_id, &row_id, &sink_node.node_id).expect("token");

        let mut row = RowData::new();
        row.insert("a".to_string(), json!(1));
        let descriptor = execute_sink(&recorder, &mut plugins, &sink_node, &token_id, row, &ctx(&run_id, "sink"))
            .await
            .expect("sink executor");
        assert_eq!(descriptor.kind, "json_lines");
    }
}
