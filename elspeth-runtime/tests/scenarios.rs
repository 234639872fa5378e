// elspeth-runtime/tests/scenarios.rs
// ============================================================================
// Module: End-to-End Scenario Tests (S1-S6)
// Description: Drives the scheduler over small hand-built graphs against a
//              real `SqliteRecorder` and a real `PayloadStore`, exercising
//              the linear pipeline, gate fork, count aggregation, retried
//              external call, checkpoint/resume, and payload integrity
//              paths end to end.
// Purpose: The canonical proof that §8's testable properties hold against
//          the actual backend this crate ships, not a stand-in.
// Dependencies: elspeth-core, elspeth-runtime, elspeth-store-sqlite,
//               elspeth-payload, tempfile
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "integration test module; workspace lints exempt test code"
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use elspeth_core::ArtifactDescriptor;
use elspeth_core::CallStatus;
use elspeth_core::CallType;
use elspeth_core::Determinism;
use elspeth_core::Edge;
use elspeth_core::EdgeId;
use elspeth_core::Gate;
use elspeth_core::GateError;
use elspeth_core::Graph;
use elspeth_core::NodeId;
use elspeth_core::NodeState;
use elspeth_core::NodeType;
use elspeth_core::PendingCall;
use elspeth_core::PluginContext;
use elspeth_core::Recorder;
use elspeth_core::RoutingAction;
use elspeth_core::RowData;
use elspeth_core::RowOutcome;
use elspeth_core::RunId;
use elspeth_core::RunMode;
use elspeth_core::SharedRecorder;
use elspeth_core::Sink;
use elspeth_core::SinkError;
use elspeth_core::entities::Node;
use elspeth_core::hashing;
use elspeth_core::time::Timestamp;
use elspeth_payload::PayloadError;
use elspeth_payload::PayloadStore;
use elspeth_runtime::CancellationToken;
use elspeth_runtime::Checkpointer;
use elspeth_runtime::PluginSet;
use elspeth_runtime::Scheduler;
use elspeth_runtime::SchedulerConfig;
use elspeth_runtime::plugins::count_aggregation::CountAggregation;
use elspeth_runtime::plugins::json_sink::JsonSink;
use elspeth_runtime::plugins::json_source::JsonSource;
use elspeth_runtime::plugins::uppercase_transform::UppercaseTransform;
use elspeth_store_sqlite::config::SqliteJournalMode;
use elspeth_store_sqlite::config::SqliteRecorderConfig;
use elspeth_store_sqlite::config::SqliteSyncMode;
use elspeth_store_sqlite::recorder::SqliteRecorder;
use serde_json::Value;
use serde_json::json;

/// One temporary SQLite recorder plus payload store, backing a single
/// scenario. Kept together so the `TempDir` outlives every reference into
/// it.
struct Harness {
    _dir: tempfile::TempDir,
    sqlite: Arc<SqliteRecorder>,
    payload_store: PayloadStore,
}

impl Harness {
    fn recorder(&self) -> SharedRecorder {
        Arc::clone(&self.sqlite) as SharedRecorder
    }
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SqliteRecorderConfig {
        path: dir.path().join("audit.sqlite3"),
        busy_timeout_ms: 1_000,
        journal_mode: SqliteJournalMode::Wal,
        sync_mode: SqliteSyncMode::Normal,
        read_pool_size: 1,
        payload_root: None,
    };
    let sqlite = Arc::new(SqliteRecorder::open(&config).expect("open recorder"));
    let payload_store = PayloadStore::open(dir.path().join("payloads")).expect("open payload store");
    Harness { _dir: dir, sqlite, payload_store }
}

fn node_of(run_id: &RunId, node_id: &NodeId, label: &str, node_type: NodeType) -> Node {
    Node {
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

fn edge(run_id: &RunId, from: &NodeId, to: &NodeId, route_label: Option<&str>) -> Edge {
    Edge {
        edge_id: EdgeId::generate(),
        run_id: run_id.clone(),
        from_node_id: from.clone(),
        to_node_id: to.clone(),
        route_label: route_label.map(str::to_string),
    }
}

// ============================================================================
// SECTION: S1 - Linear pipeline, single row
// ============================================================================

#[tokio::test]
async fn s1_linear_pipeline_completes_a_single_row() {
    let h = harness();
    let run_id = h.sqlite.begin_run("fingerprint".to_string(), RunMode::Live, None).expect("begin run");

    let source_id = h
        .sqlite
        .register_node(&run_id, "source", NodeType::Source, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register source");
    let transform_id = h
        .sqlite
        .register_node(&run_id, "upper", NodeType::Transform, "uppercase", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register transform");
    let sink_id = h
        .sqlite
        .register_node(&run_id, "sink", NodeType::Sink, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register sink");
    h.sqlite.register_edge(&run_id, &source_id, &transform_id, None).expect("edge 1");
    h.sqlite.register_edge(&run_id, &transform_id, &sink_id, None).expect("edge 2");

    let graph = Graph::build(
        vec![
            node_of(&run_id, &source_id, "source", NodeType::Source),
            node_of(&run_id, &transform_id, "upper", NodeType::Transform),
            node_of(&run_id, &sink_id, "sink", NodeType::Sink),
        ],
        vec![edge(&run_id, &source_id, &transform_id, None), edge(&run_id, &transform_id, &sink_id, None)],
    )
    .expect("graph");

    let mut plugins = PluginSet::new();
    plugins.register_source("source", Box::new(JsonSource::from_str("{\"id\":1,\"text\":\"hello\"}\n")));
    plugins.register_transform("upper", Box::new(UppercaseTransform::new("text")));
    let sink = JsonSink::new("mem://s1");
    let buffer = sink.buffer();
    plugins.register_sink("sink", Box::new(sink));

    let mut scheduler =
        Scheduler::new(graph, h.recorder(), plugins, run_id.clone(), SchedulerConfig::default(), BTreeMap::new(), Some(h.payload_store.clone()));
    let summary = scheduler.run(&CancellationToken::new()).await.expect("run completes");

    assert_eq!(summary.rows_ingested, 1);
    assert_eq!(summary.tokens_completed, 1);

    let guard = buffer.lock().expect("lock");
    assert_eq!(String::from_utf8_lossy(&guard), "{\"id\":1,\"text\":\"HELLO\"}\n");
    drop(guard);

    let row_ids = h.sqlite.row_ids_for_run(&run_id).expect("row ids");
    assert_eq!(row_ids.len(), 1);
    assert_eq!(row_ids[0], h.sqlite.explain(&row_ids[0]).expect("explain").row.row_id);

    let explanation = h.sqlite.explain(&row_ids[0]).expect("explain");
    assert_eq!(explanation.row.row_index, 0);
    assert_eq!(explanation.states.len(), 3, "one NodeState per source/transform/sink");
    assert!(explanation.states.iter().all(|state| matches!(state, NodeState::Completed { .. })));

    let mut expected_row = RowData::new();
    expected_row.insert("id".to_string(), json!(1));
    expected_row.insert("text".to_string(), json!("HELLO"));
    let expected_output_hash = hashing::stable_hash(&vec![expected_row]).expect("hash");
    let transform_state = explanation
        .states
        .iter()
        .find(|state| state.common().node_id == transform_id)
        .expect("transform state present");
    match transform_state {
        NodeState::Completed { output_hash, .. } => assert_eq!(*output_hash, expected_output_hash),
        other => panic!("expected a completed transform state, got {other:?}"),
    }

    assert_eq!(explanation.outcomes.len(), 1);
    assert!(matches!(explanation.outcomes[0].outcome, RowOutcome::Completed));
}

// ============================================================================
// SECTION: S2 - Gate fork
// ============================================================================

/// Routes by comparing a numeric field against a threshold, something
/// `FieldRouteGate` cannot do since it only compares a field's raw string
/// value; needed to express "score >= 0.5" literally.
struct ScoreThresholdGate {
    field: String,
    threshold: f64,
    high_label: String,
    low_label: String,
}

#[async_trait]
impl Gate for ScoreThresholdGate {
    async fn evaluate(&self, row: &RowData, _ctx: &PluginContext) -> Result<RoutingAction, GateError> {
        let value = row
            .get(&self.field)
            .and_then(Value::as_f64)
            .ok_or_else(|| GateError::Evaluation(format!("missing numeric field {}", self.field)))?;
        let label = if value >= self.threshold { self.high_label.clone() } else { self.low_label.clone() };
        Ok(RoutingAction::Route { label })
    }
}

#[tokio::test]
async fn s2_gate_fork_routes_a_high_score_to_the_high_sink() {
    let h = harness();
    let run_id = h.sqlite.begin_run("fingerprint".to_string(), RunMode::Live, None).expect("begin run");

    let source_id = h
        .sqlite
        .register_node(&run_id, "source", NodeType::Source, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register source");
    let gate_id = h
        .sqlite
        .register_node(&run_id, "score_gate", NodeType::Gate, "score_threshold", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register gate");
    let high_sink_id = h
        .sqlite
        .register_node(&run_id, "high_sink", NodeType::Sink, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register high sink");
    let low_sink_id = h
        .sqlite
        .register_node(&run_id, "low_sink", NodeType::Sink, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register low sink");
    h.sqlite.register_edge(&run_id, &source_id, &gate_id, None).expect("edge source->gate");
    let high_edge_id = h.sqlite.register_edge(&run_id, &gate_id, &high_sink_id, Some("high".to_string())).expect("edge high");
    h.sqlite.register_edge(&run_id, &gate_id, &low_sink_id, Some("low".to_string())).expect("edge low");

    let graph = Graph::build(
        vec![
            node_of(&run_id, &source_id, "source", NodeType::Source),
            node_of(&run_id, &gate_id, "score_gate", NodeType::Gate),
            node_of(&run_id, &high_sink_id, "high_sink", NodeType::Sink),
            node_of(&run_id, &low_sink_id, "low_sink", NodeType::Sink),
        ],
        vec![
            edge(&run_id, &source_id, &gate_id, None),
            edge(&run_id, &gate_id, &high_sink_id, Some("high")),
            edge(&run_id, &gate_id, &low_sink_id, Some("low")),
        ],
    )
    .expect("graph");

    let mut plugins = PluginSet::new();
    plugins.register_source("source", Box::new(JsonSource::from_str("{\"score\":0.9}\n")));
    plugins.register_gate(
        "score_gate",
        Box::new(ScoreThresholdGate { field: "score".to_string(), threshold: 0.5, high_label: "high".to_string(), low_label: "low".to_string() }),
    );
    let high_sink = JsonSink::new("mem://high");
    let high_buffer = high_sink.buffer();
    plugins.register_sink("high_sink", Box::new(high_sink));
    let low_sink = JsonSink::new("mem://low");
    let low_buffer = low_sink.buffer();
    plugins.register_sink("low_sink", Box::new(low_sink));

    let mut scheduler =
        Scheduler::new(graph, h.recorder(), plugins, run_id.clone(), SchedulerConfig::default(), BTreeMap::new(), Some(h.payload_store.clone()));
    let summary = scheduler.run(&CancellationToken::new()).await.expect("run completes");
    assert_eq!(summary.tokens_completed, 1);

    let high_guard = high_buffer.lock().expect("lock");
    assert_eq!(String::from_utf8_lossy(&high_guard), "{\"score\":0.9}\n");
    drop(high_guard);
    assert!(low_buffer.lock().expect("lock").is_empty());

    let row_ids = h.sqlite.row_ids_for_run(&run_id).expect("row ids");
    assert_eq!(row_ids.len(), 1);
    let explanation = h.sqlite.explain(&row_ids[0]).expect("explain");
    assert_eq!(explanation.routing_events.len(), 1);
    assert_eq!(explanation.routing_events[0].edge_id, high_edge_id);
    assert_eq!(explanation.outcomes.len(), 1);
    assert!(matches!(explanation.outcomes[0].outcome, RowOutcome::Completed));
}

// ============================================================================
// SECTION: S3 - Count aggregation
// ============================================================================

#[tokio::test]
async fn s3_count_aggregation_flushes_in_batches_of_three_with_a_partial_tail() {
    let h = harness();
    let run_id = h.sqlite.begin_run("fingerprint".to_string(), RunMode::Live, None).expect("begin run");

    let source_id = h
        .sqlite
        .register_node(&run_id, "source", NodeType::Source, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register source");
    let agg_id = h
        .sqlite
        .register_node(&run_id, "batch", NodeType::Aggregation, "count", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register aggregation");
    let sink_id = h
        .sqlite
        .register_node(&run_id, "sink", NodeType::Sink, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register sink");
    h.sqlite.register_edge(&run_id, &source_id, &agg_id, None).expect("edge 1");
    h.sqlite.register_edge(&run_id, &agg_id, &sink_id, None).expect("edge 2");

    let graph = Graph::build(
        vec![
            node_of(&run_id, &source_id, "source", NodeType::Source),
            node_of(&run_id, &agg_id, "batch", NodeType::Aggregation),
            node_of(&run_id, &sink_id, "sink", NodeType::Sink),
        ],
        vec![edge(&run_id, &source_id, &agg_id, None), edge(&run_id, &agg_id, &sink_id, None)],
    )
    .expect("graph");

    let rows: String = (0..7).map(|i| format!("{{\"amount\":{i}}}\n")).collect();
    let mut plugins = PluginSet::new();
    plugins.register_source("source", Box::new(JsonSource::from_str(&rows)));
    plugins.register_aggregation("batch", Box::new(CountAggregation::new(3, "amount")));
    let sink = JsonSink::new("mem://s3");
    let buffer = sink.buffer();
    plugins.register_sink("sink", Box::new(sink));

    let config = SchedulerConfig { aggregation_batch_size: 3, ..SchedulerConfig::default() };
    let mut scheduler = Scheduler::new(graph, h.recorder(), plugins, run_id.clone(), config, BTreeMap::new(), Some(h.payload_store.clone()));
    let summary = scheduler.run(&CancellationToken::new()).await.expect("run completes");

    assert_eq!(summary.rows_ingested, 7);
    assert_eq!(summary.tokens_completed, 3, "two full batches plus one source-exhausted partial flush");

    let guard = buffer.lock().expect("lock");
    let lines: Vec<&str> = std::str::from_utf8(&guard).expect("utf8").lines().collect();
    assert_eq!(lines, vec!["{\"count\":3,\"sum\":3.0}", "{\"count\":3,\"sum\":12.0}", "{\"count\":1,\"sum\":6.0}"]);
    drop(guard);

    let row_ids = h.sqlite.row_ids_for_run(&run_id).expect("row ids");
    assert_eq!(row_ids.len(), 7);
    for row_id in &row_ids {
        let explanation = h.sqlite.explain(row_id).expect("explain");
        assert_eq!(explanation.outcomes.len(), 1);
        assert!(matches!(explanation.outcomes[0].outcome, RowOutcome::ConsumedInBatch));
    }
}

// ============================================================================
// SECTION: S4 - Retry then success
// ============================================================================

/// Simulates an external call that fails twice retryably, then succeeds on
/// the third attempt, logging all three attempts against the one `NodeState`
/// this invocation opens, the way `HttpTransform` logs `AuditedClient`'s
/// internal retries.
struct RetryThenSucceedTransform {
    endpoint: String,
}

impl RetryThenSucceedTransform {
    fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into() }
    }
}

#[async_trait]
impl elspeth_core::Transform for RetryThenSucceedTransform {
    async fn process(&self, row: RowData, ctx: &PluginContext) -> elspeth_core::TransformResult {
        let request_hash = hashing::stable_hash(&row).unwrap_or_else(|_| "unhashable".to_string());
        let mut final_row = row;
        final_row.insert("status".to_string(), json!("ok"));
        let response_hash = hashing::stable_hash(&final_row).unwrap_or_else(|_| "unhashable".to_string());

        if let Some(log) = &ctx.call_log {
            let statuses = [CallStatus::Error, CallStatus::Error, CallStatus::Success];
            let mut guard = log.lock().expect("call log mutex poisoned");
            for (index, status) in statuses.into_iter().enumerate() {
                let attempt = u32::try_from(index + 1).unwrap_or(u32::MAX);
                let started_at = Timestamp::now();
                guard.push(PendingCall {
                    call_type: CallType::Http,
                    endpoint: self.endpoint.clone(),
                    started_at,
                    completed_at: Timestamp::now(),
                    duration_ms: 1,
                    status,
                    request_hash: request_hash.clone(),
                    response_hash: if status == CallStatus::Success { Some(response_hash.clone()) } else { None },
                    request_ref: None,
                    response_ref: None,
                    secret_fingerprint: None,
                    attempt,
                    provider_request_id: None,
                });
            }
        }

        elspeth_core::TransformResult::Success { rows: vec![final_row] }
    }
}

#[tokio::test]
async fn s4_retry_then_success_records_three_call_attempts_on_one_node_state() {
    let h = harness();
    let run_id = h.sqlite.begin_run("fingerprint".to_string(), RunMode::Live, None).expect("begin run");

    let source_id = h
        .sqlite
        .register_node(&run_id, "source", NodeType::Source, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register source");
    let transform_id = h
        .sqlite
        .register_node(&run_id, "call", NodeType::Transform, "retry_then_succeed", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register transform");
    let sink_id = h
        .sqlite
        .register_node(&run_id, "sink", NodeType::Sink, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register sink");
    h.sqlite.register_edge(&run_id, &source_id, &transform_id, None).expect("edge 1");
    h.sqlite.register_edge(&run_id, &transform_id, &sink_id, None).expect("edge 2");

    let graph = Graph::build(
        vec![
            node_of(&run_id, &source_id, "source", NodeType::Source),
            node_of(&run_id, &transform_id, "call", NodeType::Transform),
            node_of(&run_id, &sink_id, "sink", NodeType::Sink),
        ],
        vec![edge(&run_id, &source_id, &transform_id, None), edge(&run_id, &transform_id, &sink_id, None)],
    )
    .expect("graph");

    let mut plugins = PluginSet::new();
    plugins.register_source("source", Box::new(JsonSource::from_str("{\"id\":1}\n")));
    plugins.register_transform("call", Box::new(RetryThenSucceedTransform::new("https://example.invalid/enrich")));
    let sink = JsonSink::new("mem://s4");
    plugins.register_sink("sink", Box::new(sink));

    let mut scheduler =
        Scheduler::new(graph, h.recorder(), plugins, run_id.clone(), SchedulerConfig::default(), BTreeMap::new(), Some(h.payload_store.clone()));
    let summary = scheduler.run(&CancellationToken::new()).await.expect("run completes");
    assert_eq!(summary.tokens_completed, 1);

    let row_ids = h.sqlite.row_ids_for_run(&run_id).expect("row ids");
    let explanation = h.sqlite.explain(&row_ids[0]).expect("explain");

    let transform_states: Vec<&NodeState> = explanation.states.iter().filter(|state| state.common().node_id == transform_id).collect();
    assert_eq!(transform_states.len(), 1, "one NodeState covers every retried call attempt");
    assert!(matches!(transform_states[0], NodeState::Completed { .. }));

    let mut calls = explanation.calls.clone();
    calls.sort_by_key(|call| call.attempt);
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].attempt, 1);
    assert_eq!(calls[0].status, CallStatus::Error);
    assert_eq!(calls[1].attempt, 2);
    assert_eq!(calls[1].status, CallStatus::Error);
    assert_eq!(calls[2].attempt, 3);
    assert_eq!(calls[2].status, CallStatus::Success);
    assert!(calls[2].response_hash.is_some());
}

// ============================================================================
// SECTION: S5 - Checkpoint and resume
// ============================================================================

/// Wraps a sink that succeeds for its first `remaining` writes, then fails
/// every call after, simulating a process crash partway through a run: the
/// scheduler propagates the failure and marks the run `failed` (§4.1).
struct CrashAfterNSink {
    inner: JsonSink,
    remaining: usize,
}

impl CrashAfterNSink {
    fn new(inner: JsonSink, remaining: usize) -> Self {
        Self { inner, remaining }
    }

    fn buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        self.inner.buffer()
    }
}

#[async_trait]
impl Sink for CrashAfterNSink {
    async fn write(&mut self, rows: Vec<RowData>, ctx: &PluginContext) -> Result<ArtifactDescriptor, SinkError> {
        if self.remaining == 0 {
            return Err(SinkError::Write("simulated crash".to_string()));
        }
        self.remaining -= 1;
        self.inner.write(rows, ctx).await
    }
}

#[tokio::test]
async fn s5_resume_completes_a_crashed_run_without_double_completion() {
    let h = harness();
    let run_id = h.sqlite.begin_run("fingerprint".to_string(), RunMode::Live, None).expect("begin run");

    let source_id = h
        .sqlite
        .register_node(&run_id, "source", NodeType::Source, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register source");
    let transform_id = h
        .sqlite
        .register_node(&run_id, "upper", NodeType::Transform, "uppercase", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register transform");
    let sink_id = h
        .sqlite
        .register_node(&run_id, "sink", NodeType::Sink, "json", "0.0.0", "hash", Determinism::Deterministic)
        .expect("register sink");
    h.sqlite.register_edge(&run_id, &source_id, &transform_id, None).expect("edge 1");
    h.sqlite.register_edge(&run_id, &transform_id, &sink_id, None).expect("edge 2");

    let graph = Graph::build(
        vec![
            node_of(&run_id, &source_id, "source", NodeType::Source),
            node_of(&run_id, &transform_id, "upper", NodeType::Transform),
            node_of(&run_id, &sink_id, "sink", NodeType::Sink),
        ],
        vec![edge(&run_id, &source_id, &transform_id, None), edge(&run_id, &transform_id, &sink_id, None)],
    )
    .expect("graph");

    let rows: String = (0..100).map(|i| format!("{{\"id\":{i},\"text\":\"row{i}\"}}\n")).collect();

    let mut plugins = PluginSet::new();
    plugins.register_source("source", Box::new(JsonSource::from_str(&rows)));
    plugins.register_transform("upper", Box::new(UppercaseTransform::new("text")));
    let crashing_sink = CrashAfterNSink::new(JsonSink::new("mem://s5"), 50);
    let pre_crash_buffer = crashing_sink.buffer();
    plugins.register_sink("sink", Box::new(crashing_sink));

    let config = SchedulerConfig::default();
    let mut scheduler =
        Scheduler::new(graph.clone(), h.recorder(), plugins, run_id.clone(), config.clone(), BTreeMap::new(), Some(h.payload_store.clone()));
    let outcome = scheduler.run(&CancellationToken::new()).await;
    assert!(outcome.is_err(), "the injected sink failure must fail the run");
    drop(scheduler);

    let pre_crash_guard = pre_crash_buffer.lock().expect("lock");
    let pre_crash_lines = String::from_utf8_lossy(&pre_crash_guard).lines().count();
    assert_eq!(pre_crash_lines, 50, "exactly the first 50 rows reached the sink before the crash");
    drop(pre_crash_guard);

    let checkpointer = Checkpointer::new(h.recorder());
    checkpointer.begin_resume(&run_id).expect("run must be failed before a resume is allowed");

    let plan = checkpointer.plan_resume(&run_id, &graph).expect("plan");
    assert_eq!(plan.len(), 50, "the 50 rows past the crash point are still pending resume");

    let mut resumed_plugins = PluginSet::new();
    resumed_plugins.register_source("source", Box::new(JsonSource::from_str("")));
    resumed_plugins.register_transform("upper", Box::new(UppercaseTransform::new("text")));
    let resumed_sink = JsonSink::new("mem://s5-resumed");
    let resumed_buffer = resumed_sink.buffer();
    resumed_plugins.register_sink("sink", Box::new(resumed_sink));

    let mut resumed = Scheduler::resume_from_plan(
        graph,
        h.recorder(),
        resumed_plugins,
        run_id.clone(),
        config,
        BTreeMap::new(),
        Some(h.payload_store.clone()),
        &plan,
    )
    .expect("resume_from_plan");
    let summary = resumed.run_resumed(&CancellationToken::new()).await.expect("resumed run completes");
    assert_eq!(summary.tokens_completed, 50);

    let resumed_guard = resumed_buffer.lock().expect("lock");
    assert_eq!(String::from_utf8_lossy(&resumed_guard).lines().count(), 50);
    drop(resumed_guard);

    let row_ids = h.sqlite.row_ids_for_run(&run_id).expect("row ids");
    assert_eq!(row_ids.len(), 100);
    for row_id in &row_ids {
        let explanation = h.sqlite.explain(row_id).expect("explain");
        assert_eq!(explanation.outcomes.len(), 1, "row {row_id:?} must complete exactly once, not be replayed");
        assert!(matches!(explanation.outcomes[0].outcome, RowOutcome::Completed));
    }
}

// ============================================================================
// SECTION: S6 - Integrity failure
// ============================================================================

#[test]
fn s6_payload_store_reports_corruption_on_a_tampered_blob() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("payloads");
    let store = PayloadStore::open(&root).expect("open store");
    let hash = store.put(b"original content").expect("put");

    let blob_path = root.join(&hash[0..2]).join(&hash);
    std::fs::write(&blob_path, b"tampered content").expect("tamper with the blob out of band");

    let err = store.get(&hash).expect_err("a tampered blob must never be returned as valid");
    match err {
        PayloadError::Corrupt { hash: corrupt_hash } => assert_eq!(corrupt_hash, hash),
        other => panic!("expected PayloadError::Corrupt, got {other:?}"),
    }
}
