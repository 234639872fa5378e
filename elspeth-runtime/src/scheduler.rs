// elspeth-runtime/src/scheduler.rs
// ============================================================================
// Module: Orchestrator / Control Loop (C10)
// Description: Owns the token work queue and walks a validated graph from
//              source to sinks, dispatching each node through the C9
//              executors and recording checkpoints at safe restart
//              boundaries.
// Purpose: The single place that decides "what runs next"; every audit
//          bracket lives in `executors`, every structural fact lives in
//          `Graph` — this module only sequences the two (§5).
// Dependencies: elspeth-core::{dag, recorder, entities, enums, interfaces},
//               crate::{executors, checkpoint, error, plugins}
// ============================================================================

//! ## Overview
//! The scheduler is a single logical control loop (§5): it owns one
//! `VecDeque` of pending token work and drains it to completion. Ordering
//! is only guaranteed within one token's path; between tokens, work is
//! processed in queue order, which is insertion order. Parallelism, where a
//! node opts into pooled execution, is left to a future pooled executor (see
//! DESIGN.md); the default path here is the spec's single-threaded baseline.
//!
//! A coalesce node's arrivals are buffered per `(node_id, coalesce_key)`,
//! where the key is the originating row's id (or, for tokens minted fresh by
//! an aggregation flush, the producing token's own id), until every expected
//! route label (derived from `Graph::incoming_edges`) has arrived; then
//! `executors::execute_coalesce` is called once. An aggregation node's
//! buffer triggers `execute_aggregation_flush` once
//! `SchedulerConfig::aggregation_batch_size` tokens have been accepted, and
//! once more, with `FlushReason::SourceExhausted`, after the source is
//! drained and every other node has quiesced.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use elspeth_core::dag::Graph;
use elspeth_core::entities::Node;
use elspeth_core::enums::BatchStatus;
use elspeth_core::enums::NodeType;
use elspeth_core::enums::RoutingKind;
use elspeth_core::enums::RoutingMode;
use elspeth_core::enums::RowOutcome;
use elspeth_core::identifiers::BatchId;
use elspeth_core::identifiers::NodeId;
use elspeth_core::identifiers::RunId;
use elspeth_core::identifiers::TokenId;
use elspeth_core::interfaces::FlushReason;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RoutingAction;
use elspeth_core::interfaces::RowData;
use elspeth_core::recorder::SharedRecorder;
use serde_json::Value;

use crate::checkpoint::Checkpointer;
use crate::error::SchedulerError;
use crate::executors;
use crate::executors::AggregationAcceptOutcome;
use crate::executors::GateOutcome;
use crate::executors::TransformOutcome;
use crate::plugins::PluginSet;

/// Tunables for one scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Ceiling on the number of items the work queue may hold at once.
    /// Exceeding it fails the run rather than growing unboundedly.
    pub max_queue_len: usize,
    /// How many attempts a retryable transform failure gets before the
    /// token is quarantined.
    pub max_transform_attempts: u32,
    /// How many accepted rows trigger an aggregation node's count flush.
    pub aggregation_batch_size: usize,
    /// Per-node execution budget. `None` disables the timeout.
    pub node_timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_queue_len: 10_000, max_transform_attempts: 3, aggregation_batch_size: 100, node_timeout_ms: None }
    }
}

/// Cooperative cancellation handle shared between the caller and a running
/// scheduler. Checked between queue items, never preempting mid-execution.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Builds a fresh, unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; observed at the next queue item boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts of how a run's tokens resolved, returned once the queue drains.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Rows read from the source.
    pub rows_ingested: u64,
    /// Tokens that reached a sink successfully.
    pub tokens_completed: u64,
    /// Tokens quarantined after exhausting retries or a gate/transform
    /// failure that does not abort the run.
    pub tokens_quarantined: u64,
    /// True if the run was cancelled before the source was exhausted.
    pub cancelled: bool,
}

/// One unit of pending work: a token sitting at a node, ready to execute.
struct WorkItem {
    /// The token this work belongs to.
    token_id: TokenId,
    /// The key a downstream coalesce barrier groups this token's arrival
    /// under: the originating row's id for tokens descended from a single
    /// source row, or the producing token's own id for tokens minted fresh
    /// by an aggregation flush (which have no originating row).
    coalesce_key: String,
    /// The node this token is about to execute at.
    node_id: NodeId,
    /// The row content carried into that node.
    row: RowData,
    /// The zero-based attempt number this execution will record.
    attempt: u32,
    /// The route label of the edge this token arrived via, if the edge
    /// carried one (gate branches, and edges feeding a coalesce).
    arrived_via_label: Option<String>,
}

/// Buffered arrivals for one open coalesce barrier.
#[derive(Default)]
struct CoalesceBuffer {
    /// The parent tokens that have arrived so far.
    parents: Vec<TokenId>,
    /// Each arrival's row, keyed by the route label it arrived on.
    rows: BTreeMap<String, RowData>,
}

/// Tokens accepted into one open aggregation batch, awaiting flush.
#[derive(Default)]
struct AggregationBuffer {
    /// The parent tokens accepted into the batch so far.
    parents: Vec<TokenId>,
    /// The audit `Batch` this buffer's acceptances are recorded against,
    /// opened on the buffer's first accepted token.
    batch_id: Option<BatchId>,
}

/// The control loop: walks `graph` from its source to its sinks, dispatching
/// every node through the C9 executors.
pub struct Scheduler {
    /// The validated DAG this run walks.
    graph: Graph,
    /// The audit recorder every executor brackets its work with.
    recorder: SharedRecorder,
    /// The resolved plugin instance for every node label.
    plugins: PluginSet,
    /// The run this scheduler is driving.
    run_id: RunId,
    /// Tunables controlling queue, retry, batch, and timeout behavior.
    config: SchedulerConfig,
    /// Writes and clears checkpoints on this scheduler's behalf.
    checkpointer: Checkpointer,
    /// Each node's resolved plugin configuration, by label.
    node_configs: BTreeMap<String, Value>,
    /// Monotonically incrementing checkpoint sequence number for this run.
    sequence: u64,
    /// Work items awaiting dispatch, in FIFO order.
    queue: VecDeque<WorkItem>,
    /// Arrivals awaiting a coalesce merge, keyed by node and grouping key.
    coalesce_buffers: BTreeMap<(NodeId, String), CoalesceBuffer>,
    /// Tokens awaiting an aggregation flush, keyed by node.
    aggregation_buffers: BTreeMap<NodeId, AggregationBuffer>,
    /// Where checkpointed row content is written, so a resumed run can
    /// rehydrate it. `None` disables row persistence; checkpoints are still
    /// written, but resume cannot rehydrate a row from them.
    payload_store: Option<elspeth_payload::PayloadStore>,
}

impl Scheduler {
    /// Builds a scheduler for one run over an already-validated graph.
    #[must_use]
    pub fn new(
        graph: Graph,
        recorder: SharedRecorder,
        plugins: PluginSet,
        run_id: RunId,
        config: SchedulerConfig,
        node_configs: BTreeMap<String, Value>,
        payload_store: Option<elspeth_payload::PayloadStore>,
    ) -> Self {
        let checkpointer = Checkpointer::new(Arc::clone(&recorder));
        Self {
            graph,
            recorder,
            plugins,
            run_id,
            config,
            checkpointer,
            node_configs,
            sequence: 0,
            queue: VecDeque::new(),
            coalesce_buffers: BTreeMap::new(),
            aggregation_buffers: BTreeMap::new(),
            payload_store,
        }
    }

    /// Builds a scheduler that resumes `run_id` from `plan` instead of
    /// ingesting from the source: every checkpointed continuation still
    /// pending (i.e. for a token with no terminal outcome) is rehydrated
    /// from the payload store and re-enqueued directly (§4.7).
    ///
    /// Tokens mid-aggregation-batch at the moment of the crash are
    /// re-accepted into a fresh batch rather than their original one, since
    /// an open batch's in-memory buffer does not survive a process restart;
    /// everything downstream of a transform, gate, or coalesce resumes
    /// exactly where it left off.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::QueueCeilingExceeded`] if rehydrating the
    /// plan overflows the queue, [`SchedulerError::MissingPayloadStore`] if
    /// a checkpoint has a row to rehydrate but no store is configured, or a
    /// payload/codec error if a checkpointed row cannot be read back.
    #[allow(clippy::too_many_arguments)]
    pub fn resume_from_plan(
        graph: Graph,
        recorder: SharedRecorder,
        plugins: PluginSet,
        run_id: RunId,
        config: SchedulerConfig,
        node_configs: BTreeMap<String, Value>,
        payload_store: Option<elspeth_payload::PayloadStore>,
        plan: &crate::checkpoint::ResumePlan,
    ) -> Result<Self, SchedulerError> {
        let mut scheduler = Self::new(graph, recorder, plugins, run_id, config, node_configs, payload_store);
        scheduler.sequence = plan.checkpoints().map(|checkpoint| checkpoint.sequence_number).max().unwrap_or(0);
        for checkpoint in plan.checkpoints() {
            let Some(row_ref) = &checkpoint.row_ref else { continue };
            let Some(store) = &scheduler.payload_store else {
                return Err(SchedulerError::MissingPayloadStore { token_id: checkpoint.token_id.to_string() });
            };
            let bytes = store.get(row_ref)?;
            let row: RowData = serde_json::from_slice(&bytes)?;
            let coalesce_key = checkpoint.coalesce_key.clone().unwrap_or_else(|| checkpoint.token_id.as_str().to_string());
            scheduler.push(WorkItem {
                token_id: checkpoint.token_id.clone(),
                coalesce_key,
                node_id: checkpoint.node_id.clone(),
                row,
                attempt: 0,
                arrived_via_label: checkpoint.route_label.clone(),
            })?;
        }
        Ok(scheduler)
    }

    /// Drains the resumed queue to completion, flushing any aggregations
    /// still open, without re-ingesting from the source.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] under the same conditions as [`Scheduler::run`].
    pub async fn run_resumed(&mut self, cancellation: &CancellationToken) -> Result<RunSummary, SchedulerError> {
        let mut summary = RunSummary::default();
        let outcome = async {
            self.drain_queue(cancellation, &mut summary).await?;
            self.flush_remaining_aggregations(&mut summary).await?;
            self.drain_queue(cancellation, &mut summary).await
        }
        .await;
        match outcome {
            Ok(()) => {
                self.recorder.complete_run(&self.run_id)?;
                self.checkpointer.clear(&self.run_id)?;
                Ok(summary)
            }
            Err(SchedulerError::Cancelled) => {
                summary.cancelled = true;
                self.recorder.fail_run(&self.run_id)?;
                Ok(summary)
            }
            Err(err) => {
                self.recorder.fail_run(&self.run_id)?;
                Err(err)
            }
        }
    }

    /// Builds a fresh `PluginContext` for an invocation of the plugin at
    /// `label`, with a fresh call log ready to receive any external-call
    /// detail the plugin reports.
    fn ctx_for(&self, label: &str) -> PluginContext {
        PluginContext {
            run_id: self.run_id.clone(),
            node_label: label.to_string(),
            config: self.node_configs.get(label).cloned().unwrap_or(Value::Null),
            checkpoint: None,
            call_log: Some(executors::new_call_log()),
        }
    }

    /// Enqueues `item`, failing if the queue is already at its configured
    /// ceiling.
    fn push(&mut self, item: WorkItem) -> Result<(), SchedulerError> {
        if self.queue.len() >= self.config.max_queue_len {
            return Err(SchedulerError::QueueCeilingExceeded { ceiling: self.config.max_queue_len });
        }
        self.queue.push_back(item);
        Ok(())
    }

    /// Writes the checkpoint for a continuation about to be pushed onto the
    /// queue: `node_id` is the node the token is headed to next, not the one
    /// it just left. `row` is persisted to the payload store, if configured,
    /// so a resumed run can rehydrate it without re-reading the source.
    fn checkpoint_continuation(
        &mut self,
        token_id: &TokenId,
        node_id: &NodeId,
        row: &RowData,
        route_label: Option<String>,
        coalesce_key: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.sequence += 1;
        let row_ref = match &self.payload_store {
            Some(store) => Some(store.put(&serde_json::to_vec(row)?)?),
            None => None,
        };
        self.checkpointer.record(&self.run_id, token_id, node_id, self.sequence, None, row_ref, route_label, coalesce_key)?;
        Ok(())
    }

    /// Runs the pipeline to completion: ingests every source row, drains
    /// the work queue, flushes any still-open aggregations, and marks the
    /// run `completed` or `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the graph has no resolvable source, a
    /// plugin is unregistered, or the recorder reports a failure; these all
    /// fail the run.
    pub async fn run(&mut self, cancellation: &CancellationToken) -> Result<RunSummary, SchedulerError> {
        let mut summary = RunSummary::default();
        match self.drive(cancellation, &mut summary).await {
            Ok(()) => {
                self.recorder.complete_run(&self.run_id)?;
                self.checkpointer.clear(&self.run_id)?;
                Ok(summary)
            }
            Err(SchedulerError::Cancelled) => {
                summary.cancelled = true;
                self.recorder.fail_run(&self.run_id)?;
                Ok(summary)
            }
            Err(err) => {
                self.recorder.fail_run(&self.run_id)?;
                Err(err)
            }
        }
    }

    /// Runs ingestion, drains the queue, flushes any aggregations still
    /// open once the source is exhausted, then drains whatever that flush
    /// produced.
    async fn drive(&mut self, cancellation: &CancellationToken, summary: &mut RunSummary) -> Result<(), SchedulerError> {
        self.ingest_all(cancellation, summary).await?;
        self.drain_queue(cancellation, summary).await?;
        self.flush_remaining_aggregations(summary).await?;
        self.drain_queue(cancellation, summary).await?;
        Ok(())
    }

    /// Reads every row from the graph's source node, enqueueing one work
    /// item per row along the source's single outgoing edge.
    async fn ingest_all(&mut self, cancellation: &CancellationToken, summary: &mut RunSummary) -> Result<(), SchedulerError> {
        let Some(source_node) = self.graph.nodes_of_type(NodeType::Source).into_iter().next().cloned() else {
            return Err(SchedulerError::Graph(elspeth_core::GraphError::NoSource));
        };
        let mut row_index: u64 = 0;
        loop {
            if cancellation.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            let ctx = self.ctx_for(&source_node.label);
            let ingested = self.with_timeout(&source_node.label, executors::execute_source(
                &self.recorder,
                &mut self.plugins,
                &source_node,
                &self.run_id,
                row_index,
                &ctx,
            ))
            .await?;
            let Some(ingested) = ingested else { break };
            row_index += 1;
            summary.rows_ingested += 1;

            let Some(edge) = self.graph.outgoing_edges(&source_node.node_id).iter().find_map(|edge_id| self.graph.edge(edge_id)) else {
                return Err(SchedulerError::DeadEnd { label: source_node.label.clone() });
            };
            let to_node_id = edge.to_node_id.clone();
            let route_label = edge.route_label.clone();
            let coalesce_key = ingested.row_id.as_str().to_string();
            self.checkpoint_continuation(&ingested.token_id, &to_node_id, &ingested.row, route_label.clone(), Some(coalesce_key.clone()))?;
            self.push(WorkItem {
                token_id: ingested.token_id,
                coalesce_key,
                node_id: to_node_id,
                row: ingested.row,
                attempt: 0,
                arrived_via_label: route_label,
            })?;
        }
        Ok(())
    }

    /// Pops and dispatches work items until the queue is empty.
    async fn drain_queue(&mut self, cancellation: &CancellationToken, summary: &mut RunSummary) -> Result<(), SchedulerError> {
        while let Some(item) = self.queue.pop_front() {
            if cancellation.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            self.dispatch(item, summary).await?;
        }
        Ok(())
    }

    /// Routes one work item to the executor matching its node's kind.
    async fn dispatch(&mut self, item: WorkItem, summary: &mut RunSummary) -> Result<(), SchedulerError> {
        let Some(node) = self.graph.node(&item.node_id).cloned() else {
            return Err(SchedulerError::DeadEnd { label: item.node_id.to_string() });
        };
        match node.node_type {
            NodeType::Source => Err(SchedulerError::DeadEnd { label: node.label.clone() }),
            NodeType::Transform => self.dispatch_transform(&node, item, summary).await,
            NodeType::Gate => self.dispatch_gate(&node, item).await,
            NodeType::Aggregation => self.dispatch_aggregation(&node, item).await,
            NodeType::Coalesce => self.dispatch_coalesce(&node, item).await,
            NodeType::Sink => self.dispatch_sink(&node, item, summary).await,
        }
    }

    /// Runs one transform attempt; on a retryable failure within the
    /// configured attempt ceiling, re-enqueues the next attempt, otherwise
    /// quarantines the token.
    async fn dispatch_transform(&mut self, node: &Node, item: WorkItem, summary: &mut RunSummary) -> Result<(), SchedulerError> {
        let ctx = self.ctx_for(&node.label);
        let outcome = self
            .with_timeout(
                &node.label,
                executors::execute_transform(&self.recorder, &self.plugins, node, &item.token_id, item.attempt, item.row.clone(), &ctx),
            )
            .await?;
        match outcome {
            TransformOutcome::Success(rows) => {
                self.continue_rows(node, &item.token_id, &item.coalesce_key, rows)?;
                Ok(())
            }
            TransformOutcome::Failed { retryable, .. } => {
                if retryable && item.attempt + 1 < self.config.max_transform_attempts {
                    self.push(WorkItem { attempt: item.attempt + 1, ..item })?;
                    Ok(())
                } else {
                    self.recorder.record_token_outcome(&self.run_id, &item.token_id, RowOutcome::Quarantined)?;
                    summary.tokens_quarantined += 1;
                    Ok(())
                }
            }
        }
    }

    /// Evaluates one gate and resolves its routing decision into the next
    /// work item(s), recording a `RoutingEvent` against the edge followed.
    async fn dispatch_gate(&mut self, node: &Node, item: WorkItem) -> Result<(), SchedulerError> {
        let ctx = self.ctx_for(&node.label);
        let outcome = self
            .with_timeout(&node.label, executors::execute_gate(&self.recorder, &self.plugins, node, &item.token_id, item.attempt, &item.row, &ctx))
            .await?;
        match outcome {
            GateOutcome::Action { state_id, action } => {
                match action {
                    RoutingAction::Continue => {
                        let Some(edge) = self.graph.outgoing_edges(&node.node_id).iter().find_map(|edge_id| {
                            self.graph.edge(edge_id).filter(|edge| edge.route_label.is_none())
                        }) else {
                            return Err(SchedulerError::DeadEnd { label: node.label.clone() });
                        };
                        let edge_id = edge.edge_id.clone();
                        let to_node_id = edge.to_node_id.clone();
                        self.recorder.record_routing_event(&state_id, &edge_id, RoutingKind::Continue, None, RoutingMode::Conditional)?;
                        self.checkpoint_continuation(&item.token_id, &to_node_id, &item.row, None, Some(item.coalesce_key.clone()))?;
                        self.push(WorkItem {
                            token_id: item.token_id,
                            coalesce_key: item.coalesce_key,
                            node_id: to_node_id,
                            row: item.row,
                            attempt: 0,
                            arrived_via_label: None,
                        })
                    }
                    RoutingAction::Route { label } => {
                        let Some(edge) = self.graph.edge_by_route_label(&node.node_id, &label) else {
                            return Err(SchedulerError::DeadEnd { label: node.label.clone() });
                        };
                        let edge_id = edge.edge_id.clone();
                        let to_node_id = edge.to_node_id.clone();
                        self.recorder.record_routing_event(&state_id, &edge_id, RoutingKind::Route, None, RoutingMode::Conditional)?;
                        self.checkpoint_continuation(&item.token_id, &to_node_id, &item.row, Some(label.clone()), Some(item.coalesce_key.clone()))?;
                        self.push(WorkItem {
                            token_id: item.token_id,
                            coalesce_key: item.coalesce_key,
                            node_id: to_node_id,
                            row: item.row,
                            attempt: 0,
                            arrived_via_label: Some(label),
                        })
                    }
                    RoutingAction::ForkToPaths { labels } => {
                        let children = self.recorder.fork_token(&item.token_id, &node.node_id, labels.len())?;
                        for (child_token_id, label) in children.into_iter().zip(labels) {
                            let Some(edge) = self.graph.edge_by_route_label(&node.node_id, &label) else {
                                return Err(SchedulerError::DeadEnd { label: node.label.clone() });
                            };
                            let edge_id = edge.edge_id.clone();
                            let to_node_id = edge.to_node_id.clone();
                            self.recorder.record_routing_event(&state_id, &edge_id, RoutingKind::Fork, None, RoutingMode::Conditional)?;
                            self.checkpoint_continuation(&child_token_id, &to_node_id, &item.row, Some(label.clone()), Some(item.coalesce_key.clone()))?;
                            self.push(WorkItem {
                                token_id: child_token_id,
                                coalesce_key: item.coalesce_key.clone(),
                                node_id: to_node_id,
                                row: item.row.clone(),
                                attempt: 0,
                                arrived_via_label: Some(label),
                            })?;
                        }
                        Ok(())
                    }
                }
            }
            GateOutcome::Failed { .. } => {
                self.recorder.record_token_outcome(&self.run_id, &item.token_id, RowOutcome::Failed)?;
                Ok(())
            }
        }
    }

    /// Buffers one row into an aggregation, opening a fresh audit `Batch` on
    /// the buffer's first accepted token, and flushing on a count trigger
    /// once the configured batch size is reached.
    async fn dispatch_aggregation(&mut self, node: &Node, item: WorkItem) -> Result<(), SchedulerError> {
        let existing_batch_id = self.aggregation_buffers.get(&node.node_id).and_then(|buffer| buffer.batch_id.clone());
        let position = self.aggregation_buffers.get(&node.node_id).map_or(0, |buffer| buffer.parents.len()) as u32;
        let batch_id = match existing_batch_id {
            Some(batch_id) => batch_id,
            None => self.recorder.open_batch(&self.run_id, &node.node_id)?,
        };

        let ctx = self.ctx_for(&node.label);
        let outcome = self
            .with_timeout(
                &node.label,
                executors::execute_aggregation_accept(&self.recorder, &mut self.plugins, node, &item.token_id, &batch_id, position, item.row.clone(), &ctx),
            )
            .await?;
        match outcome {
            AggregationAcceptOutcome::Buffered => {
                let buffer = self.aggregation_buffers.entry(node.node_id.clone()).or_default();
                buffer.batch_id = Some(batch_id);
                buffer.parents.push(item.token_id.clone());
                self.recorder.record_token_outcome(&self.run_id, &item.token_id, RowOutcome::ConsumedInBatch)?;
                if self.aggregation_buffers.get(&node.node_id).is_some_and(|buffer| buffer.parents.len() >= self.config.aggregation_batch_size) {
                    self.flush_aggregation(node, FlushReason::Count).await?;
                }
                Ok(())
            }
            AggregationAcceptOutcome::Failed { .. } => {
                if self.aggregation_buffers.get(&node.node_id).is_none() {
                    self.recorder.close_batch(&batch_id, BatchStatus::Failed, None, &[])?;
                }
                self.recorder.record_token_outcome(&self.run_id, &item.token_id, RowOutcome::Failed)?;
                Ok(())
            }
        }
    }

    /// Flushes `node`'s open aggregation batch, if any, continuing each
    /// output row along the node's outgoing edge.
    async fn flush_aggregation(&mut self, node: &Node, reason: FlushReason) -> Result<(), SchedulerError> {
        let Some(buffer) = self.aggregation_buffers.remove(&node.node_id) else { return Ok(()) };
        if buffer.parents.is_empty() {
            return Ok(());
        }
        let Some(batch_id) = buffer.batch_id else { return Ok(()) };
        let ctx = self.ctx_for(&node.label);
        let outputs = executors::execute_aggregation_flush(&self.recorder, &mut self.plugins, node, &buffer.parents, &batch_id, reason, &ctx).await?;
        for (output_token_id, row) in outputs {
            let coalesce_key = output_token_id.as_str().to_string();
            self.continue_rows(node, &output_token_id, &coalesce_key, vec![row])?;
        }
        Ok(())
    }

    /// Flushes every aggregation node still holding a non-empty batch,
    /// once the source has been fully ingested.
    async fn flush_remaining_aggregations(&mut self, _summary: &mut RunSummary) -> Result<(), SchedulerError> {
        let node_ids: Vec<NodeId> = self.aggregation_buffers.keys().cloned().collect();
        for node_id in node_ids {
            let Some(node) = self.graph.node(&node_id).cloned() else { continue };
            self.flush_aggregation(&node, FlushReason::SourceExhausted).await?;
        }
        Ok(())
    }

    /// Buffers one arrival at a coalesce barrier, merging once every
    /// expected route label has arrived. A route label the barrier does not
    /// expect, or a second arrival for a label already buffered, is failed
    /// explicitly rather than silently accepted or silently overwriting the
    /// prior arrival (§4.4).
    async fn dispatch_coalesce(&mut self, node: &Node, item: WorkItem) -> Result<(), SchedulerError> {
        let Some(label) = item.arrived_via_label.clone() else {
            return Err(SchedulerError::UnlabeledCoalesceArrival { label: node.label.clone() });
        };
        let expected: BTreeSet<String> =
            self.graph.incoming_edges(&node.node_id).into_iter().filter_map(|edge| edge.route_label.clone()).collect();

        if !expected.contains(&label) {
            let reason = format!("route label {label:?} is not among this coalesce's expected arrivals");
            executors::fail_coalesce_arrival(&self.recorder, node, &item.token_id, &item.row, &reason).await?;
            self.recorder.record_token_outcome(&self.run_id, &item.token_id, RowOutcome::Failed)?;
            return Ok(());
        }

        let key = (node.node_id.clone(), item.coalesce_key.clone());
        let duplicate = self.coalesce_buffers.get(&key).is_some_and(|buffer| buffer.rows.contains_key(&label));
        if duplicate {
            let reason = format!("duplicate or stale arrival for route label {label:?}");
            executors::fail_coalesce_arrival(&self.recorder, node, &item.token_id, &item.row, &reason).await?;
            self.recorder.record_token_outcome(&self.run_id, &item.token_id, RowOutcome::Failed)?;
            return Ok(());
        }

        let buffer = self.coalesce_buffers.entry(key.clone()).or_default();
        buffer.parents.push(item.token_id.clone());
        buffer.rows.insert(label, item.row);

        let ready = buffer.rows.keys().cloned().collect::<BTreeSet<_>>() == expected;
        if !ready {
            return Ok(());
        }
        let buffer = self.coalesce_buffers.remove(&key).unwrap_or_default();
        let ctx = self.ctx_for(&node.label);
        let (output_token_id, merged) =
            executors::execute_coalesce(&self.recorder, &self.plugins, node, &buffer.parents, buffer.rows, &ctx).await?;
        self.continue_rows(node, &output_token_id, &item.coalesce_key, vec![merged])?;
        Ok(())
    }

    /// Writes one token's row to a sink and records its terminal outcome.
    async fn dispatch_sink(&mut self, node: &Node, item: WorkItem, summary: &mut RunSummary) -> Result<(), SchedulerError> {
        let ctx = self.ctx_for(&node.label);
        self.with_timeout(&node.label, executors::execute_sink(&self.recorder, &mut self.plugins, node, &item.token_id, item.row, &ctx)).await?;
        self.recorder.record_token_outcome(&self.run_id, &item.token_id, RowOutcome::Completed)?;
        summary.tokens_completed += 1;
        Ok(())
    }

    /// Continues one or more output rows of a non-branching node along its
    /// single outgoing edge. More than one row expands `token_id` into one
    /// fresh child per row, reusing the same minting primitive aggregation
    /// flush output uses.
    fn continue_rows(&mut self, node: &Node, token_id: &TokenId, coalesce_key: &str, rows: Vec<RowData>) -> Result<(), SchedulerError> {
        if rows.is_empty() {
            return Ok(());
        }
        let Some(edge) = self.graph.outgoing_edges(&node.node_id).iter().find_map(|edge_id| self.graph.edge(edge_id)) else {
            return Err(SchedulerError::DeadEnd { label: node.label.clone() });
        };
        let to_node_id = edge.to_node_id.clone();
        let route_label = edge.route_label.clone();

        if rows.len() == 1 {
            let row = rows.into_iter().next().unwrap_or_default();
            self.checkpoint_continuation(token_id, &to_node_id, &row, route_label.clone(), Some(coalesce_key.to_string()))?;
            return self.push(WorkItem {
                token_id: token_id.clone(),
                coalesce_key: coalesce_key.to_string(),
                node_id: to_node_id,
                row,
                attempt: 0,
                arrived_via_label: route_label,
            });
        }

        let children = self.recorder.expand_token(std::slice::from_ref(token_id), &node.node_id, rows.len())?;
        for (child_token_id, row) in children.into_iter().zip(rows) {
            self.checkpoint_continuation(&child_token_id, &to_node_id, &row, route_label.clone(), Some(coalesce_key.to_string()))?;
            self.push(WorkItem {
                token_id: child_token_id,
                coalesce_key: coalesce_key.to_string(),
                node_id: to_node_id.clone(),
                row,
                attempt: 0,
                arrived_via_label: route_label.clone(),
            })?;
        }
        Ok(())
    }

    /// Runs `future` under the configured per-node timeout, if any.
    async fn with_timeout<T>(&self, label: &str, future: impl std::future::Future<Output = Result<T, SchedulerError>>) -> Result<T, SchedulerError> {
        let Some(budget_ms) = self.config.node_timeout_ms else { return future.await };
        match tokio::time::timeout(Duration::from_millis(budget_ms), future).await {
            Ok(result) => result,
            Err(_elapsed) => Err(SchedulerError::Timeout { label: label.to_string(), budget_ms }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test module; workspace lints exempt #[cfg(test)] code")]
mod tests {
    use elspeth_core::Determinism;
    use elspeth_core::Edge;
    use elspeth_core::Recorder;
    use elspeth_core::RunMode;
    use elspeth_store_sqlite::config::SqliteJournalMode;
    use elspeth_store_sqlite::config::SqliteRecorderConfig;
    use elspeth_store_sqlite::config::SqliteSyncMode;
    use elspeth_store_sqlite::recorder::SqliteRecorder;

    use super::*;
    use crate::plugins::csv_source::CsvSource;
    use crate::plugins::json_sink::JsonSink;
    use crate::plugins::uppercase_transform::UppercaseTransform;

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
        let recorder: SharedRecorder = Arc::new(SqliteRecorder::open(&config).expect("open recorder"));
        (dir, recorder)
    }

    #[tokio::test]
    async fn linear_source_transform_sink_completes_every_row() {
        let (_dir, recorder) = open_recorder();
        let run_id = recorder.begin_run("fingerprint".to_string(), RunMode::Live, None).expect("begin run");

        let source_id = recorder
            .register_node(&run_id, "source", NodeType::Source, "csv", "0.0.0", "hash", Determinism::Deterministic)
            .expect("register source");
        let transform_id = recorder
            .register_node(&run_id, "upper", NodeType::Transform, "uppercase", "0.0.0", "hash", Determinism::Deterministic)
            .expect("register transform");
        let sink_id = recorder
            .register_node(&run_id, "sink", NodeType::Sink, "json", "0.0.0", "hash", Determinism::Deterministic)
            .expect("register sink");
        recorder.register_edge(&run_id, &source_id, &transform_id, None).expect("edge 1");
        recorder.register_edge(&run_id, &transform_id, &sink_id, None).expect("edge 2");

        let graph = Graph::build(
            vec![
                node_of(&run_id, &source_id, "source", NodeType::Source),
                node_of(&run_id, &transform_id, "upper", NodeType::Transform),
                node_of(&run_id, &sink_id, "sink", NodeType::Sink),
            ],
            vec![
                Edge { edge_id: elspeth_core::EdgeId::generate(), run_id: run_id.clone(), from_node_id: source_id.clone(), to_node_id: transform_id.clone(), route_label: None },
                Edge { edge_id: elspeth_core::EdgeId::generate(), run_id: run_id.clone(), from_node_id: transform_id.clone(), to_node_id: sink_id.clone(), route_label: None },
            ],
        )
        .expect("graph");

        let mut plugins = PluginSet::new();
        plugins.register_source("source", Box::new(CsvSource::from_str("a\n1\n2\n").expect("csv")));
        plugins.register_transform("upper", Box::new(UppercaseTransform::new("a")));
        let sink = JsonSink::new("mem://out");
        let buffer = sink.buffer();
        plugins.register_sink("sink", Box::new(sink));

        let mut scheduler = Scheduler::new(graph, recorder, plugins, run_id, SchedulerConfig::default(), BTreeMap::new(), None);
        let summary = scheduler.run(&CancellationToken::new()).await.expect("run succeeds");

        assert_eq!(summary.rows_ingested, 2);
        assert_eq!(summary.tokens_completed, 2);
        let guard = buffer.lock().expect("lock");
        assert_eq!(String::from_utf8_lossy(&guard), "{\"a\":\"1\"}\n{\"a\":\"2\"}\n");
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
}
