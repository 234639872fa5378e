// elspeth-core/src/dag.rs
// ============================================================================
// Module: DAG Model & Route Resolution
// Description: Validated graph of nodes and edges, plus the resolution maps
//              the scheduler uses to walk it (C4).
// Purpose: Catch every structurally invalid pipeline before a single row is
//          read, and give the scheduler O(1) lookups thereafter.
// Dependencies: crate::{entities, enums, identifiers}
// ============================================================================

//! ## Overview
//! A `Graph` is built once from a flat list of `(Node, Edge)` declarations
//! and validated exhaustively: acyclicity, unique node labels, unique
//! outgoing route labels on gates, at least one source and one sink, and
//! reachability of every sink from some source. Validation failure is
//! reported as a single `GraphError` before the scheduler starts; a `Graph`
//! that exists has already passed every check.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;

use thiserror::Error;

use crate::entities::Edge;
use crate::entities::Node;
use crate::enums::NodeType;
use crate::identifiers::EdgeId;
use crate::identifiers::NodeId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while validating a pipeline's graph structure.
///
/// These are `ConfigError`s in the spec's error taxonomy: always fatal
/// before the run starts, never surfaced mid-run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two nodes share the same label.
    #[error("duplicate node label: {label}")]
    DuplicateNodeLabel {
        /// The label that appeared more than once.
        label: String,
    },
    /// A gate has two outgoing edges with the same route label.
    #[error("duplicate route label {label:?} on gate {gate_label}")]
    DuplicateRouteLabel {
        /// The gate node's label.
        gate_label: String,
        /// The repeated route label.
        label: String,
    },
    /// The graph contains no source node.
    #[error("graph has no source node")]
    NoSource,
    /// The graph contains no sink node.
    #[error("graph has no sink node")]
    NoSink,
    /// The graph contains a cycle.
    #[error("graph contains a cycle reachable from node {label}")]
    Cycle {
        /// A node label on the detected cycle.
        label: String,
    },
    /// A sink node is not reachable from any source.
    #[error("node {label} is not reachable from any source")]
    Unreachable {
        /// The unreachable node's label.
        label: String,
    },
    /// An edge references a node id that was not declared.
    #[error("edge references unknown node id {node_id}")]
    UnknownNode {
        /// The dangling node id.
        node_id: NodeId,
    },
}

// ============================================================================
// SECTION: Graph
// ============================================================================

/// A validated DAG of nodes and edges for one run.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    by_label: BTreeMap<String, NodeId>,
    outgoing: BTreeMap<NodeId, Vec<EdgeId>>,
}

impl Graph {
    /// Validates and builds a graph from its declared nodes and edges.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] for any structural violation: duplicate
    /// labels, duplicate gate route labels, missing source/sink, cycles, or
    /// unreachable nodes.
    pub fn build(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, GraphError> {
        let mut by_label = BTreeMap::new();
        let mut node_map = BTreeMap::new();
        for node in nodes {
            if by_label.insert(node.label.clone(), node.node_id.clone()).is_some() {
                return Err(GraphError::DuplicateNodeLabel { label: node.label });
            }
            node_map.insert(node.node_id.clone(), node);
        }

        let mut outgoing: BTreeMap<NodeId, Vec<EdgeId>> = BTreeMap::new();
        let mut edge_map = BTreeMap::new();
        for edge in edges {
            if !node_map.contains_key(&edge.from_node_id) {
                return Err(GraphError::UnknownNode { node_id: edge.from_node_id });
            }
            if !node_map.contains_key(&edge.to_node_id) {
                return Err(GraphError::UnknownNode { node_id: edge.to_node_id });
            }
            outgoing.entry(edge.from_node_id.clone()).or_default().push(edge.edge_id.clone());
            edge_map.insert(edge.edge_id.clone(), edge);
        }

        let graph = Self { nodes: node_map, edges: edge_map, by_label, outgoing };
        graph.validate_route_labels()?;
        graph.validate_has_source_and_sink()?;
        graph.validate_acyclic()?;
        graph.validate_reachability()?;
        Ok(graph)
    }

    /// Returns a node by its label.
    #[must_use]
    pub fn node_by_label(&self, label: &str) -> Option<&Node> {
        self.by_label.get(label).and_then(|id| self.nodes.get(id))
    }

    /// Returns a node by its identifier.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Returns an edge by its identifier.
    #[must_use]
    pub fn edge(&self, edge_id: &EdgeId) -> Option<&Edge> {
        self.edges.get(edge_id)
    }

    /// Returns the outgoing edges of a node.
    #[must_use]
    pub fn outgoing_edges(&self, node_id: &NodeId) -> &[EdgeId] {
        self.outgoing.get(node_id).map_or(&[], Vec::as_slice)
    }

    /// Returns every edge whose `to_node_id` is `node_id`, in no particular
    /// order. Used by coalesce barriers to discover which route labels
    /// they must receive an arrival on before merging.
    #[must_use]
    pub fn incoming_edges(&self, node_id: &NodeId) -> Vec<&Edge> {
        self.edges.values().filter(|edge| edge.to_node_id == *node_id).collect()
    }

    /// Resolves the outgoing edge of a gate that carries the given route
    /// label.
    #[must_use]
    pub fn edge_by_route_label(&self, gate_id: &NodeId, label: &str) -> Option<&Edge> {
        self.outgoing_edges(gate_id)
            .iter()
            .filter_map(|edge_id| self.edges.get(edge_id))
            .find(|edge| edge.route_label.as_deref() == Some(label))
    }

    /// Returns all nodes of a given kind.
    #[must_use]
    pub fn nodes_of_type(&self, node_type: NodeType) -> Vec<&Node> {
        self.nodes.values().filter(|node| node.node_type == node_type).collect()
    }

    fn validate_route_labels(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            if node.node_type != NodeType::Gate {
                continue;
            }
            let mut seen = BTreeSet::new();
            for edge_id in self.outgoing_edges(&node.node_id) {
                let Some(edge) = self.edges.get(edge_id) else { continue };
                if let Some(label) = &edge.route_label
                    && !seen.insert(label.clone())
                {
                    return Err(GraphError::DuplicateRouteLabel {
                        gate_label: node.label.clone(),
                        label: label.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_has_source_and_sink(&self) -> Result<(), GraphError> {
        if !self.nodes.values().any(|n| n.node_type == NodeType::Source) {
            return Err(GraphError::NoSource);
        }
        if !self.nodes.values().any(|n| n.node_type == NodeType::Sink) {
            return Err(GraphError::NoSink);
        }
        Ok(())
    }

    fn validate_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: BTreeMap<NodeId, Mark> = BTreeMap::new();

        for start in self.nodes.keys() {
            if marks.contains_key(start) {
                continue;
            }
            let mut stack = vec![(start.clone(), self.outgoing_edges(start).to_vec(), 0usize)];
            marks.insert(start.clone(), Mark::Visiting);

            while let Some((node_id, out_edges, index)) = stack.pop() {
                if index >= out_edges.len() {
                    marks.insert(node_id, Mark::Done);
                    continue;
                }
                let edge_id = out_edges[index].clone();
                stack.push((node_id.clone(), out_edges, index + 1));
                let Some(edge) = self.edges.get(&edge_id) else { continue };
                match marks.get(&edge.to_node_id) {
                    Some(Mark::Visiting) => {
                        let label = self
                            .nodes
                            .get(&edge.to_node_id)
                            .map_or_else(|| edge.to_node_id.to_string(), |n| n.label.clone());
                        return Err(GraphError::Cycle { label });
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(edge.to_node_id.clone(), Mark::Visiting);
                        stack.push((
                            edge.to_node_id.clone(),
                            self.outgoing_edges(&edge.to_node_id).to_vec(),
                            0,
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_reachability(&self) -> Result<(), GraphError> {
        let sources: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.node_type == NodeType::Source)
            .map(|n| n.node_id.clone())
            .collect();

        let mut reachable: BTreeSet<NodeId> = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = sources.into_iter().collect();
        for id in &queue {
            reachable.insert(id.clone());
        }
        while let Some(node_id) = queue.pop_front() {
            for edge_id in self.outgoing_edges(&node_id) {
                let Some(edge) = self.edges.get(edge_id) else { continue };
                if reachable.insert(edge.to_node_id.clone()) {
                    queue.push_back(edge.to_node_id.clone());
                }
            }
        }

        for node in self.nodes.values() {
            if !reachable.contains(&node.node_id) {
                return Err(GraphError::Unreachable { label: node.label.clone() });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::Determinism;
    use crate::identifiers::RunId;

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

    fn edge(run_id: &RunId, from: &Node, to: &Node, route_label: Option<&str>) -> Edge {
        Edge {
            edge_id: EdgeId::generate(),
            run_id: run_id.clone(),
            from_node_id: from.node_id.clone(),
            to_node_id: to.node_id.clone(),
            route_label: route_label.map(str::to_string),
        }
    }

    #[test]
    fn linear_pipeline_is_valid() {
        let run_id = RunId::generate();
        let source = node(&run_id, "source", NodeType::Source);
        let sink = node(&run_id, "sink", NodeType::Sink);
        let e = edge(&run_id, &source, &sink, None);
        let graph = Graph::build(vec![source, sink], vec![e]).expect("valid graph");
        assert!(graph.node_by_label("source").is_some());
    }

    #[test]
    fn rejects_cycle() {
        let run_id = RunId::generate();
        let a = node(&run_id, "a", NodeType::Source);
        let b = node(&run_id, "b", NodeType::Sink);
        let e1 = edge(&run_id, &a, &b, None);
        let e2 = edge(&run_id, &b, &a, None);
        let err = Graph::build(vec![a, b], vec![e1, e2]).expect_err("cycle must be rejected");
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn rejects_duplicate_route_label() {
        let run_id = RunId::generate();
        let gate = node(&run_id, "gate", NodeType::Gate);
        let high = node(&run_id, "high", NodeType::Sink);
        let low = node(&run_id, "low", NodeType::Sink);
        let e1 = edge(&run_id, &gate, &high, Some("route"));
        let e2 = edge(&run_id, &gate, &low, Some("route"));
        let source = node(&run_id, "source", NodeType::Source);
        let e0 = edge(&run_id, &source, &gate, None);
        let err = Graph::build(vec![source, gate, high, low], vec![e0, e1, e2])
            .expect_err("duplicate route label must be rejected");
        assert!(matches!(err, GraphError::DuplicateRouteLabel { .. }));
    }

    #[test]
    fn rejects_unreachable_sink() {
        let run_id = RunId::generate();
        let source = node(&run_id, "source", NodeType::Source);
        let reachable_sink = node(&run_id, "reachable", NodeType::Sink);
        let orphan_sink = node(&run_id, "orphan", NodeType::Sink);
        let e = edge(&run_id, &source, &reachable_sink, None);
        let err = Graph::build(vec![source, reachable_sink, orphan_sink], vec![e])
            .expect_err("unreachable sink must be rejected");
        assert!(matches!(err, GraphError::Unreachable { .. }));
    }
}
