// elspeth-cli/src/loader.rs
// ============================================================================
// Module: Pipeline Loader
// Description: Turns a parsed `PipelineConfig` into a validated `Graph` and
//              a resolved `PluginSet`, either offline (for `validate`) or
//              against a live recorder (for `run`).
// Purpose: Keep "which concrete plugin backs this node label" a loader
//          decision made once per run, never a runtime branch the
//          scheduler itself takes.
// Dependencies: elspeth-config, elspeth-core, elspeth-runtime
// ============================================================================

use std::collections::BTreeMap;
use std::fs;

use elspeth_config::NodeConfig;
use elspeth_config::PipelineConfig;
use elspeth_core::Edge;
use elspeth_core::Graph;
use elspeth_core::Node;
use elspeth_core::RunId;
use elspeth_core::enums::Determinism;
use elspeth_core::enums::NodeType;
use elspeth_core::hashing;
use elspeth_core::identifiers::EdgeId;
use elspeth_core::identifiers::NodeId;
use elspeth_core::recorder::SharedRecorder;
use elspeth_retry::backoff::BackoffPolicy;
use elspeth_retry::rate_limit::RateLimitConfig;
use elspeth_retry::rate_limit::RateLimiter;
use elspeth_runtime::plugins::PluginSet;
use elspeth_runtime::plugins::count_aggregation::CountAggregation;
use elspeth_runtime::plugins::csv_source::CsvSource;
use elspeth_runtime::plugins::field_gate::FieldRouteGate;
use elspeth_runtime::plugins::http_transform::HttpTransform;
use elspeth_runtime::plugins::json_sink::JsonSink;
use elspeth_runtime::plugins::json_source::JsonSource;
use elspeth_runtime::plugins::log_sink::LogSink;
use elspeth_runtime::plugins::merge_coalesce::MergeCoalesce;
use elspeth_runtime::plugins::uppercase_transform::UppercaseTransform;

use crate::error::CliError;

/// The pieces a scheduler run needs, resolved once from configuration.
pub struct LoadedGraph {
    /// The validated DAG.
    pub graph: Graph,
    /// One resolved plugin instance per node label.
    pub plugins: PluginSet,
    /// Each node's plugin configuration, as the JSON value `PluginContext`
    /// carries.
    pub node_configs: BTreeMap<String, serde_json::Value>,
}

/// Builds a `Graph` from `config` with locally generated identifiers, for
/// structural validation that does not touch a recorder.
///
/// # Errors
///
/// Returns [`CliError::Graph`] on any structural violation, or
/// [`CliError::Hashing`] if a node's configuration cannot be canonically
/// hashed.
pub fn build_graph_offline(config: &PipelineConfig) -> Result<Graph, CliError> {
    let run_id = RunId::generate();
    declare_graph(config, &run_id, |_label, _node_type, _node_config, _config_hash| Ok(NodeId::generate()))
}

/// Builds a `Graph` from `config` whose nodes and edges are registered
/// against `recorder` under `run_id`, so the identifiers the scheduler
/// walks are the same ones the audit trail records.
///
/// # Errors
///
/// Returns [`CliError::Store`] if registration fails, [`CliError::Graph`]
/// on a structural violation, or [`CliError::Hashing`] if a node's
/// configuration cannot be canonically hashed.
pub fn build_graph_for_run(
    config: &PipelineConfig,
    recorder: &SharedRecorder,
    run_id: &RunId,
) -> Result<Graph, CliError> {
    declare_graph(config, run_id, |label, node_type, node_config, config_hash| {
        let determinism = if node_config.deterministic { Determinism::Deterministic } else { Determinism::Nondeterministic };
        recorder
            .register_node(run_id, label, node_type, &node_config.plugin, env!("CARGO_PKG_VERSION"), config_hash, determinism)
            .map_err(CliError::from)
    })
}

/// Rebuilds the `Graph` a prior run was executed against, from its
/// already-registered nodes and edges, so a resumed scheduler walks the
/// exact same node/edge identifiers its checkpoints reference.
///
/// # Errors
///
/// Returns [`CliError::Store`] if the nodes/edges cannot be read back, or
/// [`CliError::Graph`] if the persisted graph fails structural validation.
pub fn build_graph_for_resume(recorder: &elspeth_store_sqlite::recorder::SqliteRecorder, run_id: &RunId) -> Result<Graph, CliError> {
    let nodes = recorder.nodes_for_run(run_id)?;
    let edges = recorder.edges_for_run(run_id)?;
    Graph::build(nodes, edges).map_err(CliError::from)
}

/// Shared node/edge declaration walk. `mint_node_id` resolves each
/// config-declared node to a `NodeId`, either generated locally (offline
/// validation) or issued by the recorder (a real run).
fn declare_graph(
    config: &PipelineConfig,
    run_id: &RunId,
    mut mint_node_id: impl FnMut(&str, NodeType, &NodeConfig, &str) -> Result<NodeId, CliError>,
) -> Result<Graph, CliError> {
    let mut label_ids: BTreeMap<String, NodeId> = BTreeMap::new();
    let mut nodes = Vec::with_capacity(config.nodes.len());
    for (label, node_config) in &config.nodes {
        let node_type = parse_node_type(label, &node_config.node_type)?;
        let config_hash = hashing::stable_hash(&node_config.config)?;
        let node_id = mint_node_id(label, node_type, node_config, &config_hash)?;
        label_ids.insert(label.clone(), node_id.clone());
        let determinism = if node_config.deterministic { Determinism::Deterministic } else { Determinism::Nondeterministic };
        nodes.push(Node {
            node_id,
            run_id: run_id.clone(),
            label: label.clone(),
            node_type,
            plugin_name: node_config.plugin.clone(),
            plugin_version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
            determinism,
        });
    }

    let mut edges = Vec::with_capacity(config.edges.len());
    for edge_config in &config.edges {
        let from_node_id = label_ids.get(edge_config.from.as_str()).cloned().ok_or_else(|| {
            CliError::InvalidPluginConfig {
                label: edge_config.from.clone(),
                message: "edge references a node not declared in [nodes]".to_string(),
            }
        })?;
        let to_node_id = label_ids.get(edge_config.to.as_str()).cloned().ok_or_else(|| {
            CliError::InvalidPluginConfig {
                label: edge_config.to.clone(),
                message: "edge references a node not declared in [nodes]".to_string(),
            }
        })?;
        edges.push(Edge {
            edge_id: EdgeId::generate(),
            run_id: run_id.clone(),
            from_node_id,
            to_node_id,
            route_label: edge_config.route_label.clone(),
        });
    }

    Graph::build(nodes, edges).map_err(CliError::from)
}

/// Resolves every node's plugin instance and JSON-encoded configuration.
///
/// # Errors
///
/// Returns [`CliError::UnknownPlugin`] if a node names a plugin this build
/// does not implement, [`CliError::InvalidPluginConfig`] if a plugin's
/// config table is missing a required key, or [`CliError::FixtureIo`] if a
/// source/sink plugin's backing file cannot be read.
pub fn build_plugins(config: &PipelineConfig) -> Result<(PluginSet, BTreeMap<String, serde_json::Value>), CliError> {
    let mut plugins = PluginSet::new();
    let mut node_configs = BTreeMap::new();

    for (label, node_config) in &config.nodes {
        let node_type = parse_node_type(label, &node_config.node_type)?;
        let json_config = toml_to_json(label, &node_config.config)?;
        node_configs.insert(label.clone(), json_config);

        match (node_type, node_config.plugin.as_str()) {
            (NodeType::Source, "csv") => {
                let contents = read_fixture(label, node_config)?;
                plugins.register_source(label, Box::new(CsvSource::from_str(&contents).map_err(|err| {
                    CliError::InvalidPluginConfig { label: label.clone(), message: err.to_string() }
                })?));
            }
            (NodeType::Source, "json") => {
                let contents = read_fixture(label, node_config)?;
                plugins.register_source(label, Box::new(JsonSource::from_str(&contents)));
            }
            (NodeType::Transform, "uppercase") => {
                let field = string_field(label, node_config, "field")?;
                plugins.register_transform(label, Box::new(UppercaseTransform::new(field)));
            }
            (NodeType::Transform, "http") => {
                let endpoint = string_field(label, node_config, "endpoint")?;
                let response_field = string_field(label, node_config, "response_field")?;
                let service = node_config
                    .config
                    .get("service")
                    .and_then(toml::Value::as_str)
                    .and_then(|name| config.services.get(name))
                    .cloned()
                    .unwrap_or_default();
                let rate_limiter = RateLimiter::new(RateLimitConfig {
                    per_second: service.per_second,
                    per_minute: service.per_minute,
                });
                let backoff = BackoffPolicy {
                    base_delay: std::time::Duration::from_millis(service.base_delay_ms),
                    max_delay: std::time::Duration::from_millis(service.max_delay_ms),
                    max_attempts: service.max_attempts,
                };
                plugins.register_transform(label, Box::new(HttpTransform::new(endpoint, response_field, rate_limiter, backoff)));
            }
            (NodeType::Gate, "field_route") => {
                let field = string_field(label, node_config, "field")?;
                let default_label = node_config.config.get("default_label").and_then(toml::Value::as_str).map(str::to_string);
                plugins.register_gate(label, Box::new(FieldRouteGate::new(field, default_label)));
            }
            (NodeType::Aggregation, "count") => {
                let threshold = node_config
                    .config
                    .get("threshold")
                    .and_then(toml::Value::as_integer)
                    .ok_or_else(|| CliError::InvalidPluginConfig { label: label.clone(), message: "missing integer key \"threshold\"".to_string() })?;
                let sum_field = string_field(label, node_config, "sum_field")?;
                let threshold = usize::try_from(threshold).unwrap_or(usize::MAX);
                plugins.register_aggregation(label, Box::new(CountAggregation::new(threshold, sum_field)));
            }
            (NodeType::Coalesce, "merge") => {
                plugins.register_coalesce(label, Box::new(MergeCoalesce::new()));
            }
            (NodeType::Sink, "json") => {
                let uri = string_field(label, node_config, "uri")?;
                plugins.register_sink(label, Box::new(JsonSink::new(uri)));
            }
            (NodeType::Sink, "log") => {
                plugins.register_sink(label, Box::new(LogSink));
            }
            (node_type, plugin) => {
                return Err(CliError::UnknownPlugin {
                    label: label.clone(),
                    plugin: plugin.to_string(),
                    node_type: format!("{node_type:?}"),
                });
            }
        }
    }

    Ok((plugins, node_configs))
}

/// Parses a config's `type` string into a `NodeType`.
fn parse_node_type(label: &str, raw: &str) -> Result<NodeType, CliError> {
    match raw {
        "source" => Ok(NodeType::Source),
        "transform" => Ok(NodeType::Transform),
        "gate" => Ok(NodeType::Gate),
        "aggregation" => Ok(NodeType::Aggregation),
        "coalesce" => Ok(NodeType::Coalesce),
        "sink" => Ok(NodeType::Sink),
        other => Err(CliError::InvalidPluginConfig {
            label: label.to_string(),
            message: format!("unknown node type {other:?}"),
        }),
    }
}

/// Reads a required string key out of a node's plugin config table.
fn string_field(label: &str, node_config: &NodeConfig, key: &str) -> Result<String, CliError> {
    node_config
        .config
        .get(key)
        .and_then(toml::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CliError::InvalidPluginConfig { label: label.to_string(), message: format!("missing string key {key:?}") })
}

/// Reads the `path` key from a source/sink's plugin config and loads the
/// fixture file it names.
fn read_fixture(label: &str, node_config: &NodeConfig) -> Result<String, CliError> {
    let path = string_field(label, node_config, "path")?;
    fs::read_to_string(&path).map_err(|source| CliError::FixtureIo { path, source })
}

/// Converts a node's `toml::Value` config into the `serde_json::Value`
/// shape `PluginContext.config` carries.
fn toml_to_json(label: &str, value: &toml::Value) -> Result<serde_json::Value, CliError> {
    serde_json::to_value(value)
        .map_err(|err| CliError::InvalidPluginConfig { label: label.to_string(), message: err.to_string() })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn fixture(source_path: &str) -> PipelineConfig {
        let raw = format!(
            r#"
            [pipeline]
            name = "test-pipeline"

            [nodes.source]
            type = "source"
            plugin = "csv"
            config = {{ path = "{source_path}" }}

            [nodes.sink]
            type = "sink"
            plugin = "log"

            [[edges]]
            from = "source"
            to = "sink"
            "#
        );
        toml::from_str(&raw).expect("fixture config parses")
    }

    #[test]
    fn builds_an_offline_graph_with_two_nodes_and_one_edge() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "name\nada").expect("write fixture");
        let config = fixture(file.path().to_str().expect("utf8 path"));

        let graph = build_graph_offline(&config).expect("graph builds");
        assert!(graph.node_by_label("source").is_some());
        assert!(graph.node_by_label("sink").is_some());
    }

    #[test]
    fn resolves_csv_source_and_log_sink_plugins() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "name\nada").expect("write fixture");
        let config = fixture(file.path().to_str().expect("utf8 path"));

        let (mut plugins, node_configs) = build_plugins(&config).expect("plugins resolve");
        assert!(plugins.source_mut("source").is_ok());
        assert!(plugins.sink_mut("sink").is_ok());
        assert_eq!(node_configs.len(), 2);
    }

    #[test]
    fn rejects_an_unknown_plugin_name() {
        let raw = r#"
            [pipeline]
            name = "test-pipeline"

            [nodes.source]
            type = "source"
            plugin = "nonexistent"

            [nodes.sink]
            type = "sink"
            plugin = "log"

            [[edges]]
            from = "source"
            to = "sink"
            "#;
        let config: PipelineConfig = toml::from_str(raw).expect("fixture config parses");
        let err = build_plugins(&config).expect_err("unknown plugin rejected");
        assert!(matches!(err, CliError::UnknownPlugin { .. }));
    }
}
