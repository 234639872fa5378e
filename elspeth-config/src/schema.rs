// elspeth-config/src/schema.rs
// ============================================================================
// Module: Pipeline Configuration Schema
// Description: Typed representation of a declarative pipeline definition:
//              nodes, edges, plugin config, retry/rate-limit policy, and
//              store paths.
// Purpose: Give `serde`/`toml` one struct tree to deserialize into, kept
//          separate from the loading/validation logic in `config.rs`,
//          matching the teacher's `config.rs`/`schema.rs` split.
// Dependencies: serde
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Top-level pipeline configuration, as loaded from TOML.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Pipeline-wide settings.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Node declarations, keyed by their label.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeConfig>,
    /// Edge declarations.
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
    /// Retry and rate-limit policy, per external service.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    /// Storage backend paths.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Pipeline-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSettings {
    /// Human-readable pipeline name, used in logs and the signed export.
    #[serde(default = "default_pipeline_name")]
    pub name: String,
    /// Execution mode: `"live"`, `"replay"`, or `"verify"`.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// The run being replayed or verified against, required when `mode` is
    /// not `"live"`.
    pub source_run_id: Option<String>,
    /// Maximum number of items the scheduler's work queue may hold at once.
    #[serde(default = "default_queue_ceiling")]
    pub queue_ceiling: u64,
    /// Maximum number of transforms executed concurrently.
    #[serde(default = "default_concurrency")]
    pub max_concurrency: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            mode: default_mode(),
            source_run_id: None,
            queue_ceiling: default_queue_ceiling(),
            max_concurrency: default_concurrency(),
        }
    }
}

fn default_pipeline_name() -> String {
    "unnamed-pipeline".to_string()
}

fn default_mode() -> String {
    "live".to_string()
}

const fn default_queue_ceiling() -> u64 {
    10_000
}

const fn default_concurrency() -> u32 {
    8
}

/// Configuration for one DAG node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Operator kind: `"source"`, `"transform"`, `"gate"`, `"aggregation"`,
    /// `"coalesce"`, or `"sink"`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Name of the plugin implementation bound to this node.
    pub plugin: String,
    /// Whether the plugin is declared deterministic.
    #[serde(default = "default_determinism")]
    pub deterministic: bool,
    /// Plugin-specific configuration, passed through unvalidated by this
    /// crate (the plugin is responsible for validating its own shape).
    #[serde(default)]
    pub config: toml::Value,
}

const fn default_determinism() -> bool {
    true
}

/// Configuration for one edge between two nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EdgeConfig {
    /// Source node label.
    pub from: String,
    /// Destination node label.
    pub to: String,
    /// Route label, required when `from` is a gate with multiple outgoing
    /// edges.
    pub route_label: Option<String>,
}

/// Retry and rate-limit policy for one external service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Maximum calls permitted per rolling one-second window.
    #[serde(default = "default_per_second")]
    pub per_second: u32,
    /// Maximum calls permitted per rolling one-minute window.
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
    /// Maximum number of attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay, in milliseconds, before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound, in milliseconds, on any single computed delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            per_minute: default_per_minute(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

const fn default_per_second() -> u32 {
    10
}

const fn default_per_minute() -> u32 {
    300
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    200
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Path to the SQLite audit recorder database file.
    #[serde(default = "default_recorder_path")]
    pub recorder_path: String,
    /// Root directory of the content-addressable payload store.
    #[serde(default = "default_payload_root")]
    pub payload_root: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { recorder_path: default_recorder_path(), payload_root: default_payload_root() }
    }
}

fn default_recorder_path() -> String {
    "elspeth.sqlite3".to_string()
}

fn default_payload_root() -> String {
    "elspeth-payloads".to_string()
}
