// elspeth-config/src/config.rs
// ============================================================================
// Module: Configuration Loading & Validation
// Description: Loads a `PipelineConfig` from TOML, applies `ELSPETH_*`
//              environment overrides, then validates it.
// Purpose: Fail closed on malformed or internally inconsistent
//          configuration before a run ever starts, matching the teacher's
//          `DecisionGateConfig::load`/`validate` split.
// Dependencies: crate::schema, serde, toml
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::schema::EdgeConfig;
use crate::schema::PipelineConfig;

/// Environment variable used to override the config file path.
pub const CONFIG_PATH_ENV_VAR: &str = "ELSPETH_CONFIG";
/// Environment variable prefix for overriding individual pipeline settings
/// (e.g. `ELSPETH_PIPELINE_MODE=replay`).
pub const OVERRIDE_ENV_PREFIX: &str = "ELSPETH_PIPELINE_";
/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "elspeth.toml";
/// Maximum configuration file size, in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;

/// An error raised while loading or validating pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// The config file exceeded [`MAX_CONFIG_FILE_SIZE`] or was not valid
    /// UTF-8.
    #[error("invalid config file: {0}")]
    Malformed(String),
    /// The config file was not valid TOML, or did not match the schema.
    #[error("config parse error: {0}")]
    Parse(String),
    /// The config was syntactically valid but semantically inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl PipelineConfig {
    /// Loads configuration from `path`, or from the path named by
    /// [`CONFIG_PATH_ENV_VAR`], or from [`DEFAULT_CONFIG_NAME`] in the
    /// current directory, applies `ELSPETH_PIPELINE_*` environment
    /// overrides, then validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, exceeds the size
    /// limit, fails to parse, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Malformed("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Malformed("config file must be utf-8".to_string()))?;
        let mut config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(mode) = env::var(format!("{OVERRIDE_ENV_PREFIX}MODE")) {
            self.pipeline.mode = mode;
        }
        if let Ok(source_run_id) = env::var(format!("{OVERRIDE_ENV_PREFIX}SOURCE_RUN_ID")) {
            self.pipeline.source_run_id = Some(source_run_id);
        }
        if let Ok(ceiling) = env::var(format!("{OVERRIDE_ENV_PREFIX}QUEUE_CEILING")) {
            if let Ok(parsed) = ceiling.parse() {
                self.pipeline.queue_ceiling = parsed;
            }
        }
        if let Ok(concurrency) = env::var(format!("{OVERRIDE_ENV_PREFIX}MAX_CONCURRENCY")) {
            if let Ok(parsed) = concurrency.parse() {
                self.pipeline.max_concurrency = parsed;
            }
        }
    }

    /// Validates internal consistency: node/edge references, gate route
    /// labels, and mode/`source_run_id` pairing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.pipeline.mode.as_str() {
            "live" => {
                if self.pipeline.source_run_id.is_some() {
                    return Err(ConfigError::Invalid(
                        "pipeline.source_run_id must not be set when mode is \"live\"".to_string(),
                    ));
                }
            }
            "replay" | "verify" => {
                if self.pipeline.source_run_id.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "pipeline.source_run_id is required when mode is \"{}\"",
                        self.pipeline.mode
                    )));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "pipeline.mode must be one of \"live\", \"replay\", \"verify\", got \"{other}\""
                )));
            }
        }

        if self.pipeline.queue_ceiling == 0 {
            return Err(ConfigError::Invalid("pipeline.queue_ceiling must be greater than zero".to_string()));
        }
        if self.pipeline.max_concurrency == 0 {
            return Err(ConfigError::Invalid("pipeline.max_concurrency must be greater than zero".to_string()));
        }
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("at least one node must be declared".to_string()));
        }

        let labels: BTreeSet<&str> = self.nodes.keys().map(String::as_str).collect();
        for edge in &self.edges {
            if !labels.contains(edge.from.as_str()) {
                return Err(ConfigError::Invalid(format!("edge references unknown node \"{}\"", edge.from)));
            }
            if !labels.contains(edge.to.as_str()) {
                return Err(ConfigError::Invalid(format!("edge references unknown node \"{}\"", edge.to)));
            }
        }

        for (label, node) in &self.nodes {
            if node.node_type == "gate" {
                let outgoing: Vec<&EdgeConfig> = self.edges.iter().filter(|e| e.from == *label).collect();
                if outgoing.len() > 1 && outgoing.iter().any(|e| e.route_label.is_none()) {
                    return Err(ConfigError::Invalid(format!(
                        "gate node \"{label}\" has multiple outgoing edges but at least one has no route_label"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(from_env) = env::var(CONFIG_PATH_ENV_VAR) {
        return Ok(PathBuf::from(from_env));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::PipelineConfig;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn loads_and_validates_a_minimal_pipeline() {
        let file = write_config(
            r#"
            [pipeline]
            name = "demo"

            [nodes.source]
            type = "source"
            plugin = "csv"

            [nodes.sink]
            type = "sink"
            plugin = "json"

            [[edges]]
            from = "source"
            to = "sink"
            "#,
        );
        let config = PipelineConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.pipeline.name, "demo");
        assert_eq!(config.nodes.len(), 2);
    }

    #[test]
    fn rejects_replay_mode_without_source_run_id() {
        let file = write_config(
            r#"
            [pipeline]
            mode = "replay"

            [nodes.source]
            type = "source"
            plugin = "csv"
            "#,
        );
        let err = PipelineConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, super::ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_edge_referencing_unknown_node() {
        let file = write_config(
            r#"
            [nodes.source]
            type = "source"
            plugin = "csv"

            [[edges]]
            from = "source"
            to = "does_not_exist"
            "#,
        );
        let err = PipelineConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, super::ConfigError::Invalid(_)));
    }
}
