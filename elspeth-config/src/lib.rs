// elspeth-config/src/lib.rs
// ============================================================================
// Crate: elspeth-config
// Description: Declarative pipeline configuration loading and validation.
// Purpose: Turn a TOML file plus environment overrides into a validated
//          `PipelineConfig`, failing closed on anything inconsistent before
//          a run starts.
// Dependencies: crate::{config, schema}
// ============================================================================

//! ## Overview
//! Configuration is split the way the teacher splits it: `schema` holds the
//! plain, derive-only struct tree `serde`/`toml` deserialize into; `config`
//! holds the loading, environment-override, and validation logic that
//! operates on it.

pub mod config;
pub mod schema;

pub use config::CONFIG_PATH_ENV_VAR;
pub use config::ConfigError;
pub use config::MAX_CONFIG_FILE_SIZE;
pub use config::OVERRIDE_ENV_PREFIX;
pub use schema::EdgeConfig;
pub use schema::NodeConfig;
pub use schema::PipelineConfig;
pub use schema::PipelineSettings;
pub use schema::ServiceConfig;
pub use schema::StoreConfig;
