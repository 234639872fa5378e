// elspeth-cli/src/error.rs
// ============================================================================
// Module: CLI Error
// Description: Single error type every subcommand returns, wrapping each
//              lower crate's own error type.
// Purpose: Let `main` map any failure to a non-zero exit code and one
//          structured line, never a panic.
// Dependencies: thiserror, elspeth-config, elspeth-core, elspeth-payload,
//               elspeth-runtime, elspeth-store-sqlite
// ============================================================================

use elspeth_config::ConfigError;
use elspeth_core::GraphError;
use elspeth_core::StoreError;
use elspeth_core::hashing::HashError;
use elspeth_payload::PayloadError;
use elspeth_runtime::CheckpointError;
use elspeth_runtime::RetentionError;
use elspeth_runtime::SchedulerError;
use elspeth_store_sqlite::error::SqliteError;
use elspeth_store_sqlite::export::ExportError;
use thiserror::Error;

/// Every way a subcommand can fail.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The configured pipeline failed DAG validation.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The `SQLite` recorder backend failed to open or query.
    #[error(transparent)]
    Sqlite(#[from] SqliteError),
    /// The audit recorder reported a failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The payload store failed to open or read a blob.
    #[error(transparent)]
    Payload(#[from] PayloadError),
    /// A value could not be canonically hashed.
    #[error(transparent)]
    Hashing(#[from] HashError),
    /// The scheduler failed to run the pipeline to completion.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// Checkpoint resume planning failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    /// A retention sweep failed.
    #[error(transparent)]
    Retention(#[from] RetentionError),
    /// A signed export could not be produced or failed verification.
    #[error(transparent)]
    Export(#[from] ExportError),
    /// A node declared a plugin name this build does not know how to
    /// construct.
    #[error("node {label:?} declares unknown plugin {plugin:?} for a {node_type} node")]
    UnknownPlugin {
        /// The node's label.
        label: String,
        /// The declared plugin name.
        plugin: String,
        /// The node's declared kind.
        node_type: String,
    },
    /// A plugin's `config` table was missing a required key or held a
    /// value of the wrong shape.
    #[error("node {label:?} plugin config is invalid: {message}")]
    InvalidPluginConfig {
        /// The node's label.
        label: String,
        /// What was wrong.
        message: String,
    },
    /// Reading a fixture file a source/sink plugin depends on failed.
    #[error("failed to read {path}: {source}")]
    FixtureIo {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The requested run has no recorded checkpoints to resume from.
    #[error("run {run_id} has no checkpoints; nothing to resume")]
    NothingToResume {
        /// The run id that was asked to resume.
        run_id: String,
    },
    /// A value passed on the command line could not be parsed.
    #[error("invalid value for --{flag}: {message}")]
    InvalidArgument {
        /// The flag the value was passed to.
        flag: String,
        /// Why the value was rejected.
        message: String,
    },
}
