// elspeth-cli/src/commands.rs
// ============================================================================
// Module: Subcommand Implementations
// Description: One function per CLI subcommand: run, validate, resume,
//              purge, explain, health.
// Purpose: Keep `main` a thin arg-parsing/dispatch layer; every subcommand
//          here returns `Result<ExitOutcome, CliError>` so `main` maps
//          failure to a single structured line and a non-zero exit code.
// Dependencies: elspeth-config, elspeth-core, elspeth-payload,
//               elspeth-runtime, elspeth-store-sqlite
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use elspeth_config::PipelineConfig;
use elspeth_core::Recorder;
use elspeth_core::RowId;
use elspeth_core::RunId;
use elspeth_core::RunMode;
use elspeth_core::recorder::SharedRecorder;
use elspeth_core::time::Timestamp;
use elspeth_payload::PayloadStore;
use elspeth_runtime::CancellationToken;
use elspeth_runtime::Checkpointer;
use elspeth_runtime::RetentionSweeper;
use elspeth_runtime::Scheduler;
use elspeth_runtime::SchedulerConfig;
use elspeth_store_sqlite::SqliteRecorder;
use elspeth_store_sqlite::config::SqliteRecorderConfig;
use elspeth_store_sqlite::export;

use crate::error::CliError;
use crate::loader;

/// What a subcommand did, for `main` to translate into an exit code and a
/// one-line report on stdout.
pub enum ExitOutcome {
    /// The operation succeeded; the message is a short human summary.
    Success(String),
    /// The operation completed but the result itself signals failure (e.g.
    /// a divergent signed export), without the subcommand itself erroring.
    Failure(String),
}

/// Opens the `SQLite` recorder and payload store named by `config.store`.
fn open_backend(config: &PipelineConfig) -> Result<(Arc<SqliteRecorder>, PayloadStore), CliError> {
    let payload_root = PathBuf::from(&config.store.payload_root);
    let payload_store = PayloadStore::open(&payload_root)?;
    let recorder_config = SqliteRecorderConfig {
        path: PathBuf::from(&config.store.recorder_path),
        busy_timeout_ms: 5_000,
        journal_mode: elspeth_store_sqlite::config::SqliteJournalMode::Wal,
        sync_mode: elspeth_store_sqlite::config::SqliteSyncMode::Full,
        read_pool_size: 4,
        payload_root: Some(payload_root),
    };
    let recorder = Arc::new(SqliteRecorder::open(&recorder_config)?);
    Ok((recorder, payload_store))
}

/// Parses `pipeline.mode`/`pipeline.source_run_id` into a `RunMode` and an
/// optional replay/verify source run.
fn resolve_mode(config: &PipelineConfig) -> Result<(RunMode, Option<RunId>), CliError> {
    let mode = match config.pipeline.mode.as_str() {
        "live" => RunMode::Live,
        "replay" => RunMode::Replay,
        "verify" => RunMode::Verify,
        other => {
            return Err(CliError::InvalidArgument {
                flag: "config".to_string(),
                message: format!("pipeline.mode has unexpected value {other:?} past validation"),
            });
        }
    };
    let source_run_id = config.pipeline.source_run_id.clone().map(RunId::from_raw);
    Ok((mode, source_run_id))
}

/// Executes the `run` subcommand: loads configuration, validates the
/// graph, and (if `execute` is true) drives the pipeline to completion.
///
/// # Errors
///
/// Returns [`CliError`] if configuration fails to load, the graph fails
/// validation, a plugin cannot be resolved, or the scheduler fails the run.
pub async fn run(config_path: Option<&Path>, execute: bool) -> Result<ExitOutcome, CliError> {
    let config = PipelineConfig::load(config_path)?;
    loader::build_graph_offline(&config)?;

    if !execute {
        return Ok(ExitOutcome::Success("configuration and graph are valid".to_string()));
    }

    let (recorder, payload_store) = open_backend(&config)?;
    let shared: SharedRecorder = Arc::clone(&recorder) as SharedRecorder;
    let (mode, source_run_id) = resolve_mode(&config)?;
    let config_fingerprint = elspeth_core::hashing::stable_hash(&config.nodes)?;
    let run_id = shared.begin_run(config_fingerprint, mode, source_run_id)?;

    let graph = loader::build_graph_for_run(&config, &shared, &run_id)?;
    let (plugins, node_configs) = loader::build_plugins(&config)?;

    let scheduler_config = SchedulerConfig {
        max_queue_len: usize::try_from(config.pipeline.queue_ceiling).unwrap_or(usize::MAX),
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(graph, shared, plugins, run_id.clone(), scheduler_config, node_configs, Some(payload_store));
    let cancellation = CancellationToken::new();
    let summary = scheduler.run(&cancellation).await?;

    if summary.cancelled {
        return Ok(ExitOutcome::Failure(format!("run {run_id} was cancelled before completion")));
    }
    Ok(ExitOutcome::Success(format!(
        "run {run_id} completed: {} ingested, {} completed, {} quarantined",
        summary.rows_ingested, summary.tokens_completed, summary.tokens_quarantined
    )))
}

/// Executes the `validate` subcommand: loads configuration and checks the
/// graph's structure, without opening a recorder or executing anything.
///
/// # Errors
///
/// Returns [`CliError`] if configuration fails to load or the graph fails
/// validation.
pub fn validate(config_path: Option<&Path>) -> Result<ExitOutcome, CliError> {
    let config = PipelineConfig::load(config_path)?;
    let _graph = loader::build_graph_offline(&config)?;
    loader::build_plugins(&config)?;
    Ok(ExitOutcome::Success(format!(
        "pipeline {:?} is valid: {} nodes, {} edges",
        config.pipeline.name,
        config.nodes.len(),
        config.edges.len()
    )))
}

/// Executes the `resume` subcommand: reopens a failed run, rebuilds the
/// graph it was executed against, and re-enqueues every token still
/// pending at the boundary its last checkpoint recorded, driving the
/// pipeline on to completion.
///
/// A token already consumed into an aggregation batch that was never
/// flushed before the crash is not re-enqueued here: its outcome was
/// already recorded as `ConsumedInBatch`, a terminal state, so it is
/// correctly excluded from replay by [`Checkpointer::plan_resume`] even
/// though the batch holding it never produced output. Recovering that case
/// would require persisting the open batch's in-memory membership, not
/// just each member's own checkpoint, which is out of scope here.
///
/// # Errors
///
/// Returns [`CliError`] if configuration fails to load, `run_id` is not in
/// a failed state, the persisted graph fails validation, or the resumed
/// scheduler fails the run.
pub async fn resume(config_path: Option<&Path>, run_id: &str) -> Result<ExitOutcome, CliError> {
    let config = PipelineConfig::load(config_path)?;
    let (recorder, payload_store) = open_backend(&config)?;
    let shared: SharedRecorder = Arc::clone(&recorder) as SharedRecorder;
    let run_id = RunId::from_raw(run_id.to_string());

    let checkpointer = Checkpointer::new(Arc::clone(&shared));
    checkpointer.begin_resume(&run_id)?;

    let graph = loader::build_graph_for_resume(&recorder, &run_id)?;
    let plan = checkpointer.plan_resume(&run_id, &graph)?;
    if plan.is_empty() {
        return Err(CliError::NothingToResume { run_id: run_id.to_string() });
    }

    let (plugins, node_configs) = loader::build_plugins(&config)?;
    let scheduler_config = SchedulerConfig {
        max_queue_len: usize::try_from(config.pipeline.queue_ceiling).unwrap_or(usize::MAX),
        ..SchedulerConfig::default()
    };
    let mut scheduler =
        Scheduler::resume_from_plan(graph, shared, plugins, run_id.clone(), scheduler_config, node_configs, Some(payload_store), &plan)?;
    let cancellation = CancellationToken::new();
    let summary = scheduler.run_resumed(&cancellation).await?;

    if summary.cancelled {
        return Ok(ExitOutcome::Failure(format!("run {run_id} was cancelled before completion")));
    }
    Ok(ExitOutcome::Success(format!(
        "run {run_id} resumed and completed: {} completed, {} quarantined",
        summary.tokens_completed, summary.tokens_quarantined
    )))
}

/// Executes the `purge` subcommand: removes payloads older than `as_of`
/// for completed runs and reports counts.
///
/// # Errors
///
/// Returns [`CliError`] if configuration fails to load or the purge sweep
/// fails.
pub fn purge(config_path: Option<&Path>, as_of: Timestamp) -> Result<ExitOutcome, CliError> {
    let config = PipelineConfig::load(config_path)?;
    let (recorder, _payload_store) = open_backend(&config)?;
    let shared: SharedRecorder = Arc::clone(&recorder) as SharedRecorder;
    let sweeper = RetentionSweeper::new(shared);
    let report = sweeper.purge(as_of)?;
    Ok(ExitOutcome::Success(format!(
        "purged {} payload(s) and {} checkpoint(s) across {} run(s)",
        report.payloads_deleted,
        report.checkpoints_deleted,
        report.runs_purged.len()
    )))
}

/// Executes the `explain` subcommand: prints the lineage for one row, or
/// every row of a run, as a JSON array.
///
/// # Errors
///
/// Returns [`CliError`] if configuration fails to load or the recorder
/// query fails.
pub fn explain(config_path: Option<&Path>, run_id: &str, row_id: Option<&str>) -> Result<ExitOutcome, CliError> {
    let config = PipelineConfig::load(config_path)?;
    let (recorder, _payload_store) = open_backend(&config)?;

    let explanations = if let Some(row_id) = row_id {
        vec![recorder.explain(&RowId::from_raw(row_id.to_string()))?]
    } else {
        let run_id = RunId::from_raw(run_id.to_string());
        recorder.row_ids_for_run(&run_id)?.iter().map(|row_id| recorder.explain(row_id)).collect::<Result<Vec<_>, _>>()?
    };

    let rendered = serde_json::to_string_pretty(&explanations)
        .map_err(|err| CliError::InvalidPluginConfig { label: "explain".to_string(), message: err.to_string() })?;
    Ok(ExitOutcome::Success(rendered))
}

/// Executes the `health` subcommand: reports whether the configured
/// recorder and payload store can be opened.
///
/// # Errors
///
/// Returns [`CliError`] if configuration fails to load.
pub fn health(config_path: Option<&Path>) -> Result<ExitOutcome, CliError> {
    let config = PipelineConfig::load(config_path)?;
    match open_backend(&config) {
        Ok(_) => Ok(ExitOutcome::Success("store: ok, payload store: ok".to_string())),
        Err(err) => Ok(ExitOutcome::Failure(format!("backend unreachable: {err}"))),
    }
}

/// Executes the `export` subcommand: writes a signed, hash-chained export
/// of a run's audit trail to stdout as newline-delimited JSON.
///
/// # Errors
///
/// Returns [`CliError`] if configuration fails to load or the export
/// cannot be produced.
pub fn export_run(config_path: Option<&Path>, run_id: &str, signing_key: &[u8]) -> Result<ExitOutcome, CliError> {
    let config = PipelineConfig::load(config_path)?;
    let (recorder, _payload_store) = open_backend(&config)?;
    let run_id = RunId::from_raw(run_id.to_string());
    let records = export::export_run(&recorder, &run_id, signing_key)?;
    let mut lines = String::new();
    for record in &records {
        let line = serde_json::to_string(record)
            .map_err(|err| CliError::InvalidPluginConfig { label: "export".to_string(), message: err.to_string() })?;
        lines.push_str(&line);
        lines.push('\n');
    }
    Ok(ExitOutcome::Success(lines))
}

/// Executes the `verify-export` subcommand: re-checks a signed export's
/// hash chain against `signing_key`.
///
/// # Errors
///
/// Returns [`CliError`] if the export file cannot be read or parsed.
pub fn verify_export(export_path: &Path, signing_key: &[u8]) -> Result<ExitOutcome, CliError> {
    let contents =
        std::fs::read_to_string(export_path).map_err(|source| CliError::FixtureIo { path: export_path.display().to_string(), source })?;
    let mut records = Vec::new();
    for line in contents.lines().filter(|line| !line.trim().is_empty()) {
        let record: elspeth_store_sqlite::export::ExportRecord = serde_json::from_str(line)
            .map_err(|err| CliError::InvalidPluginConfig { label: "verify-export".to_string(), message: err.to_string() })?;
        records.push(record);
    }
    match export::verify_export(&records, signing_key) {
        Ok(()) => Ok(ExitOutcome::Success(format!("export chain verifies: {} record(s)", records.len()))),
        Err(err) => Ok(ExitOutcome::Failure(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(dir: &std::path::Path, csv_path: &std::path::Path) -> PathBuf {
        let config_path = dir.join("elspeth.toml");
        let raw = format!(
            r#"
            [pipeline]
            name = "test-pipeline"

            [nodes.source]
            type = "source"
            plugin = "csv"
            config = {{ path = "{}" }}

            [nodes.sink]
            type = "sink"
            plugin = "log"

            [[edges]]
            from = "source"
            to = "sink"

            [store]
            recorder_path = "{}"
            payload_root = "{}"
            "#,
            csv_path.display(),
            dir.join("elspeth.sqlite3").display(),
            dir.join("payloads").display(),
        );
        std::fs::write(&config_path, raw).expect("write config");
        config_path
    }

    #[test]
    fn validate_reports_node_and_edge_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("source.csv");
        let mut csv_file = std::fs::File::create(&csv_path).expect("create csv");
        writeln!(csv_file, "name\nada").expect("write csv");
        let config_path = write_config(dir.path(), &csv_path);

        let outcome = validate(Some(&config_path)).expect("validate succeeds");
        match outcome {
            ExitOutcome::Success(message) => assert!(message.contains("2 nodes")),
            ExitOutcome::Failure(message) => panic!("unexpected failure: {message}"),
        }
    }

    #[test]
    fn health_reports_ok_once_the_backend_opens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("source.csv");
        let mut csv_file = std::fs::File::create(&csv_path).expect("create csv");
        writeln!(csv_file, "name\nada").expect("write csv");
        let config_path = write_config(dir.path(), &csv_path);

        let outcome = health(Some(&config_path)).expect("health runs");
        match outcome {
            ExitOutcome::Success(message) => assert!(message.contains("ok")),
            ExitOutcome::Failure(message) => panic!("backend did not open: {message}"),
        }
    }

    #[test]
    fn resume_rejects_a_run_that_is_not_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("source.csv");
        let mut csv_file = std::fs::File::create(&csv_path).expect("create csv");
        writeln!(csv_file, "name\nada").expect("write csv");
        let config_path = write_config(dir.path(), &csv_path);

        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let err = runtime.block_on(resume(Some(&config_path), "unknown-run")).expect_err("no such run");
        assert!(matches!(err, CliError::Checkpoint(_)));
    }

    #[tokio::test]
    async fn resume_reports_nothing_to_resume_for_a_failed_run_with_no_checkpoints() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("source.csv");
        let mut csv_file = std::fs::File::create(&csv_path).expect("create csv");
        writeln!(csv_file, "name\nada").expect("write csv");
        let config_path = write_config(dir.path(), &csv_path);
        let config = PipelineConfig::load(Some(&config_path)).expect("load config");

        let (recorder, _payload_store) = open_backend(&config).expect("open backend");
        let run_id = recorder.begin_run("fingerprint".to_string(), elspeth_core::RunMode::Live, None).expect("begin run");
        recorder.fail_run(&run_id).expect("fail run");
        drop(recorder);

        let err = resume(Some(&config_path), run_id.as_str()).await.expect_err("nothing to resume");
        assert!(matches!(err, CliError::NothingToResume { .. }));
    }
}
