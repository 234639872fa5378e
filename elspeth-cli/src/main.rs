#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// elspeth-cli/src/main.rs
// ============================================================================
// Module: CLI Entry Point
// Description: Command dispatcher for the `elspeth` binary: run, validate,
//              resume, purge, explain, health, export, verify-export.
// Purpose: Parse arguments, initialize logging, dispatch to one function per
//          subcommand, and map any failure to a non-zero exit code and a
//          single structured error line. Never panics.
// Dependencies: clap, tokio, tracing-subscriber, elspeth-cli
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use elspeth_cli::commands;
use elspeth_cli::commands::ExitOutcome;
use elspeth_cli::error::CliError;

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "elspeth", disable_help_subcommand = true, arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and the graph, then execute the pipeline.
    Run(ConfigArgs),
    /// Validate configuration and the graph without executing anything.
    Validate(ConfigArgs),
    /// Report the checkpoint resume plan for a run.
    Resume(ResumeArgs),
    /// Purge payloads and checkpoints for completed runs as of a timestamp.
    Purge(PurgeArgs),
    /// Print the full lineage for a row, or every row of a run.
    Explain(ExplainArgs),
    /// Check that the configured recorder and payload store are reachable.
    Health(ConfigArgs),
    /// Write a signed, hash-chained export of a run's audit trail.
    Export(ExportArgs),
    /// Verify a previously written signed export's hash chain.
    VerifyExport(VerifyExportArgs),
}

/// Arguments shared by every subcommand that only needs a config path.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Path to the pipeline configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for `resume`.
#[derive(Args, Debug)]
struct ResumeArgs {
    /// Path to the pipeline configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// The run to plan a resume for.
    #[arg(long)]
    run_id: String,
}

/// Arguments for `purge`.
#[derive(Args, Debug)]
struct PurgeArgs {
    /// Path to the pipeline configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Purge payloads and checkpoints retained before this RFC3339 instant.
    #[arg(long)]
    as_of: String,
}

/// Arguments for `explain`.
#[derive(Args, Debug)]
struct ExplainArgs {
    /// Path to the pipeline configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// The run whose rows to explain, when `--row-id` is not given.
    #[arg(long, default_value = "")]
    run_id: String,
    /// Explain a single row instead of every row in the run.
    #[arg(long)]
    row_id: Option<String>,
}

/// Arguments for `export`.
#[derive(Args, Debug)]
struct ExportArgs {
    /// Path to the pipeline configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// The run to export.
    #[arg(long)]
    run_id: String,
    /// Hex-encoded HMAC signing key.
    #[arg(long)]
    signing_key: String,
}

/// Arguments for `verify-export`.
#[derive(Args, Debug)]
struct VerifyExportArgs {
    /// Path to a newline-delimited JSON export file.
    #[arg(long, value_name = "PATH")]
    export_file: PathBuf,
    /// Hex-encoded HMAC signing key.
    #[arg(long)]
    signing_key: String,
}

/// CLI entry point, returning an exit code rather than panicking.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_env("ELSPETH_LOG").unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    match dispatch().await {
        Ok(outcome) => report(&outcome),
        Err(err) => {
            tracing::error!(error = %err, "elspeth command failed");
            ExitCode::FAILURE
        }
    }
}

/// Writes a subcommand's report to stdout and returns the matching exit
/// code, falling back to failure if the write itself fails.
fn report(outcome: &ExitOutcome) -> ExitCode {
    let (message, code) = match outcome {
        ExitOutcome::Success(message) => (message, ExitCode::SUCCESS),
        ExitOutcome::Failure(message) => (message, ExitCode::FAILURE),
    };
    let mut stdout = std::io::stdout();
    if writeln!(&mut stdout, "{message}").is_err() {
        return ExitCode::FAILURE;
    }
    code
}

/// Parses arguments and runs the selected subcommand.
async fn dispatch() -> Result<ExitOutcome, CliError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => commands::run(args.config.as_deref(), true).await,
        Command::Validate(args) => commands::validate(args.config.as_deref()),
        Command::Resume(args) => commands::resume(args.config.as_deref(), &args.run_id).await,
        Command::Purge(args) => {
            let as_of = parse_timestamp(&args.as_of)?;
            commands::purge(args.config.as_deref(), as_of)
        }
        Command::Explain(args) => {
            let row_id = args.row_id.as_deref();
            commands::explain(args.config.as_deref(), &args.run_id, row_id)
        }
        Command::Health(args) => commands::health(args.config.as_deref()),
        Command::Export(args) => {
            let key = parse_signing_key(&args.signing_key)?;
            commands::export_run(args.config.as_deref(), &args.run_id, &key)
        }
        Command::VerifyExport(args) => {
            let key = parse_signing_key(&args.signing_key)?;
            commands::verify_export(&args.export_file, &key)
        }
    }
}

/// Parses an RFC3339 timestamp from a `--as-of` argument.
fn parse_timestamp(raw: &str) -> Result<elspeth_core::time::Timestamp, CliError> {
    let parsed = time::OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
        .map_err(|err| CliError::InvalidArgument { flag: "as-of".to_string(), message: err.to_string() })?;
    Ok(elspeth_core::time::Timestamp::new(parsed))
}

/// Decodes a hex-encoded `--signing-key` argument.
fn parse_signing_key(raw: &str) -> Result<Vec<u8>, CliError> {
    if raw.len() % 2 != 0 {
        return Err(CliError::InvalidArgument { flag: "signing-key".to_string(), message: "odd number of hex digits".to_string() });
    }
    (0..raw.len())
        .step_by(2)
        .map(|index| {
            u8::from_str_radix(&raw[index..index + 2], 16)
                .map_err(|err| CliError::InvalidArgument { flag: "signing-key".to_string(), message: err.to_string() })
        })
        .collect()
}
