// elspeth-cli/src/lib.rs
// ============================================================================
// Module: CLI Library
// Description: Shared modules for the `elspeth` command-line interface:
//              error type, configuration loader, and subcommand bodies.
// Purpose: Keep `main.rs` a thin arg-parsing/dispatch layer that the binary
//          target alone owns.
// Dependencies: Standard library.
// ============================================================================

//! ## Overview
//! This crate implements the `elspeth` binary: `run`/`validate`/`resume`/
//! `purge`/`explain`/`health`, plus `export`/`verify-export` for signed
//! audit-trail extraction.

/// Subcommand implementations.
pub mod commands;
/// The CLI's error type.
pub mod error;
/// Turns parsed configuration into a validated graph and resolved plugins.
pub mod loader;
