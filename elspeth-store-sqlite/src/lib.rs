// elspeth-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Audit Recorder
// Description: Durable `Recorder` backend using SQLite WAL.
// Purpose: Provide production-grade persistence for ELSPETH's audit trail.
// Dependencies: elspeth-core, elspeth-payload, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a `SQLite`-backed [`Recorder`] implementation that
//! persists every entity in the audit model to its own table, enforces the
//! invariants that can be pushed down to schema constraints, and resolves
//! Tier-3 reads against a content-addressed payload store.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;
pub mod recorder;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::SqliteJournalMode;
pub use config::SqliteRecorderConfig;
pub use config::SqliteSyncMode;
pub use connection::SCHEMA_VERSION;
pub use error::SqliteError;
pub use export::ExportError;
pub use export::ExportRecord;
pub use export::export_run;
pub use export::verify_export;
pub use recorder::SqliteRecorder;
