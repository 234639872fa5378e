// elspeth-runtime/src/retention.rs
// ============================================================================
// Module: Retention / Purge (C12)
// Description: Deletes payloads older than a cutoff for completed runs,
//              leaving their hashes as valid historical references.
// Purpose: Thin wrapper over `Recorder::purge` so the CLI's `purge`
//          subcommand has a stable, documented entry point independent of
//          the recorder's own error type.
// Dependencies: elspeth-core::{recorder, time}
// ============================================================================

use elspeth_core::recorder::PurgeReport;
use elspeth_core::recorder::SharedRecorder;
use elspeth_core::time::Timestamp;

use crate::error::RetentionError;

/// Runs a retention sweep against one recorder.
pub struct RetentionSweeper {
    recorder: SharedRecorder,
}

impl RetentionSweeper {
    /// Builds a sweeper over `recorder`.
    #[must_use]
    pub fn new(recorder: SharedRecorder) -> Self {
        Self { recorder }
    }

    /// Deletes every payload belonging to a completed run older than
    /// `as_of`, per §4.6's retention policy.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::Store`] on a write failure.
    pub fn purge(&self, as_of: Timestamp) -> Result<PurgeReport, RetentionError> {
        self.recorder.purge(as_of).map_err(RetentionError::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test module; workspace lints exempt #[cfg(test)] code")]
mod tests {
    use elspeth_core::Recorder;
    use elspeth_core::RunMode;
    use elspeth_store_sqlite::config::SqliteJournalMode;
    use elspeth_store_sqlite::config::SqliteRecorderConfig;
    use elspeth_store_sqlite::config::SqliteSyncMode;
    use elspeth_store_sqlite::recorder::SqliteRecorder;

    use super::*;

    #[test]
    fn purge_reports_zero_runs_when_nothing_is_eligible() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SqliteRecorderConfig {
            path: dir.path().join("audit.sqlite3"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteJournalMode::Wal,
            sync_mode: SqliteSyncMode::Normal,
            read_pool_size: 1,
            payload_root: None,
        };
        let recorder: SharedRecorder = std::sync::Arc::new(SqliteRecorder::open(&config).expect("open recorder"));
        recorder.begin_run("fingerprint".to_string(), RunMode::Live, None).expect("begin run");

        let sweeper = RetentionSweeper::new(recorder);
        let report = sweeper.purge(Timestamp::now()).expect("purge");
        assert_eq!(report.runs_purged.len(), 0);
    }
}
