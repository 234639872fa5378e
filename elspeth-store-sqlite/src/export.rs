// elspeth-store-sqlite/src/export.rs
// ============================================================================
// Module: Signed Hash-Chained Export
// Description: Produces a tamper-evident export of a run's audit trail:
//              one canonically-hashed, HMAC-signed record per row, each
//              signature folding in the previous one.
// Purpose: Let an auditor outside the process trust an exported run without
//          re-deriving every hash the recorder itself already verified,
//          and detect a reordered or dropped record (§4.5, export).
// Dependencies: elspeth-core, hmac, sha2, subtle, thiserror
// ============================================================================

//! ## Overview
//! Exporting folds `Recorder::explain` over every row of a run, in
//! `row_index` order, canonicalizing each `RowExplanation` the same way
//! the recorder canonicalizes anything else hashed (§`hashing`). Each
//! record's signature is `HMAC-SHA256(key, previous_signature || payload_hash)`,
//! so a verifier who recomputes the chain from a held key detects removal,
//! reordering, or mutation of any single record; a verifier without the key
//! can still confirm the payload hashes match the exported content, just
//! not that the chain is genuine.

use elspeth_core::RowId;
use elspeth_core::RunId;
use elspeth_core::StoreError;
use elspeth_core::hashing;
use hmac::Hmac;
use hmac::Mac;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::recorder::SqliteRecorder;

/// HMAC-SHA256 keyed to the caller-supplied export signing key.
type HmacSha256 = Hmac<Sha256>;

/// Errors raised while exporting or verifying a signed export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The recorder failed to produce the lineage for some row.
    #[error("export store error: {0}")]
    Store(#[from] StoreError),
    /// A `RowExplanation` could not be canonicalized.
    #[error("export canonicalization error: {0}")]
    Canonicalize(String),
    /// The caller supplied an empty signing key.
    #[error("export signing key must not be empty")]
    EmptyKey,
    /// Verification found a record whose signature does not match the
    /// recomputed chain.
    #[error("export chain broken at sequence {sequence}")]
    ChainBroken {
        /// The sequence number of the first record whose signature failed
        /// to verify.
        sequence: u64,
    },
}

/// One signed, chained record in an export (one per row of the run).
#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    /// Zero-based position within the export, in `row_index` order.
    pub sequence: u64,
    /// The row this record's lineage is rooted at.
    pub row_id: RowId,
    /// Canonical hash of the row's full `RowExplanation`.
    pub payload_hash: String,
    /// The previous record's signature, or `None` for the first record.
    pub previous_signature: Option<String>,
    /// `HMAC-SHA256(key, previous_signature || payload_hash)`, hex-encoded.
    pub signature: String,
}

/// Exports every row of `run_id` as a signed, hash-chained sequence of
/// records, in `row_index` order.
///
/// # Errors
///
/// Returns [`ExportError::EmptyKey`] if `signing_key` is empty, or
/// [`ExportError::Store`]/[`ExportError::Canonicalize`] if a row's lineage
/// cannot be read or hashed.
pub fn export_run(
    recorder: &SqliteRecorder,
    run_id: &RunId,
    signing_key: &[u8],
) -> Result<Vec<ExportRecord>, ExportError> {
    if signing_key.is_empty() {
        return Err(ExportError::EmptyKey);
    }
    let row_ids = recorder.row_ids_for_run(run_id)?;
    let mut records = Vec::with_capacity(row_ids.len());
    let mut previous_signature: Option<String> = None;
    for (index, row_id) in row_ids.into_iter().enumerate() {
        let sequence = u64::try_from(index).unwrap_or(u64::MAX);
        let explanation = recorder.explain(&row_id)?;
        let payload_hash =
            hashing::stable_hash(&explanation).map_err(|err| ExportError::Canonicalize(err.to_string()))?;
        let signature = sign_link(signing_key, previous_signature.as_deref(), &payload_hash);
        records.push(ExportRecord {
            sequence,
            row_id,
            payload_hash: payload_hash.clone(),
            previous_signature: previous_signature.clone(),
            signature: signature.clone(),
        });
        previous_signature = Some(signature);
    }
    Ok(records)
}

/// Re-walks an exported chain and confirms every signature matches what
/// `signing_key` would have produced, in sequence order.
///
/// # Errors
///
/// Returns [`ExportError::ChainBroken`] at the first record whose
/// signature does not match the recomputed chain (a gap, reordering, or
/// tampered payload hash all surface here).
pub fn verify_export(records: &[ExportRecord], signing_key: &[u8]) -> Result<(), ExportError> {
    let mut previous_signature: Option<String> = None;
    for record in records {
        if record.previous_signature != previous_signature {
            return Err(ExportError::ChainBroken { sequence: record.sequence });
        }
        let expected = sign_link(signing_key, previous_signature.as_deref(), &record.payload_hash);
        if expected.as_bytes().ct_eq(record.signature.as_bytes()).into() {
            previous_signature = Some(record.signature.clone());
        } else {
            return Err(ExportError::ChainBroken { sequence: record.sequence });
        }
    }
    Ok(())
}

/// Computes one link of the export's hash chain.
fn sign_link(signing_key: &[u8], previous_signature: Option<&str>, payload_hash: &str) -> String {
    #[allow(
        clippy::expect_used,
        reason = "HMAC-SHA256 accepts any key length; construction cannot fail"
    )]
    let mut mac = HmacSha256::new_from_slice(signing_key).expect("hmac accepts any key length");
    if let Some(previous) = previous_signature {
        mac.update(previous.as_bytes());
    }
    mac.update(payload_hash.as_bytes());
    let bytes = mac.finalize().into_bytes();
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use elspeth_core::Determinism;
    use elspeth_core::NodeType;
    use elspeth_core::Recorder as _;
    use elspeth_core::RowOutcome;
    use elspeth_core::RunMode;

    use super::*;
    use crate::config::SqliteJournalMode;
    use crate::config::SqliteRecorderConfig;
    use crate::config::SqliteSyncMode;

    fn seeded_recorder() -> (tempfile::TempDir, SqliteRecorder, RunId) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SqliteRecorderConfig {
            path: dir.path().join("audit.sqlite3"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteJournalMode::Wal,
            sync_mode: SqliteSyncMode::Normal,
            read_pool_size: 2,
            payload_root: None,
        };
        let recorder = SqliteRecorder::open(&config).expect("open recorder");
        let run_id = recorder.begin_run("fp".to_string(), RunMode::Live, None).expect("begin run");
        let node_id = recorder
            .register_node(&run_id, "source", NodeType::Source, "csv", "1.0.0", "cfg-hash", Determinism::Deterministic)
            .expect("register node");
        for index in 0..3 {
            let row_id = recorder.create_row(&run_id, &node_id, index, "input-hash", None).expect("create row");
            let token_id = recorder.create_token(&run_id, &row_id, &node_id).expect("create token");
            let state_id =
                recorder.begin_node_state(&token_id, &node_id, 0, "input-hash", None).expect("begin state");
            recorder.complete_node_state(&state_id, "output-hash", None, 1).expect("complete state");
            recorder.record_token_outcome(&run_id, &token_id, RowOutcome::Completed).expect("record outcome");
        }
        (dir, recorder, run_id)
    }

    #[test]
    fn exported_chain_verifies_with_the_same_key() {
        let (_dir, recorder, run_id) = seeded_recorder();
        let key = b"export-signing-key";
        let records = export_run(&recorder, &run_id, key).expect("export");
        assert_eq!(records.len(), 3);
        verify_export(&records, key).expect("verify");
    }

    #[test]
    fn tampered_payload_hash_breaks_verification() {
        let (_dir, recorder, run_id) = seeded_recorder();
        let key = b"export-signing-key";
        let mut records = export_run(&recorder, &run_id, key).expect("export");
        records[1].payload_hash = "0".repeat(64);
        let err = verify_export(&records, key).expect_err("tampered chain must fail");
        assert!(matches!(err, ExportError::ChainBroken { sequence: 1 }));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let (_dir, recorder, run_id) = seeded_recorder();
        let records = export_run(&recorder, &run_id, b"export-signing-key").expect("export");
        let err = verify_export(&records, b"wrong-key").expect_err("wrong key must fail");
        assert!(matches!(err, ExportError::ChainBroken { sequence: 0 }));
    }
}
