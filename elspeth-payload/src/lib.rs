// elspeth-payload/src/lib.rs
// ============================================================================
// Crate: elspeth-payload
// Description: Content-addressable blob store for out-of-line row, context,
//              call, and artifact payloads (§4.6).
// Purpose: Give the recorder a place to put large payloads without growing
//          the relational schema, addressed purely by content hash so a
//          purge never invalidates an audit trail that only ever recorded
//          the hash.
// Dependencies: elspeth-core, sha2, subtle, thiserror, tracing
// ============================================================================

//! ## Overview
//! Every blob lives at `{root}/{hash[0:2]}/{hash}`, named after its own
//! SHA-256 digest. `put` is idempotent (a second write of the same content
//! is a no-op), `get` re-verifies the digest on every read with a
//! timing-safe comparison, and `delete` removes the blob without touching
//! any recorder row that references its hash — purge is a Tier-3-compatible
//! operation by construction, never a Tier-1 one.

use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use sha2::Digest as _;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Errors raised by payload store operations.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// An I/O operation on the store's backing filesystem failed.
    #[error("payload store I/O error: {0}")]
    Io(#[from] io::Error),
    /// A stored blob's content does not hash to the name it is stored
    /// under. This is a Tier-1 condition: the store's fundamental
    /// content-addressing guarantee has been violated, by disk corruption
    /// or out-of-band tampering.
    #[error("payload store corruption: blob at hash {hash} does not match its own content")]
    Corrupt {
        /// The hash the corrupted blob was stored under.
        hash: String,
    },
    /// A hash string was not valid lowercase hex of the expected length.
    #[error("malformed hash: {0}")]
    MalformedHash(String),
}

/// A content-addressable blob store rooted at a directory on the local
/// filesystem.
#[derive(Debug, Clone)]
pub struct PayloadStore {
    root: PathBuf,
}

impl PayloadStore {
    /// Opens a store rooted at `root`, creating the directory if absent.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Io`] if `root` cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PayloadError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Writes `bytes`, returning its lowercase hex SHA-256 digest. A second
    /// write of identical content is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Io`] if the write fails.
    #[tracing::instrument(level = "debug", skip(self, bytes), fields(len = bytes.len()))]
    pub fn put(&self, bytes: &[u8]) -> Result<String, PayloadError> {
        let hash = hex_digest(bytes);
        let path = self.path_for(&hash);
        if path.exists() {
            return Ok(hash);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        match fs::rename(&tmp_path, &path) {
            Ok(()) => Ok(hash),
            Err(err) if path.exists() => {
                let _ = fs::remove_file(&tmp_path);
                let _ = err;
                Ok(hash)
            }
            Err(err) => Err(PayloadError::Io(err)),
        }
    }

    /// Reads the blob stored under `hash`, re-verifying its content digest
    /// with a timing-safe comparison before returning it.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Io`] if the blob is absent or unreadable,
    /// and [`PayloadError::Corrupt`] if its content no longer matches
    /// `hash`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn get(&self, hash: &str) -> Result<Vec<u8>, PayloadError> {
        validate_hash(hash)?;
        let bytes = fs::read(self.path_for(hash))?;
        let actual = hex_digest(&bytes);
        if actual.as_bytes().ct_eq(hash.as_bytes()).into() {
            Ok(bytes)
        } else {
            Err(PayloadError::Corrupt { hash: hash.to_string() })
        }
    }

    /// Returns whether a blob is stored under `hash`.
    #[must_use]
    pub fn exists(&self, hash: &str) -> bool {
        self.path_for(hash).is_file()
    }

    /// Removes the blob stored under `hash`, if present. The recorder is
    /// never updated by this call; hashes already recorded remain valid
    /// references even after the blob they pointed to is gone (§4.6).
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Io`] if the removal fails for a reason other
    /// than the blob already being absent.
    pub fn delete(&self, hash: &str) -> Result<(), PayloadError> {
        validate_hash(hash)?;
        match fs::remove_file(self.path_for(hash)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PayloadError::Io(err)),
        }
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        let prefix = hash.get(0..2).unwrap_or(hash);
        self.root.join(prefix).join(hash)
    }

    /// Returns the root directory this store is rooted at.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn validate_hash(hash: &str) -> Result<(), PayloadError> {
    if hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(PayloadError::MalformedHash(hash.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::PayloadStore;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PayloadStore::open(dir.path()).expect("open");
        let hash = store.put(b"hello world").expect("put");
        assert!(store.exists(&hash));
        let bytes = store.get(&hash).expect("get");
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn put_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PayloadStore::open(dir.path()).expect("open");
        let first = store.put(b"same content").expect("put 1");
        let second = store.put(b"same content").expect("put 2");
        assert_eq!(first, second);
    }

    #[test]
    fn delete_does_not_error_when_already_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PayloadStore::open(dir.path()).expect("open");
        let hash = "a".repeat(64);
        store.delete(&hash).expect("delete absent blob");
    }

    #[test]
    fn get_detects_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PayloadStore::open(dir.path()).expect("open");
        let hash = store.put(b"original").expect("put");
        let path = store.path_for(&hash);
        std::fs::write(&path, b"tampered").expect("tamper");
        let err = store.get(&hash).unwrap_err();
        assert!(matches!(err, super::PayloadError::Corrupt { .. }));
    }
}
