// elspeth-core/src/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: RFC 8785 (JCS) JSON canonicalization and content hashing.
// Purpose: Provide deterministic hashes for rows, states, calls, and export
//          records so that lineage can be verified byte-for-byte.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! ELSPETH hashes all canonical JSON using RFC 8785 (JCS) so that two
//! semantically equal values always hash identically and two different
//! values (almost) never collide. Normalization happens in two phases:
//! non-JSON-native shapes (datetimes, bytes, tabular frames) are projected
//! into plain `serde_json::Value` first; the result is then rejected if it
//! contains a non-finite number, and finally serialized with `serde_jcs`.
//!
//! Security posture: hashing underpins audit integrity; a bug here would
//! silently break lineage verification rather than fail loudly, so every
//! public entry point here is covered by property tests in `tests/hashing.rs`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Hash Algorithm & Digest
// ============================================================================

/// Supported hash algorithms for ELSPETH artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing (the only algorithm the data model currently stores).
    Sha256,
}

/// Default hash algorithm for ELSPETH.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

/// The canonical schema version stamped onto every `Run`.
///
/// # Invariants
/// Bumping this value is a breaking change to how canonicalization or
/// hashing behaves; existing hashes remain valid under the version they were
/// computed with.
pub const CANONICAL_VERSION: u32 = 1;

/// A lowercase hex-encoded SHA-256 digest (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self { algorithm, value: hex_encode(bytes) }
    }

    /// Returns the digest as a lowercase hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for HashDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while normalizing or hashing a value.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization (JCS serialization) failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
    /// The value contained a non-finite number (`NaN`, `+Inf`, `-Inf`).
    #[error("cannot hash non-finite number at path {path}")]
    NonFiniteNumber {
        /// Dotted path to the offending number within the value tree.
        path: String,
    },
}

// ============================================================================
// SECTION: Normalization
// ============================================================================

/// Converts a UTC-aware timestamp into its normalized JSON representation:
/// an ISO-8601 string with an explicit offset.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] if formatting fails.
pub fn normalize_timestamp(value: OffsetDateTime) -> Result<Value, HashError> {
    let formatted =
        value.format(&Rfc3339).map_err(|err| HashError::Canonicalization(err.to_string()))?;
    Ok(Value::String(formatted))
}

/// Converts raw bytes into their normalized JSON representation: base64.
#[must_use]
pub fn normalize_bytes(bytes: &[u8]) -> Value {
    use base64::Engine;
    Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// A tabular frame: an ordered sequence of rows, each an ordered mapping of
/// column name to value. Column order within each row is canonicalized
/// lexicographically during normalization, independent of insertion order.
#[derive(Debug, Clone, Default)]
pub struct TabularFrame {
    /// The frame's rows, in their original order.
    pub rows: Vec<Vec<(String, Value)>>,
}

/// Converts a tabular frame into its normalized JSON representation: a list
/// of row mappings with lexicographically sorted keys.
#[must_use]
pub fn normalize_tabular_frame(frame: &TabularFrame) -> Value {
    let rows = frame
        .rows
        .iter()
        .map(|row| {
            let mut sorted: Vec<&(String, Value)> = row.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            let mut map = Map::new();
            for (key, value) in sorted {
                map.insert(key.clone(), value.clone());
            }
            Value::Object(map)
        })
        .collect();
    Value::Array(rows)
}

/// Walks a JSON value tree and rejects any non-finite number.
///
/// `serde_json`'s own serializer already refuses to produce a `Value`
/// containing `NaN`/`Inf` (callers see a `Canonicalization` error earlier, in
/// [`canonical_json_bytes`]); this walk is the explicit, spec-mandated
/// checkpoint so that guarantee is asserted here rather than assumed, and so
/// any future `Value` construction path that bypasses `serde_json`'s
/// serializer is still covered.
///
/// # Errors
///
/// Returns [`HashError::NonFiniteNumber`] naming the offending path.
pub fn reject_non_finite(value: &Value) -> Result<(), HashError> {
    reject_non_finite_at(value, "$")
}

/// Recursive worker for [`reject_non_finite`], tracking the current path.
fn reject_non_finite_at(value: &Value, path: &str) -> Result<(), HashError> {
    match value {
        Value::Number(number) => {
            if let Some(f) = number.as_f64()
                && !f.is_finite()
            {
                return Err(HashError::NonFiniteNumber { path: path.to_string() });
            }
            Ok(())
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                reject_non_finite_at(item, &format!("{path}[{index}]"))?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, item) in map {
                reject_non_finite_at(item, &format!("{path}.{key}"))?;
            }
            Ok(())
        }
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(()),
    }
}

// ============================================================================
// SECTION: Canonicalization & Hashing
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// The value is serialized to a `serde_json::Value` first so non-finite
/// numbers can be rejected before JCS encoding runs.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails, or
/// [`HashError::NonFiniteNumber`] when the value contains `NaN`/`Inf`.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    let as_value =
        serde_json::to_value(value).map_err(|err| HashError::Canonicalization(err.to_string()))?;
    reject_non_finite(&as_value)?;
    serde_jcs::to_vec(&as_value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Convenience wrapper over [`hash_canonical_json`] using the default algorithm.
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails.
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, value).map(|digest| digest.value)
}

/// Returns canonical JSON bytes, for callers that need the bytes directly
/// (e.g. to feed them to a signature).
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    canonical_json_bytes(value)
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stable_hash_is_order_independent() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(stable_hash(&a).expect("hash a"), stable_hash(&b).expect("hash b"));
    }

    #[test]
    fn accepts_finite_numbers_anywhere_in_the_tree() {
        let value = json!({"x": [1, 2.5, {"y": -3}]});
        assert!(reject_non_finite(&value).is_ok());
    }

    #[test]
    fn canonical_json_bytes_rejects_non_finite_floats() {
        #[derive(Serialize)]
        struct HasNan {
            value: f64,
        }
        let err = canonical_json_bytes(&HasNan { value: f64::NAN })
            .expect_err("NaN must be rejected before hashing");
        assert!(matches!(err, HashError::Canonicalization(_)));
    }

    #[test]
    fn tabular_frame_sorts_columns() {
        let frame = TabularFrame {
            rows: vec![vec![
                ("b".to_string(), json!(2)),
                ("a".to_string(), json!(1)),
            ]],
        };
        let normalized = normalize_tabular_frame(&frame);
        let rendered = serde_json::to_string(&normalized).expect("serialize");
        assert_eq!(rendered, r#"[{"a":1,"b":2}]"#);
    }
}
