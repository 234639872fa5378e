// elspeth-core/tests/hashing.rs
// ============================================================================
// Module: Canonical Hashing Property Tests
// Description: Property tests for `stable_hash`'s canonicalization guarantees
//              across arbitrary JSON-shaped values, not just hand-picked
//              samples.
// Purpose: Cover invariant 1 (identical semantic content hashes identically
//          regardless of key order) and invariant 2 (non-finite numbers are
//          rejected, never silently hashed).
// Dependencies: elspeth-core, proptest, serde_json
// ============================================================================

use elspeth_core::hashing::HashError;
use elspeth_core::hashing::stable_hash;
use proptest::prelude::*;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

/// Parses a JSON literal whose exponent is large enough to overflow `f64`
/// during parsing, e.g. `1e400`. `serde_json` accepts this as syntactically
/// valid JSON (the grammar places no bound on exponent magnitude) and stores
/// the resulting `f64::INFINITY` in the parsed `Value` directly, bypassing
/// the checked `Number::from_f64` constructor that `json!`/`Value::from`
/// would otherwise use to discard it as `Value::Null`. This is the one
/// realistic way a non-finite number reaches `stable_hash`: through data
/// parsed from an external source, not through a value built in Rust code.
fn parse_overflowing_literal(body: &str) -> Value {
    serde_json::from_str(body).expect("overflowing exponent must still parse as valid JSON")
}

fn arbitrary_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        ".{0,16}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 8, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            proptest::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn reordering_object_keys_never_changes_the_hash(value in arbitrary_value()) {
        let Value::Object(map) = value else { return Ok(()); };
        let forward: Map<String, Value> = map.clone().into_iter().collect();
        let reversed: Map<String, Value> = map.into_iter().rev().collect();
        let forward_hash = stable_hash(&forward).expect("hash forward");
        let reversed_hash = stable_hash(&reversed).expect("hash reversed");
        prop_assert_eq!(forward_hash, reversed_hash);
    }

    #[test]
    fn identical_values_always_hash_identically(value in arbitrary_value()) {
        let first = stable_hash(&value).expect("hash 1");
        let second = stable_hash(&value).expect("hash 2");
        prop_assert_eq!(first, second);
    }

    #[test]
    fn structurally_different_arrays_hash_differently(
        a in proptest::collection::vec(any::<i32>(), 1..8),
        b in proptest::collection::vec(any::<i32>(), 1..8),
    ) {
        prop_assume!(a != b);
        let hash_a = stable_hash(&a).expect("hash a");
        let hash_b = stable_hash(&b).expect("hash b");
        prop_assert_ne!(hash_a, hash_b);
    }
}

#[test]
fn overflowing_positive_exponent_is_rejected_rather_than_silently_hashed() {
    let value = parse_overflowing_literal(r#"{"score": 1e400}"#);
    assert!(value["score"].as_f64().expect("parsed as a number").is_infinite());
    let err = stable_hash(&value).expect_err("infinity must be rejected");
    assert!(matches!(err, HashError::NonFiniteNumber { path } if path == "$.score"));
}

#[test]
fn overflowing_negative_exponent_is_rejected_rather_than_silently_hashed() {
    let value = parse_overflowing_literal(r#"{"score": -1e400}"#);
    assert!(value["score"].as_f64().expect("parsed as a number").is_infinite());
    let err = stable_hash(&value).expect_err("negative infinity must be rejected");
    assert!(matches!(err, HashError::NonFiniteNumber { path } if path == "$.score"));
}

#[test]
fn a_finite_number_at_the_same_magnitude_boundary_is_accepted() {
    let value = parse_overflowing_literal(r#"{"score": 1e300}"#);
    stable_hash(&value).expect("finite number must hash successfully");
}
