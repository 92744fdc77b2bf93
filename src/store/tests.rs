use super::*;
use crate::error::QkdError;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn request(length: usize) -> KeyRequest {
    KeyRequest::new("Alice", "Bob", length)
}

#[test]
fn test_fresh_key_state() {
    let store = KeyStore::in_memory();
    let created = store.create(request(256)).unwrap();

    assert_eq!(created.material.len(), 256);
    assert_eq!(created.metadata.length, 256);
    assert_eq!(created.metadata.consumed, 0);
    assert_eq!(created.metadata.uses, 0);
    assert_eq!(created.metadata.client_id, "Alice");
    assert_eq!(created.metadata.peer_id, "Bob");
    assert!(created.metadata.expires_at.is_none());

    let looked_up = store.lookup(&created.metadata.key_id).unwrap();
    assert_eq!(looked_up, created.metadata);
}

#[test]
fn test_zero_length_rejected() {
    let store = KeyStore::in_memory();
    let result = store.create(request(0));
    assert!(matches!(result, Err(QkdError::InvalidParameter { .. })));
    assert!(store.is_empty());
}

#[test]
fn test_key_ids_are_unique() {
    let store = KeyStore::in_memory();
    let a = store.create(request(8)).unwrap();
    let b = store.create(request(8)).unwrap();
    assert_ne!(a.metadata.key_id, b.metadata.key_id);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_consume_end_to_end_scenario() {
    let store = KeyStore::in_memory();
    let created = store.create(request(128)).unwrap();
    let key_id = &created.metadata.key_id;

    let first = store.consume(key_id, 64).unwrap();
    assert_eq!(first.offset, 0);
    assert_eq!(first.bytes, created.material[0..64]);

    let second = store.consume(key_id, 32).unwrap();
    assert_eq!(second.offset, 64);
    assert_eq!(second.bytes, created.material[64..96]);

    let too_much = store.consume(key_id, 40);
    assert_eq!(
        too_much,
        Err(QkdError::InsufficientMaterial {
            key_id: key_id.clone(),
            requested: 40,
            remaining: 32,
        })
    );

    let last = store.consume(key_id, 32).unwrap();
    assert_eq!(last.offset, 96);
    assert_eq!(last.bytes, created.material[96..128]);

    let meta = store.lookup(key_id).unwrap();
    assert!(meta.is_exhausted());
    assert_eq!(meta.uses, 3);
}

#[test]
fn test_insufficient_material_leaves_state_unchanged() {
    let store = KeyStore::in_memory();
    let created = store.create(request(10)).unwrap();
    let key_id = &created.metadata.key_id;

    store.consume(key_id, 4).unwrap();
    assert!(store.consume(key_id, 7).is_err());

    let meta = store.lookup(key_id).unwrap();
    assert_eq!(meta.consumed, 4);
    assert_eq!(meta.uses, 1);
}

#[test]
fn test_unknown_key_not_found() {
    let store = KeyStore::in_memory();
    assert_eq!(store.lookup("missing"), Err(QkdError::not_found("missing")));
    assert_eq!(store.consume("missing", 1), Err(QkdError::not_found("missing")));
    assert_eq!(store.peek("missing", 0, 1), Err(QkdError::not_found("missing")));
}

#[test]
fn test_zero_byte_consume_rejected() {
    let store = KeyStore::in_memory();
    let created = store.create(request(10)).unwrap();
    let result = store.consume(&created.metadata.key_id, 0);
    assert!(matches!(result, Err(QkdError::InvalidParameter { .. })));
}

#[test]
fn test_uses_exceeded_even_with_material_left() {
    let store = KeyStore::in_memory();
    let created = store.create(request(100).max_uses(2)).unwrap();
    let key_id = &created.metadata.key_id;

    store.consume(key_id, 1).unwrap();
    store.consume(key_id, 1).unwrap();
    assert_eq!(
        store.consume(key_id, 1),
        Err(QkdError::UsesExceeded {
            key_id: key_id.clone(),
            max_uses: 2,
        })
    );
    assert_eq!(store.lookup(key_id).unwrap().consumed, 2);
}

#[test]
fn test_expired_even_with_uses_and_material_left() {
    let clock = Arc::new(ManualClock::default());
    let store = KeyStore::with_clock(clock.clone());
    let created = store
        .create(request(100).expires_in(Duration::from_secs(30)).max_uses(10))
        .unwrap();
    let key_id = &created.metadata.key_id;

    store.consume(key_id, 10).unwrap();

    // Exactly at the deadline is still valid
    clock.advance(chrono::Duration::seconds(30));
    store.consume(key_id, 10).unwrap();

    clock.advance(chrono::Duration::milliseconds(1));
    assert_eq!(
        store.consume(key_id, 10),
        Err(QkdError::Expired {
            key_id: key_id.clone()
        })
    );

    // Metadata stays available after expiry
    let meta = store.lookup(key_id).unwrap();
    assert_eq!(meta.consumed, 20);
    assert_eq!(meta.uses, 2);
}

#[test]
fn test_zero_ttl_means_no_expiry() {
    let store = KeyStore::in_memory();
    let created = store
        .create(request(8).expires_in(Duration::from_secs(0)))
        .unwrap();
    assert!(created.metadata.expires_at.is_none());
}

#[test]
fn test_unrepresentable_ttl_rejected() {
    let store = KeyStore::in_memory();
    let result = store.create(request(8).expires_in(Duration::from_secs(1_000_000_000_000_000)));
    assert!(matches!(
        result,
        Err(QkdError::InvalidParameter { ref parameter, .. }) if parameter == "expires_in"
    ));
    assert!(store.is_empty());

    let result = store.create(request(8).expires_in(Duration::MAX));
    assert!(matches!(result, Err(QkdError::InvalidParameter { .. })));
    assert!(store.is_empty());
}

#[test]
fn test_expiry_checked_before_use_cap() {
    let clock = Arc::new(ManualClock::default());
    let store = KeyStore::with_clock(clock.clone());
    let created = store
        .create(request(8).expires_in(Duration::from_secs(1)).max_uses(0))
        .unwrap();
    clock.advance(chrono::Duration::seconds(2));
    assert!(matches!(
        store.consume(&created.metadata.key_id, 1),
        Err(QkdError::Expired { .. })
    ));
}

#[test]
fn test_peek_does_not_consume() {
    let store = KeyStore::in_memory();
    let created = store.create(request(64)).unwrap();
    let key_id = &created.metadata.key_id;

    let peeked = store.peek(key_id, 8, 16).unwrap();
    assert_eq!(peeked, created.material[8..24]);
    assert_eq!(store.lookup(key_id).unwrap().consumed, 0);
    assert_eq!(store.lookup(key_id).unwrap().uses, 0);

    // The same bytes can still be handed out by a sequential consume
    let consumed = store.consume(key_id, 24).unwrap();
    assert_eq!(&consumed.bytes[8..24], &peeked[..]);

    // Peek ignores the cursor
    assert_eq!(store.peek(key_id, 0, 8).unwrap(), created.material[0..8]);
}

#[test]
fn test_peek_bounds() {
    let store = KeyStore::in_memory();
    let created = store.create(request(16)).unwrap();
    let key_id = &created.metadata.key_id;

    assert!(store.peek(key_id, 0, 16).is_ok());
    assert!(store.peek(key_id, 15, 1).is_ok());
    assert!(store.peek(key_id, 16, 1).is_err());
    assert!(store.peek(key_id, 0, 17).is_err());
    assert!(store.peek(key_id, 4, 0).is_err());
    assert!(store.peek(key_id, usize::MAX, 2).is_err());
}

#[test]
fn test_concurrent_consumes_never_overlap() {
    let store = Arc::new(KeyStore::in_memory());
    let created = store.create(request(16 * 64)).unwrap();
    let key_id = created.metadata.key_id.clone();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let key_id = key_id.clone();
            std::thread::spawn(move || {
                let mut offsets = Vec::new();
                while let Ok(consumption) = store.consume(&key_id, 16) {
                    offsets.push(consumption.offset);
                }
                offsets
            })
        })
        .collect();

    let mut offsets: Vec<usize> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    offsets.sort_unstable();

    let expected: Vec<usize> = (0..64).map(|i| i * 16).collect();
    assert_eq!(offsets, expected);
    assert_eq!(store.lookup(&key_id).unwrap().uses, 64);
}

#[test]
fn test_persistent_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("km_store.json");

    let (key_id, material) = {
        let store = KeyStore::open(&path).unwrap();
        assert!(store.is_persistent());
        let created = store.create(request(48).max_uses(5)).unwrap();
        store.consume(&created.metadata.key_id, 16).unwrap();
        (created.metadata.key_id.clone(), created.material.clone())
    };

    let reopened = KeyStore::open(&path).unwrap();
    let meta = reopened.lookup(&key_id).unwrap();
    assert_eq!(meta.length, 48);
    assert_eq!(meta.consumed, 16);
    assert_eq!(meta.uses, 1);
    assert_eq!(meta.max_uses, Some(5));

    // Offsets already handed out are never handed out again
    let next = reopened.consume(&key_id, 16).unwrap();
    assert_eq!(next.offset, 16);
    assert_eq!(next.bytes, material[16..32]);
}

#[test]
fn test_failed_persist_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let store = KeyStore::open(&path).unwrap();
    let created = store.create(request(32)).unwrap();
    let key_id = created.metadata.key_id.clone();

    // Make the snapshot location unwritable by replacing the directory
    drop(dir);

    assert!(matches!(
        store.consume(&key_id, 8),
        Err(QkdError::PersistenceError { .. })
    ));
    let meta = store.lookup(&key_id).unwrap();
    assert_eq!(meta.consumed, 0);
    assert_eq!(meta.uses, 0);

    assert!(store.create(request(8)).is_err());
    assert_eq!(store.len(), 1);
}

#[test]
fn test_corrupt_snapshot_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, b"{ not json").unwrap();
    assert!(matches!(
        KeyStore::open(&path),
        Err(QkdError::PersistenceError { .. })
    ));
}

proptest! {
    #[test]
    fn prop_sequential_consumes_partition_material(sizes in proptest::collection::vec(1usize..32, 1..20)) {
        let total: usize = sizes.iter().sum();
        let store = KeyStore::in_memory();
        let created = store.create(request(total)).unwrap();
        let key_id = &created.metadata.key_id;

        let mut expected_offset = 0;
        let mut reassembled = Vec::with_capacity(total);
        for n in &sizes {
            let consumption = store.consume(key_id, *n).unwrap();
            prop_assert_eq!(consumption.offset, expected_offset);
            prop_assert_eq!(consumption.bytes.len(), *n);
            reassembled.extend_from_slice(&consumption.bytes);
            expected_offset += n;
        }

        prop_assert_eq!(reassembled, created.material.clone());
        prop_assert!(store.consume(key_id, 1).is_err());
    }
}
