use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cairn_types::CancelToken;

use crate::block::manager::{CompactOptions, FlushOptions};
use crate::block::{INDEX_BLOB_PREFIX, PACK_BLOB_PREFIX};
use crate::testutil::{count_blobs, new_test_manager, open_manager, test_content_id};

const TEST_PACK_SIZE: usize = 1 << 20;

#[test]
fn put_get_before_and_after_flush() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(TEST_PACK_SIZE);
    let id = test_content_id(b"hello block");
    manager.put_block(&cancel, &id, b"hello block").unwrap();

    // Pending state serves the payload before anything is uploaded.
    assert_eq!(manager.get_block(&cancel, &id).unwrap(), b"hello block");
    assert_eq!(count_blobs(&store, PACK_BLOB_PREFIX), 0);

    manager.flush(&cancel, &FlushOptions::default()).unwrap();
    assert_eq!(count_blobs(&store, PACK_BLOB_PREFIX), 1);
    assert_eq!(count_blobs(&store, INDEX_BLOB_PREFIX), 1);

    // A flushed write is visible on the next lookup from the same instance.
    assert_eq!(manager.get_block(&cancel, &id).unwrap(), b"hello block");
}

#[test]
fn fresh_manager_resolves_flushed_blocks() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(TEST_PACK_SIZE);
    let payloads: Vec<Vec<u8>> = (0u8..5).map(|i| vec![i; 64]).collect();
    let ids: Vec<_> = payloads.iter().map(|p| test_content_id(p)).collect();
    for (id, payload) in ids.iter().zip(&payloads) {
        manager.put_block(&cancel, id, payload).unwrap();
    }
    manager.flush(&cancel, &FlushOptions::default()).unwrap();

    let reopened = open_manager(&store, TEST_PACK_SIZE);
    for (id, payload) in ids.iter().zip(&payloads) {
        assert_eq!(&reopened.get_block(&cancel, id).unwrap(), payload);
    }
}

#[test]
fn identical_content_is_stored_once() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(TEST_PACK_SIZE);
    let id = test_content_id(b"same bytes");
    for _ in 0..10 {
        manager.put_block(&cancel, &id, b"same bytes").unwrap();
    }
    manager.flush(&cancel, &FlushOptions::default()).unwrap();

    assert_eq!(count_blobs(&store, PACK_BLOB_PREFIX), 1);
    assert_eq!(manager.list_blocks(&cancel, "").unwrap().len(), 1);

    // Re-putting already-committed content stages nothing new.
    manager.put_block(&cancel, &id, b"same bytes").unwrap();
    manager.flush(&cancel, &FlushOptions::default()).unwrap();
    assert_eq!(count_blobs(&store, PACK_BLOB_PREFIX), 1);
}

#[test]
fn get_of_unknown_id_is_the_distinguished_not_found() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(TEST_PACK_SIZE);

    let err = manager
        .get_block(&cancel, &test_content_id(b"never written"))
        .unwrap_err();
    assert!(err.is_not_found());

    // Same error the blob store itself reports for absent blobs.
    let store_err = store
        .get_blob(&cancel, "pabsent", 0, None)
        .unwrap_err();
    assert!(store_err.is_not_found());
}

#[test]
fn delete_tombstones_committed_block() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(TEST_PACK_SIZE);
    let id = test_content_id(b"to delete");
    manager.put_block(&cancel, &id, b"to delete").unwrap();
    manager.flush(&cancel, &FlushOptions::default()).unwrap();
    assert!(manager.get_block(&cancel, &id).is_ok());

    manager.delete_block(&cancel, &id).unwrap();
    // The tombstone shadows the committed entry before the flush...
    assert!(manager.get_block(&cancel, &id).unwrap_err().is_not_found());

    manager.flush(&cancel, &FlushOptions::default()).unwrap();
    assert!(manager.get_block(&cancel, &id).unwrap_err().is_not_found());

    // ...and a fresh manager agrees after it.
    let reopened = open_manager(&store, TEST_PACK_SIZE);
    assert!(reopened.get_block(&cancel, &id).unwrap_err().is_not_found());
}

#[test]
fn delete_of_pending_block_wins() {
    let cancel = CancelToken::new();
    let (_store, manager) = new_test_manager(TEST_PACK_SIZE);
    let id = test_content_id(b"short lived");
    manager.put_block(&cancel, &id, b"short lived").unwrap();
    manager.delete_block(&cancel, &id).unwrap();
    assert!(manager.get_block(&cancel, &id).unwrap_err().is_not_found());

    manager.flush(&cancel, &FlushOptions::default()).unwrap();
    assert!(manager.get_block(&cancel, &id).unwrap_err().is_not_found());
}

#[test]
fn small_pack_threshold_splits_uploads() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(30);
    for payload in [[1u8; 20].as_slice(), [2u8; 20].as_slice(), [3u8; 20].as_slice()] {
        manager
            .put_block(&cancel, &test_content_id(payload), payload)
            .unwrap();
    }
    manager.flush(&cancel, &FlushOptions::default()).unwrap();
    assert_eq!(count_blobs(&store, PACK_BLOB_PREFIX), 3);
}

#[test]
fn list_blocks_merges_pending_and_committed() {
    let cancel = CancelToken::new();
    let (_store, manager) = new_test_manager(TEST_PACK_SIZE);
    let committed = test_content_id(b"committed block");
    let staged = test_content_id(b"staged block");

    manager.put_block(&cancel, &committed, b"committed block").unwrap();
    manager.flush(&cancel, &FlushOptions::default()).unwrap();
    manager.put_block(&cancel, &staged, b"staged block").unwrap();

    let listed = manager.list_blocks(&cancel, "").unwrap();
    let ids: Vec<_> = listed.iter().map(|i| i.block_id.clone()).collect();
    assert!(ids.contains(&committed));
    assert!(ids.contains(&staged));

    manager.delete_block(&cancel, &committed).unwrap();
    let listed = manager.list_blocks(&cancel, "").unwrap();
    let ids: Vec<_> = listed.iter().map(|i| i.block_id.clone()).collect();
    assert!(!ids.contains(&committed));
    assert!(ids.contains(&staged));
}

#[test]
fn progress_sink_sees_pack_uploads() {
    let cancel = CancelToken::new();
    let (_store, manager) = new_test_manager(TEST_PACK_SIZE);
    manager
        .put_block(&cancel, &test_content_id(b"progress"), b"progress")
        .unwrap();

    let calls = Arc::new(AtomicU64::new(0));
    let seen_total = Arc::new(AtomicU64::new(0));
    let calls2 = Arc::clone(&calls);
    let seen2 = Arc::clone(&seen_total);
    let options = FlushOptions {
        progress: Some(Arc::new(move |desc: &str, completed: u64, total: u64| {
            assert!(desc.starts_with(PACK_BLOB_PREFIX));
            assert!(completed <= total);
            calls2.fetch_add(1, Ordering::SeqCst);
            seen2.store(total, Ordering::SeqCst);
        })),
    };
    manager.flush(&cancel, &options).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(seen_total.load(Ordering::SeqCst) > 0);
}

#[test]
fn cancelled_token_stops_entry_points() {
    let (_store, manager) = new_test_manager(TEST_PACK_SIZE);
    let cancel = CancelToken::new();
    cancel.cancel();
    let id = test_content_id(b"cancelled");

    assert!(manager.put_block(&cancel, &id, b"x").unwrap_err().is_cancelled());
    assert!(manager.get_block(&cancel, &id).unwrap_err().is_cancelled());
    assert!(manager.delete_block(&cancel, &id).unwrap_err().is_cancelled());
    assert!(manager.list_blocks(&cancel, "").unwrap_err().is_cancelled());
    assert!(manager
        .recover_index_from_pack_file(&cancel, "pmissing", 100, false)
        .unwrap_err()
        .is_cancelled());
    assert!(manager
        .compact_indexes(
            &cancel,
            CompactOptions {
                min_small_blocks: 1,
                max_small_blocks: 1,
            },
        )
        .unwrap_err()
        .is_cancelled());
}

#[test]
fn concurrent_puts_then_flush() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(TEST_PACK_SIZE);
    let manager = Arc::new(manager);

    std::thread::scope(|scope| {
        for t in 0u8..4 {
            let manager = Arc::clone(&manager);
            let cancel = cancel.clone();
            scope.spawn(move || {
                for i in 0u8..25 {
                    let payload = vec![t, i, 0xab];
                    let id = test_content_id(&payload);
                    manager.put_block(&cancel, &id, &payload).unwrap();
                }
            });
        }
    });
    manager.flush(&cancel, &FlushOptions::default()).unwrap();

    let reopened = open_manager(&store, TEST_PACK_SIZE);
    for t in 0u8..4 {
        for i in 0u8..25 {
            let payload = vec![t, i, 0xab];
            let id = test_content_id(&payload);
            assert_eq!(reopened.get_block(&cancel, &id).unwrap(), payload);
        }
    }
}

#[test]
fn empty_flush_writes_nothing() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(TEST_PACK_SIZE);
    manager.flush(&cancel, &FlushOptions::default()).unwrap();
    assert_eq!(count_blobs(&store, PACK_BLOB_PREFIX), 0);
    assert_eq!(count_blobs(&store, INDEX_BLOB_PREFIX), 0);
}

#[test]
fn zero_length_blocks_roundtrip() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(TEST_PACK_SIZE);
    let id = test_content_id(b"");
    manager.put_block(&cancel, &id, b"").unwrap();
    manager.flush(&cancel, &FlushOptions::default()).unwrap();

    assert_eq!(manager.get_block(&cancel, &id).unwrap(), b"");
    let reopened = open_manager(&store, TEST_PACK_SIZE);
    assert_eq!(reopened.get_block(&cancel, &id).unwrap(), b"");
}
