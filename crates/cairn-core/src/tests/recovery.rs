use cairn_storage::{list_all, BlobStore};
use cairn_types::{CancelToken, ContentId};

use crate::block::manager::{BlockManager, FlushOptions};
use crate::block::{INDEX_BLOB_PREFIX, PACK_BLOB_PREFIX};
use crate::testutil::{count_blobs, new_test_manager, open_manager, seeded_random_data, test_content_id};

fn delete_all(store: &dyn BlobStore, cancel: &CancelToken, prefix: &str) {
    for meta in list_all(store, cancel, prefix).unwrap() {
        store.delete_blob(cancel, &meta.id).unwrap();
    }
}

fn recover_all_packs(
    manager: &BlockManager,
    store: &dyn BlobStore,
    cancel: &CancelToken,
    commit: bool,
) -> usize {
    let mut total = 0;
    for meta in list_all(store, cancel, PACK_BLOB_PREFIX).unwrap() {
        let infos = manager
            .recover_index_from_pack_file(cancel, &meta.id, meta.length, commit)
            .unwrap();
        total += infos.len();
    }
    total
}

#[test]
fn index_rebuilds_from_pack_trailers() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(1 << 20);

    let payloads: Vec<Vec<u8>> = (10..13).map(|seed| seeded_random_data(seed, 100)).collect();
    let ids: Vec<ContentId> = payloads.iter().map(|p| test_content_id(p)).collect();
    for (id, payload) in ids.iter().zip(&payloads) {
        manager.put_block(&cancel, id, payload).unwrap();
        assert_eq!(&manager.get_block(&cancel, id).unwrap(), payload);
    }
    manager.flush(&cancel, &FlushOptions::default()).unwrap();

    // Lose every index blob.
    delete_all(store.as_ref(), &cancel, INDEX_BLOB_PREFIX);
    assert_eq!(count_blobs(&store, INDEX_BLOB_PREFIX), 0);

    // Without indexes nothing resolves.
    let manager = open_manager(&store, 1 << 20);
    for id in &ids {
        assert!(manager.get_block(&cancel, id).unwrap_err().is_not_found());
    }

    // Pass 1: inspect only. Infos come back but nothing becomes visible.
    let recovered = recover_all_packs(&manager, store.as_ref(), &cancel, false);
    assert_eq!(recovered, 3);
    assert_eq!(count_blobs(&store, INDEX_BLOB_PREFIX), 0);
    for id in &ids {
        assert!(manager.get_block(&cancel, id).unwrap_err().is_not_found());
    }

    // Pass 2: commit. Lookups succeed with the original payloads.
    let recovered = recover_all_packs(&manager, store.as_ref(), &cancel, true);
    assert_eq!(recovered, 3);
    for (id, payload) in ids.iter().zip(&payloads) {
        assert_eq!(&manager.get_block(&cancel, id).unwrap(), payload);
    }

    // The republished index survives a flush and a fresh manager.
    manager.flush(&cancel, &FlushOptions::default()).unwrap();
    let reopened = open_manager(&store, 1 << 20);
    for (id, payload) in ids.iter().zip(&payloads) {
        assert_eq!(&reopened.get_block(&cancel, id).unwrap(), payload);
    }
}

#[test]
fn recover_without_commit_matches_commit() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(1 << 20);
    for seed in 20..23 {
        let payload = seeded_random_data(seed, 50);
        manager
            .put_block(&cancel, &test_content_id(&payload), &payload)
            .unwrap();
    }
    manager.flush(&cancel, &FlushOptions::default()).unwrap();

    let packs = list_all(store.as_ref(), &cancel, PACK_BLOB_PREFIX).unwrap();
    assert_eq!(packs.len(), 1);
    let pack = &packs[0];

    let inspected = manager
        .recover_index_from_pack_file(&cancel, &pack.id, pack.length, false)
        .unwrap();
    let committed = manager
        .recover_index_from_pack_file(&cancel, &pack.id, pack.length, true)
        .unwrap();
    assert_eq!(inspected, committed);
    assert_eq!(inspected.len(), 3);
    for info in &inspected {
        assert_eq!(info.pack_file, pack.id);
        assert!(!info.deleted);
    }
}

#[test]
fn recover_rejects_short_and_corrupt_packs() {
    let cancel = CancelToken::new();
    let (store, manager) = new_test_manager(1 << 20);

    store.put_blob(&cancel, "pshort", b"tiny").unwrap();
    assert!(manager
        .recover_index_from_pack_file(&cancel, "pshort", 4, false)
        .is_err());

    // A footer pointing past the end of the pack.
    let mut bogus = vec![0u8; 64];
    let footer_offset = bogus.len() - 16;
    bogus[footer_offset..footer_offset + 8].copy_from_slice(&u64::MAX.to_be_bytes());
    store.put_blob(&cancel, "pbogus", &bogus).unwrap();
    assert!(manager
        .recover_index_from_pack_file(&cancel, "pbogus", 64, false)
        .is_err());
}
