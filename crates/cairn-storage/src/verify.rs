//! Reusable behavior checks for blob-store implementations.
//!
//! Backend test modules call these with a fresh store; every check panics
//! with a descriptive message on contract violation.

use std::collections::BTreeSet;

use cairn_types::CancelToken;

use crate::{connect, list_all, BlobStore};

/// Exercise the full blob-store contract against an empty store.
pub fn verify_store(cancel: &CancelToken, store: &dyn BlobStore) {
    let blobs: &[(&str, Vec<u8>)] = &[
        ("abcdbbf4f0507d054ed5a80a5b65086f602b", vec![]),
        ("zxce0e35630770c54668a8cfb4e414c6bf8f", vec![1]),
        ("abff4585856ebf0748fd989e1dd623a8963d", vec![1; 1000]),
        ("abgc3dca496d510f492c858a2df1eb824e62", vec![1; 10000]),
        ("cairn.repository", vec![2; 100]),
    ];

    // Absent blobs report the distinguished not-found error.
    for (id, _) in blobs {
        assert_get_not_found(cancel, store, id);
    }

    for (id, contents) in blobs {
        store
            .put_blob(cancel, id, contents)
            .unwrap_or_else(|e| panic!("can't put blob {id}: {e}"));
        assert_get(cancel, store, id, contents);
    }

    assert_list(cancel, store, "", &[blobs[0].0, blobs[1].0, blobs[2].0, blobs[3].0, blobs[4].0]);
    assert_list(cancel, store, "ab", &[blobs[0].0, blobs[2].0, blobs[3].0]);

    // Overwrite is idempotent.
    for (id, contents) in blobs {
        store
            .put_blob(cancel, id, contents)
            .unwrap_or_else(|e| panic!("can't overwrite blob {id}: {e}"));
        assert_get(cancel, store, id, contents);
    }

    store
        .delete_blob(cancel, blobs[0].0)
        .expect("delete failed");
    store
        .delete_blob(cancel, blobs[0].0)
        .expect("double delete must succeed");
    assert_get_not_found(cancel, store, blobs[0].0);

    assert_list(cancel, store, "ab", &[blobs[2].0, blobs[3].0]);
    assert_list(cancel, store, "", &[blobs[1].0, blobs[2].0, blobs[3].0, blobs[4].0]);
}

/// Verify that `connection_info` reconstructs an equivalent store.
pub fn assert_connection_info_round_trips(store: &dyn BlobStore) {
    let cancel = CancelToken::new();
    let info = store.connection_info();
    let reconnected = connect(&info).expect("connect from connection info");
    assert_eq!(
        reconnected.connection_info(),
        info,
        "connection info does not round-trip"
    );

    // The reconnected store observes the same namespace.
    store
        .put_blob(&cancel, "roundtrip-probe", b"probe")
        .expect("put probe");
    assert_get(&cancel, &reconnected, "roundtrip-probe", b"probe");
    store.delete_blob(&cancel, "roundtrip-probe").unwrap();
    reconnected.close().expect("close reconnected store");
}

fn assert_get(cancel: &CancelToken, store: &dyn BlobStore, id: &str, want: &[u8]) {
    let got = store
        .get_blob(cancel, id, 0, None)
        .unwrap_or_else(|e| panic!("get_blob({id}) failed: {e}"));
    assert_eq!(got, want, "wrong contents for blob {id}");
}

fn assert_get_not_found(cancel: &CancelToken, store: &dyn BlobStore, id: &str) {
    match store.get_blob(cancel, id, 0, None) {
        Err(e) if e.is_not_found() => {}
        Err(e) => panic!("get_blob({id}): expected not-found, got {e}"),
        Ok(data) => panic!("get_blob({id}): expected not-found, got {} bytes", data.len()),
    }
}

fn assert_list(cancel: &CancelToken, store: &dyn BlobStore, prefix: &str, want: &[&str]) {
    let got: BTreeSet<String> = list_all(store, cancel, prefix)
        .unwrap_or_else(|e| panic!("list_blobs({prefix:?}) failed: {e}"))
        .into_iter()
        .map(|m| m.id)
        .collect();
    let want: BTreeSet<String> = want.iter().map(|s| s.to_string()).collect();
    assert_eq!(got, want, "wrong listing for prefix {prefix:?}");
}
