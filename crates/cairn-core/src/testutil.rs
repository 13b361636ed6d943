use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use cairn_storage::memory::MemoryStore;
use cairn_storage::{list_all, BlobStore};
use cairn_types::{CancelToken, ContentId};

use crate::block::index_cache::MemoryIndexCache;
use crate::block::manager::{BlockManager, BlockManagerOptions};
use crate::object::hashing::BlockHasher;
use crate::repo::{OpenOptions, Repository, RepositoryFormat};

/// Content ID derived with the default hasher and an empty secret, the way
/// the object layer does it.
pub fn test_content_id(payload: &[u8]) -> ContentId {
    BlockHasher::new(Default::default(), Vec::new()).content_id(payload)
}

/// Deterministic pseudo-random payload.
pub fn seeded_random_data(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

/// Open a block manager over the given store with an in-memory index cache.
pub fn open_manager(store: &Arc<dyn BlobStore>, max_pack_size: usize) -> BlockManager {
    BlockManager::open(
        Arc::clone(store),
        Arc::new(MemoryIndexCache::new()),
        BlockManagerOptions { max_pack_size },
        &CancelToken::new(),
    )
    .expect("failed to open test block manager")
}

/// Fresh in-memory store plus a block manager over it.
pub fn new_test_manager(max_pack_size: usize) -> (Arc<dyn BlobStore>, BlockManager) {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
    let manager = open_manager(&store, max_pack_size);
    (store, manager)
}

/// Count blobs with the given ID prefix.
pub fn count_blobs(store: &Arc<dyn BlobStore>, prefix: &str) -> usize {
    list_all(store.as_ref(), &CancelToken::new(), prefix)
        .expect("list failed")
        .len()
}

/// Initialize a repository over a fresh in-memory store with a memory-only
/// index cache.
pub fn memory_repository(format: RepositoryFormat) -> Repository {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
    Repository::initialize(
        store,
        format,
        OpenOptions {
            disable_disk_cache: true,
            ..Default::default()
        },
        &CancelToken::new(),
    )
    .expect("failed to init test repository")
}

/// Reopen a repository over the same store (fresh manager, fresh cache).
pub fn reopen_repository(repo: &Repository) -> Repository {
    Repository::open(
        Arc::clone(repo.store()),
        OpenOptions {
            disable_disk_cache: true,
            ..Default::default()
        },
        &CancelToken::new(),
    )
    .expect("failed to reopen test repository")
}
