use std::path::PathBuf;
use std::sync::Arc;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use cairn_storage::BlobStore;
use cairn_types::{CairnError, CancelToken, Result};

use crate::block::index_cache::{default_cache_dir, DiskIndexCache, IndexCache, MemoryIndexCache};
use crate::block::manager::{BlockManager, BlockManagerOptions, FlushOptions};
use crate::object::hashing::{BlockHasher, HashAlgorithm};
use crate::object::ObjectManager;

/// Well-known blob holding the serialized repository format.
pub const FORMAT_BLOB_ID: &str = "cairn.repository";

pub const REPOSITORY_VERSION: u32 = 1;

const DEFAULT_MAX_BLOCK_SIZE: u32 = 4 << 20;
const DEFAULT_MAX_PACK_SIZE: u32 = 32 << 20;

/// Persisted, unencrypted description of how a repository derives content
/// IDs and sizes its blocks and packs. Written once at initialization and
/// read back on every open, so every session addresses content identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFormat {
    pub version: u32,
    /// Random identifier scoping local caches to this repository.
    pub unique_id: Vec<u8>,
    pub hash: HashAlgorithm,
    pub hmac_secret: Vec<u8>,
    pub max_block_size: u32,
    pub max_pack_size: u32,
}

impl Default for RepositoryFormat {
    fn default() -> Self {
        let mut unique_id = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut unique_id);
        RepositoryFormat {
            version: REPOSITORY_VERSION,
            unique_id,
            hash: HashAlgorithm::default(),
            hmac_secret: Vec::new(),
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            max_pack_size: DEFAULT_MAX_PACK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Index cache directory. Defaults to a per-repository directory under
    /// the platform cache root.
    pub cache_dir: Option<PathBuf>,
    /// Keep the index cache in memory only.
    pub disable_disk_cache: bool,
}

/// A handle to an opened repository: blob store, block manager, and object
/// layer wired together.
pub struct Repository {
    store: Arc<dyn BlobStore>,
    pub blocks: Arc<BlockManager>,
    pub objects: ObjectManager,
    pub format: RepositoryFormat,
}

impl Repository {
    /// Create a repository on an empty store and open it.
    pub fn initialize(
        store: Arc<dyn BlobStore>,
        format: RepositoryFormat,
        options: OpenOptions,
        cancel: &CancelToken,
    ) -> Result<Self> {
        match store.get_blob(cancel, FORMAT_BLOB_ID, 0, None) {
            Ok(_) => return Err(CairnError::RepositoryAlreadyExists),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        if format.version != REPOSITORY_VERSION {
            return Err(CairnError::Config(format!(
                "unsupported repository version {}",
                format.version
            )));
        }
        store.put_blob(cancel, FORMAT_BLOB_ID, &rmp_serde::to_vec(&format)?)?;
        Self::open_with_format(store, format, options, cancel)
    }

    /// Open an existing repository by reading its format blob.
    pub fn open(
        store: Arc<dyn BlobStore>,
        options: OpenOptions,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let data = match store.get_blob(cancel, FORMAT_BLOB_ID, 0, None) {
            Ok(d) => d,
            Err(e) if e.is_not_found() => return Err(CairnError::RepositoryNotFound),
            Err(e) => return Err(e),
        };
        let format: RepositoryFormat = rmp_serde::from_slice(&data)?;
        if format.version != REPOSITORY_VERSION {
            return Err(CairnError::Config(format!(
                "unsupported repository version {}",
                format.version
            )));
        }
        Self::open_with_format(store, format, options, cancel)
    }

    fn open_with_format(
        store: Arc<dyn BlobStore>,
        format: RepositoryFormat,
        options: OpenOptions,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let cache: Arc<dyn IndexCache> = if options.disable_disk_cache {
            Arc::new(MemoryIndexCache::new())
        } else {
            match options
                .cache_dir
                .clone()
                .or_else(|| default_cache_dir(&format.unique_id))
            {
                Some(dir) => Arc::new(DiskIndexCache::new(dir)),
                None => Arc::new(MemoryIndexCache::new()),
            }
        };

        let blocks = Arc::new(BlockManager::open(
            Arc::clone(&store),
            cache,
            BlockManagerOptions {
                max_pack_size: format.max_pack_size as usize,
            },
            cancel,
        )?);
        let hasher = BlockHasher::new(format.hash, format.hmac_secret.clone());
        let objects = ObjectManager::new(Arc::clone(&blocks), hasher, format.max_block_size as usize);

        Ok(Repository {
            store,
            blocks,
            objects,
            format,
        })
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Publish all staged blocks and tombstones.
    pub fn flush(&self, cancel: &CancelToken) -> Result<()> {
        self.blocks.flush(cancel, &FlushOptions::default())
    }

    /// Drop pending state and release the store. Callers flush first;
    /// unflushed pending state is discarded.
    pub fn close(&self) -> Result<()> {
        self.blocks.close()?;
        self.store.close()
    }
}
