use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use cairn_storage::BlobStore;
use cairn_types::{CancelToken, ContentId, Result};

use super::index::PackIndex;
use super::index_cache::IndexCache;
use super::{pick_winner, BlockInfo};

/// The union of the active index blobs, answering point lookups with
/// newest-wins resolution and honoring tombstones.
///
/// The active set is held as an immutable snapshot behind a lock; readers
/// clone the `Arc` and probe without holding the lock, so lookups never
/// block writers during I/O.
pub struct CommittedBlockIndex {
    cache: Arc<dyn IndexCache>,
    snapshot: RwLock<Arc<Snapshot>>,
}

struct Snapshot {
    indexes: Vec<LoadedIndex>,
}

struct LoadedIndex {
    blob_id: String,
    index: Arc<PackIndex>,
}

impl CommittedBlockIndex {
    pub fn new(cache: Arc<dyn IndexCache>) -> Self {
        CommittedBlockIndex {
            cache,
            snapshot: RwLock::new(Arc::new(Snapshot {
                indexes: Vec::new(),
            })),
        }
    }

    /// Open one index blob through the cache, fetching it from the blob
    /// store on a cache miss. A failing cache install degrades to an
    /// in-memory copy.
    pub fn open_index_blob(
        &self,
        cancel: &CancelToken,
        store: &dyn BlobStore,
        blob_id: &str,
    ) -> Result<Arc<PackIndex>> {
        if self.cache.has(blob_id)? {
            return Ok(Arc::new(self.cache.open(blob_id)?));
        }

        let data = store.get_blob(cancel, blob_id, 0, None)?;
        match self.cache.add(blob_id, &data) {
            Ok(()) => match self.cache.open(blob_id) {
                Ok(index) => Ok(Arc::new(index)),
                Err(e) => {
                    warn!("cannot reopen freshly cached index {blob_id}: {e}");
                    Ok(Arc::new(PackIndex::from_bytes(data)?))
                }
            },
            Err(e) => {
                warn!("index cache write for {blob_id} failed, keeping in memory: {e}");
                Ok(Arc::new(PackIndex::from_bytes(data)?))
            }
        }
    }

    /// Replace the active set with the given index blob IDs, loading each
    /// through the cache.
    pub fn load(
        &self,
        cancel: &CancelToken,
        store: &dyn BlobStore,
        blob_ids: &[String],
    ) -> Result<()> {
        let mut indexes = Vec::with_capacity(blob_ids.len());
        for blob_id in blob_ids {
            cancel.check()?;
            indexes.push(LoadedIndex {
                blob_id: blob_id.clone(),
                index: self.open_index_blob(cancel, store, blob_id)?,
            });
        }
        *self.snapshot.write().unwrap() = Arc::new(Snapshot { indexes });
        Ok(())
    }

    /// Atomically append a newly committed index blob to the active set.
    pub fn add_index_blob(&self, blob_id: &str, index: Arc<PackIndex>) {
        let mut guard = self.snapshot.write().unwrap();
        if guard.indexes.iter().any(|ix| ix.blob_id == blob_id) {
            return;
        }
        let mut indexes: Vec<LoadedIndex> = guard
            .indexes
            .iter()
            .map(|ix| LoadedIndex {
                blob_id: ix.blob_id.clone(),
                index: Arc::clone(&ix.index),
            })
            .collect();
        indexes.push(LoadedIndex {
            blob_id: blob_id.to_string(),
            index,
        });
        *guard = Arc::new(Snapshot { indexes });
    }

    /// Swap superseded index blobs for their merged replacement in a single
    /// snapshot update, so readers never observe a gap.
    pub fn replace(&self, superseded: &[String], merged: Option<(String, Arc<PackIndex>)>) {
        let mut guard = self.snapshot.write().unwrap();
        let mut indexes: Vec<LoadedIndex> = guard
            .indexes
            .iter()
            .filter(|ix| !superseded.contains(&ix.blob_id))
            .map(|ix| LoadedIndex {
                blob_id: ix.blob_id.clone(),
                index: Arc::clone(&ix.index),
            })
            .collect();
        if let Some((blob_id, index)) = merged {
            if !indexes.iter().any(|ix| ix.blob_id == blob_id) {
                indexes.push(LoadedIndex { blob_id, index });
            }
        }
        *guard = Arc::new(Snapshot { indexes });
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.snapshot
            .read()
            .unwrap()
            .indexes
            .iter()
            .map(|ix| ix.blob_id.clone())
            .collect()
    }

    /// Resolve a content ID across all active indexes, tombstones included.
    pub fn lookup_raw(&self, block_id: &ContentId) -> Result<Option<BlockInfo>> {
        let snapshot = Arc::clone(&self.snapshot.read().unwrap());
        let mut winner: Option<BlockInfo> = None;
        for ix in &snapshot.indexes {
            if let Some(info) = ix.index.get(block_id)? {
                winner = Some(match winner {
                    Some(current) => pick_winner(&current, &info).clone(),
                    None => info,
                });
            }
        }
        Ok(winner)
    }

    /// Resolve a content ID to its live entry; tombstoned IDs are not found.
    pub fn lookup(&self, block_id: &ContentId) -> Result<Option<BlockInfo>> {
        Ok(self.lookup_raw(block_id)?.filter(|info| !info.deleted))
    }

    /// All live entries whose content ID starts with `prefix`, merged across
    /// the active indexes with the standard precedence.
    pub fn list(&self, prefix: &str) -> Result<Vec<BlockInfo>> {
        let snapshot = Arc::clone(&self.snapshot.read().unwrap());
        let mut merged: BTreeMap<ContentId, BlockInfo> = BTreeMap::new();
        for ix in &snapshot.indexes {
            for info in ix.index.iter() {
                let info = info?;
                if !info.block_id.as_str().starts_with(prefix) {
                    continue;
                }
                match merged.get_mut(&info.block_id) {
                    Some(existing) => {
                        *existing = pick_winner(existing, &info).clone();
                    }
                    None => {
                        merged.insert(info.block_id.clone(), info);
                    }
                }
            }
        }
        Ok(merged.into_values().filter(|info| !info.deleted).collect())
    }
}
