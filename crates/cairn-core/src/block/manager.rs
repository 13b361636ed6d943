use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use cairn_storage::{list_all, BlobStore};
use cairn_types::{CairnError, CancelToken, ContentId, Result};

use super::committed::CommittedBlockIndex;
use super::index::{IndexBuilder, PackIndex};
use super::index_cache::IndexCache;
use super::pack::{
    content_address, decode_pack_table, parse_pack_footer, PackAssembly, PACK_FOOTER_SIZE,
};
use super::pending::{PendingBlocks, PendingLookup};
use super::{pick_winner, BlockInfo, INDEX_BLOB_PREFIX, PACK_BLOB_PREFIX};

/// Format version stamped on newly written blocks.
pub const CURRENT_BLOCK_FORMAT_VERSION: u8 = 1;

/// Index blobs below this size are candidates for compaction.
const SMALL_INDEX_BLOB_SIZE: u64 = 4 << 20;

const DEFAULT_MAX_PACK_SIZE: usize = 32 << 20;

/// Progress sink invoked around pack uploads with a description and
/// completed/total byte counts.
pub type ProgressFn = dyn Fn(&str, u64, u64) + Send + Sync;

#[derive(Clone, Default)]
pub struct FlushOptions {
    pub progress: Option<Arc<ProgressFn>>,
}

#[derive(Debug, Clone, Copy)]
pub struct CompactOptions {
    /// Compact only when at least this many small index blobs exist.
    pub min_small_blocks: usize,
    /// Merge at most this many small index blobs per call.
    pub max_small_blocks: usize,
}

#[derive(Debug, Clone)]
pub struct BlockManagerOptions {
    /// Pack rollover threshold in bytes.
    pub max_pack_size: usize,
}

impl Default for BlockManagerOptions {
    fn default() -> Self {
        BlockManagerOptions {
            max_pack_size: DEFAULT_MAX_PACK_SIZE,
        }
    }
}

/// Orchestrates put/get/delete/flush/compact/recover over a blob store.
///
/// Safe for concurrent use from multiple threads; flushes and compactions
/// are serialized per instance by an internal maintenance lock.
pub struct BlockManager {
    store: Arc<dyn BlobStore>,
    cache: Arc<dyn IndexCache>,
    committed: CommittedBlockIndex,
    pending: Mutex<PendingBlocks>,
    maintenance: Mutex<()>,
    max_pack_size: usize,
}

impl BlockManager {
    /// Load the active index set, warm the disk cache, and become ready.
    pub fn open(
        store: Arc<dyn BlobStore>,
        cache: Arc<dyn IndexCache>,
        options: BlockManagerOptions,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let committed = CommittedBlockIndex::new(Arc::clone(&cache));

        let active_ids: Vec<String> = list_all(store.as_ref(), cancel, INDEX_BLOB_PREFIX)?
            .into_iter()
            .map(|m| m.id)
            .collect();
        committed.load(cancel, store.as_ref(), &active_ids)?;
        debug!("loaded {} active index blobs", active_ids.len());

        if let Err(e) = cache.expire_unused(&active_ids) {
            warn!("index cache expiry failed: {e}");
        }

        Ok(BlockManager {
            store,
            cache,
            committed,
            pending: Mutex::new(PendingBlocks::new(options.max_pack_size)),
            maintenance: Mutex::new(()),
            max_pack_size: options.max_pack_size,
        })
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Stage a block. Content already stored (committed or pending) is
    /// deduplicated and the call returns immediately.
    pub fn put_block(&self, cancel: &CancelToken, block_id: &ContentId, payload: &[u8]) -> Result<()> {
        cancel.check()?;
        let mut pending = self.pending.lock().unwrap();
        match pending.lookup(block_id) {
            PendingLookup::Found(_) => return Ok(()),
            PendingLookup::Deleted => {
                // Rewrite after a staged delete: stage the payload again and
                // let last-writer-wins settle it.
            }
            PendingLookup::Missing => {
                if self.committed.lookup(block_id)?.is_some() {
                    return Ok(());
                }
            }
        }
        pending.put(
            block_id.clone(),
            payload,
            Self::now_secs(),
            CURRENT_BLOCK_FORMAT_VERSION,
        );
        Ok(())
    }

    /// Fetch a block's payload, checking pending state first, then the
    /// committed index and the owning pack blob.
    pub fn get_block(&self, cancel: &CancelToken, block_id: &ContentId) -> Result<Vec<u8>> {
        cancel.check()?;
        {
            let pending = self.pending.lock().unwrap();
            match pending.lookup(block_id) {
                PendingLookup::Found(payload) => return Ok(payload),
                PendingLookup::Deleted => return Err(CairnError::BlockNotFound),
                PendingLookup::Missing => {}
            }
        }

        let info = self
            .committed
            .lookup(block_id)?
            .ok_or(CairnError::BlockNotFound)?;
        let payload = self.store.get_blob(
            cancel,
            &info.pack_file,
            u64::from(info.pack_offset),
            Some(u64::from(info.length)),
        )?;
        if payload.len() != info.length as usize {
            return Err(CairnError::InvalidFormat(format!(
                "short read from pack {}: got {} bytes, want {}",
                info.pack_file,
                payload.len(),
                info.length
            )));
        }
        Ok(payload)
    }

    /// Stage a tombstone for a content ID.
    pub fn delete_block(&self, cancel: &CancelToken, block_id: &ContentId) -> Result<()> {
        cancel.check()?;
        let pack_hint = self.committed.lookup_raw(block_id)?.map(|i| i.pack_file);
        let mut pending = self.pending.lock().unwrap();
        pending.delete(block_id.clone(), Self::now_secs(), pack_hint);
        Ok(())
    }

    /// Live block infos with the given content-ID prefix, merged across
    /// committed and pending state.
    pub fn list_blocks(&self, cancel: &CancelToken, prefix: &str) -> Result<Vec<BlockInfo>> {
        cancel.check()?;
        let mut merged: BTreeMap<ContentId, BlockInfo> = self
            .committed
            .list(prefix)?
            .into_iter()
            .map(|info| (info.block_id.clone(), info))
            .collect();

        let pending = self.pending.lock().unwrap();
        for info in pending
            .staged_infos()
            .into_iter()
            .chain(pending.staged_tombstones())
        {
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
        Ok(merged.into_values().filter(|info| !info.deleted).collect())
    }

    /// Seal and upload all staged packs and publish index blobs for them.
    ///
    /// Publishing is at-least-once: a failure between the pack upload and
    /// the index upload leaves an orphan pack behind, reclaimable via
    /// `recover_index_from_pack_file`, and the unpublished remainder is
    /// reinstalled for the next flush.
    pub fn flush(&self, cancel: &CancelToken, options: &FlushOptions) -> Result<()> {
        let _serialize = self.maintenance.lock().unwrap();
        let mut work = self.pending.lock().unwrap().take_for_flush();
        if work.is_empty() {
            return Ok(());
        }

        if work.packs.is_empty() {
            // Tombstones with no packs still need publishing.
            let mut builder = IndexBuilder::new();
            for t in &work.tombstones {
                builder.add(t.clone());
            }
            return match self.publish_index(cancel, builder) {
                Ok(()) => Ok(()),
                Err(e) => {
                    self.pending.lock().unwrap().restore(work);
                    Err(e)
                }
            };
        }

        while !work.packs.is_empty() {
            let pack = work.packs.remove(0);
            if let Err(e) = self.publish_pack(cancel, &pack, &work.tombstones, options) {
                work.packs.insert(0, pack);
                self.pending.lock().unwrap().restore(work);
                return Err(e);
            }
        }
        Ok(())
    }

    fn publish_pack(
        &self,
        cancel: &CancelToken,
        pack: &PackAssembly,
        tombstones: &[BlockInfo],
        options: &FlushOptions,
    ) -> Result<()> {
        cancel.check()?;
        let pack_bytes = pack.seal()?;
        let pack_blob_id = content_address(PACK_BLOB_PREFIX, &pack_bytes);
        let total = pack_bytes.len() as u64;

        if let Some(progress) = &options.progress {
            progress(&pack_blob_id, 0, total);
        }
        self.store.put_blob(cancel, &pack_blob_id, &pack_bytes)?;
        if let Some(progress) = &options.progress {
            progress(&pack_blob_id, total, total);
        }

        let mut builder = IndexBuilder::new();
        for entry in pack.entries() {
            builder.add(BlockInfo {
                block_id: entry.block_id.clone(),
                pack_file: pack_blob_id.clone(),
                pack_offset: entry.offset,
                length: entry.length,
                timestamp_seconds: entry.timestamp_seconds,
                format_version: entry.format_version,
                deleted: false,
                payload: None,
            });
        }
        for t in tombstones {
            builder.add(t.clone());
        }
        self.publish_index(cancel, builder)
    }

    fn publish_index(&self, cancel: &CancelToken, builder: IndexBuilder) -> Result<()> {
        let index_bytes = builder.build_to_vec()?;
        let index_blob_id = content_address(INDEX_BLOB_PREFIX, &index_bytes);
        self.store.put_blob(cancel, &index_blob_id, &index_bytes)?;
        let index = self.install_index(&index_blob_id, index_bytes)?;
        self.committed.add_index_blob(&index_blob_id, index);
        Ok(())
    }

    /// Install index bytes into the cache, falling back to an in-memory
    /// copy when the cache cannot take them.
    fn install_index(&self, index_blob_id: &str, index_bytes: Vec<u8>) -> Result<Arc<PackIndex>> {
        match self.cache.add(index_blob_id, &index_bytes) {
            Ok(()) => match self.cache.open(index_blob_id) {
                Ok(index) => return Ok(Arc::new(index)),
                Err(e) => warn!("cannot reopen cached index {index_blob_id}: {e}"),
            },
            Err(e) => warn!("index cache write for {index_blob_id} failed, keeping in memory: {e}"),
        }
        Ok(Arc::new(PackIndex::from_bytes(index_bytes)?))
    }

    /// Rebuild index entries from a pack blob's embedded table.
    ///
    /// With `commit == false` the reconstructed infos are returned without
    /// any persistent change; with `commit == true` they are folded into a
    /// new index blob exactly as in a flush.
    pub fn recover_index_from_pack_file(
        &self,
        cancel: &CancelToken,
        pack_blob_id: &str,
        pack_length: u64,
        commit: bool,
    ) -> Result<Vec<BlockInfo>> {
        cancel.check()?;
        if pack_length < PACK_FOOTER_SIZE {
            return Err(CairnError::InvalidFormat(format!(
                "pack {pack_blob_id} too short for a footer: {pack_length} bytes"
            )));
        }

        let footer = self.store.get_blob(
            cancel,
            pack_blob_id,
            pack_length - PACK_FOOTER_SIZE,
            Some(PACK_FOOTER_SIZE),
        )?;
        let (table_offset, table_length) = parse_pack_footer(&footer)?;
        if table_offset
            .checked_add(table_length)
            .map_or(true, |end| end > pack_length - PACK_FOOTER_SIZE)
        {
            return Err(CairnError::InvalidFormat(format!(
                "pack {pack_blob_id} has an out-of-bounds embedded table"
            )));
        }

        let table = self
            .store
            .get_blob(cancel, pack_blob_id, table_offset, Some(table_length))?;
        if table.len() != table_length as usize {
            return Err(CairnError::InvalidFormat(format!(
                "short read of embedded table from {pack_blob_id}"
            )));
        }

        let infos: Vec<BlockInfo> = decode_pack_table(&table)?
            .into_iter()
            .map(|entry| BlockInfo {
                block_id: entry.block_id,
                pack_file: pack_blob_id.to_string(),
                pack_offset: entry.offset,
                length: entry.length,
                timestamp_seconds: entry.timestamp_seconds,
                format_version: entry.format_version,
                deleted: false,
                payload: None,
            })
            .collect();

        if commit {
            let _serialize = self.maintenance.lock().unwrap();
            let mut builder = IndexBuilder::new();
            for info in &infos {
                builder.add(info.clone());
            }
            self.publish_index(cancel, builder)?;
        }

        debug!("recovered {} blocks from {pack_blob_id}", infos.len());
        Ok(infos)
    }

    /// Merge small index blobs into one. The merged blob is committed into
    /// the active set before the superseded blobs are deleted, so readers
    /// never observe a gap.
    pub fn compact_indexes(&self, cancel: &CancelToken, options: CompactOptions) -> Result<()> {
        let _serialize = self.maintenance.lock().unwrap();
        cancel.check()?;

        let listed = list_all(self.store.as_ref(), cancel, INDEX_BLOB_PREFIX)?;
        let mut small: Vec<_> = listed
            .iter()
            .filter(|m| m.length < SMALL_INDEX_BLOB_SIZE)
            .map(|m| m.id.clone())
            .collect();
        small.sort();

        if small.is_empty() || small.len() < options.min_small_blocks {
            return Ok(());
        }
        let to_merge: Vec<String> = small
            .into_iter()
            .take(options.max_small_blocks.max(1))
            .collect();

        // Tombstones may only be dropped when no older index survives the
        // merge, i.e. when every index blob on the store is being subsumed.
        let drop_tombstones = to_merge.len() == listed.len();

        let mut builder = IndexBuilder::new();
        for blob_id in &to_merge {
            let index = self
                .committed
                .open_index_blob(cancel, self.store.as_ref(), blob_id)?;
            for info in index.iter() {
                builder.add(info?);
            }
        }
        if drop_tombstones {
            builder.retain_live();
        }

        if builder.is_empty() {
            self.committed.replace(&to_merge, None);
            for blob_id in &to_merge {
                self.store.delete_blob(cancel, blob_id)?;
            }
            return Ok(());
        }

        let merged_bytes = builder.build_to_vec()?;
        let merged_id = content_address(INDEX_BLOB_PREFIX, &merged_bytes);
        if to_merge.len() == 1 && to_merge[0] == merged_id {
            // Rewriting a single blob reproduces identical content.
            return Ok(());
        }

        self.store.put_blob(cancel, &merged_id, &merged_bytes)?;
        let merged_index = self.install_index(&merged_id, merged_bytes)?;
        self.committed
            .replace(&to_merge, Some((merged_id.clone(), merged_index)));

        for blob_id in &to_merge {
            if *blob_id != merged_id {
                self.store.delete_blob(cancel, blob_id)?;
            }
        }
        Ok(())
    }

    /// Discard pending state. Callers are expected to flush first.
    pub fn close(&self) -> Result<()> {
        let mut pending = self.pending.lock().unwrap();
        if !pending.is_empty() {
            warn!("closing block manager with unflushed pending state");
        }
        *pending = PendingBlocks::new(self.max_pack_size);
        Ok(())
    }
}
