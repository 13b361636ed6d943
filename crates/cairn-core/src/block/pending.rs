use std::collections::BTreeMap;

use cairn_types::ContentId;

use super::pack::{PackAssembly, PackTableEntry};
use super::{pick_winner, BlockInfo, TOMBSTONE_PACK_ID};

/// Outcome of probing the pending state for a content ID.
pub enum PendingLookup {
    /// The payload is staged and not shadowed by a tombstone.
    Found(Vec<u8>),
    /// A staged tombstone wins over any staged or committed entry.
    Deleted,
    /// The pending state knows nothing about this ID.
    Missing,
}

/// Staging area between flushes: closed pack assemblies, the pack currently
/// being filled, and tombstones awaiting publication.
pub struct PendingBlocks {
    max_pack_size: usize,
    closed: Vec<PackAssembly>,
    current: PackAssembly,
    tombstones: BTreeMap<ContentId, BlockInfo>,
}

/// Pending state detached for a flush; reinstalled on failure so the next
/// flush retries it.
pub struct FlushWork {
    pub packs: Vec<PackAssembly>,
    pub tombstones: Vec<BlockInfo>,
}

impl FlushWork {
    pub fn is_empty(&self) -> bool {
        self.packs.is_empty() && self.tombstones.is_empty()
    }
}

impl PendingBlocks {
    pub fn new(max_pack_size: usize) -> Self {
        PendingBlocks {
            max_pack_size,
            closed: Vec::new(),
            current: PackAssembly::new(),
            tombstones: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.current.is_empty() && self.tombstones.is_empty()
    }

    fn staged_entry(&self, block_id: &ContentId) -> Option<&PackTableEntry> {
        self.current.entry(block_id).or_else(|| {
            self.closed
                .iter()
                .rev()
                .find_map(|pack| pack.entry(block_id))
        })
    }

    fn staged_payload(&self, block_id: &ContentId) -> Option<&[u8]> {
        self.current.payload(block_id).or_else(|| {
            self.closed
                .iter()
                .rev()
                .find_map(|pack| pack.payload(block_id))
        })
    }

    /// Probe the pending state, resolving staged writes against staged
    /// tombstones by the standard precedence (tombstones win timestamp ties).
    pub fn lookup(&self, block_id: &ContentId) -> PendingLookup {
        let entry = self.staged_entry(block_id);
        let tombstone = self.tombstones.get(block_id);
        match (entry, tombstone) {
            (Some(e), Some(t)) => {
                if t.timestamp_seconds >= e.timestamp_seconds {
                    PendingLookup::Deleted
                } else {
                    PendingLookup::Found(self.staged_payload(block_id).unwrap_or_default().to_vec())
                }
            }
            (Some(_), None) => {
                PendingLookup::Found(self.staged_payload(block_id).unwrap_or_default().to_vec())
            }
            (None, Some(_)) => PendingLookup::Deleted,
            (None, None) => PendingLookup::Missing,
        }
    }

    /// Stage a payload. Rolls the current pack over when adding the payload
    /// would push it past the pack-size threshold.
    pub fn put(
        &mut self,
        block_id: ContentId,
        payload: &[u8],
        timestamp_seconds: u64,
        format_version: u8,
    ) {
        if self.staged_entry(&block_id).is_some() {
            return;
        }
        if !self.current.is_empty() && self.current.size() + payload.len() > self.max_pack_size {
            let full = std::mem::take(&mut self.current);
            self.closed.push(full);
        }
        self.current
            .add(block_id, payload, timestamp_seconds, format_version);
    }

    /// Stage a tombstone. `pack_file_hint` points at a pack the local state
    /// already references; without one the reserved synthetic ID is used.
    pub fn delete(
        &mut self,
        block_id: ContentId,
        timestamp_seconds: u64,
        pack_file_hint: Option<String>,
    ) {
        let pack_file = pack_file_hint.unwrap_or_else(|| TOMBSTONE_PACK_ID.to_string());
        let tombstone = BlockInfo::tombstone(block_id.clone(), pack_file, timestamp_seconds);
        match self.tombstones.get_mut(&block_id) {
            Some(existing) => {
                *existing = pick_winner(existing, &tombstone).clone();
            }
            None => {
                self.tombstones.insert(block_id, tombstone);
            }
        }
    }

    /// Infos for all staged payloads. The pack-file field is empty: these
    /// blocks have no pack until a flush assigns one.
    pub fn staged_infos(&self) -> Vec<BlockInfo> {
        self.closed
            .iter()
            .chain(std::iter::once(&self.current))
            .flat_map(|pack| pack.entries())
            .map(|e| BlockInfo {
                block_id: e.block_id.clone(),
                pack_file: String::new(),
                pack_offset: e.offset,
                length: e.length,
                timestamp_seconds: e.timestamp_seconds,
                format_version: e.format_version,
                deleted: false,
                payload: None,
            })
            .collect()
    }

    pub fn staged_tombstones(&self) -> Vec<BlockInfo> {
        self.tombstones.values().cloned().collect()
    }

    /// Detach everything staged so a flush can publish it without holding
    /// the pending lock.
    pub fn take_for_flush(&mut self) -> FlushWork {
        let mut packs = std::mem::take(&mut self.closed);
        let current = std::mem::take(&mut self.current);
        if !current.is_empty() {
            packs.push(current);
        }
        let tombstones = std::mem::take(&mut self.tombstones)
            .into_values()
            .collect();
        FlushWork { packs, tombstones }
    }

    /// Reinstall unpublished work after a failed flush, merging with any
    /// state staged in the meantime.
    pub fn restore(&mut self, work: FlushWork) {
        self.closed.extend(work.packs);
        for tombstone in work.tombstones {
            let id = tombstone.block_id.clone();
            match self.tombstones.get_mut(&id) {
                Some(existing) => {
                    *existing = pick_winner(existing, &tombstone).clone();
                }
                None => {
                    self.tombstones.insert(id, tombstone);
                }
            }
        }
    }
}
