//! Binary codec for one immutable, sorted `content ID -> location` map.
//!
//! Layout (big-endian throughout):
//!
//! ```text
//! header  : version u8 | key_length u8 | entry_length u16 | entry_count u32
//! entries : entry_count * (key bytes | 20-byte body), sorted by key
//! body    : timestamp_and_flags u64 | pack_file_offset u32
//!           | packed_offset u32 (high bit = deleted) | packed_length u32
//! extra   : referenced pack-file-ID strings, deduplicated, first-seen order
//! ```
//!
//! `timestamp_and_flags` packs the timestamp seconds into the high 48 bits,
//! the format version into the next 8, and the length of the referenced
//! pack-file-ID string into the low 8. `pack_file_offset` is absolute from
//! the start of the blob.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io::Write;

use cairn_types::{CairnError, ContentId, Result};

use super::{merge_precedence, BlockInfo};

pub const INDEX_FORMAT_VERSION: u8 = 1;

const HEADER_SIZE: usize = 8;
const ENTRY_BODY_SIZE: usize = 20;
const DELETED_FLAG: u32 = 0x8000_0000;
const MAX_TIMESTAMP: u64 = (1 << 48) - 1;

/// Accumulates block infos for one index blob, resolving duplicate content
/// IDs by last-writer-wins as they are added.
#[derive(Default)]
pub struct IndexBuilder {
    entries: BTreeMap<ContentId, BlockInfo>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, keeping the winner if the content ID is already present.
    pub fn add(&mut self, info: BlockInfo) {
        match self.entries.get_mut(&info.block_id) {
            Some(existing) => {
                if merge_precedence(&info, existing) == std::cmp::Ordering::Greater {
                    *existing = info;
                }
            }
            None => {
                self.entries.insert(info.block_id.clone(), info);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn infos(&self) -> impl Iterator<Item = &BlockInfo> {
        self.entries.values()
    }

    /// Drop all tombstones. Used by compaction when every older index is
    /// being subsumed by the merge.
    pub fn retain_live(&mut self) {
        self.entries.retain(|_, info| !info.deleted);
    }

    /// Serialize the index and write it out in one fully buffered flush.
    pub fn build(&self, output: &mut impl Write) -> Result<()> {
        let buf = self.build_to_vec()?;
        output.write_all(&buf)?;
        Ok(())
    }

    pub fn build_to_vec(&self) -> Result<Vec<u8>> {
        let mut key_length = 0usize;
        let mut keys = Vec::with_capacity(self.entries.len());

        for info in self.entries.values() {
            if info.payload.is_some() {
                return Err(CairnError::InvalidFormat(format!(
                    "inline payload for {} cannot be stored in an index",
                    info.block_id
                )));
            }
            if info.pack_file.is_empty() {
                return Err(CairnError::Internal(format!(
                    "empty pack file ID for {}",
                    info.block_id
                )));
            }
            if info.pack_file.len() > u8::MAX as usize {
                return Err(CairnError::InvalidFormat(format!(
                    "pack file ID too long: {} bytes",
                    info.pack_file.len()
                )));
            }
            if info.timestamp_seconds > MAX_TIMESTAMP {
                return Err(CairnError::InvalidFormat(format!(
                    "timestamp {} does not fit in 48 bits",
                    info.timestamp_seconds
                )));
            }
            if info.pack_offset & DELETED_FLAG != 0 {
                return Err(CairnError::InvalidFormat(format!(
                    "pack offset {} exceeds 31 bits",
                    info.pack_offset
                )));
            }
            let key = info.block_id.index_key();
            if key_length == 0 {
                key_length = key.len();
            } else if key.len() != key_length {
                return Err(CairnError::InvalidFormat(format!(
                    "inconsistent key length: {} vs {}",
                    key.len(),
                    key_length
                )));
            }
            keys.push(key);
        }

        let entry_count = self.entries.len();
        let extra_data_offset = HEADER_SIZE + entry_count * (key_length + ENTRY_BODY_SIZE);

        // Deduplicate pack-file-ID strings in first-seen order.
        let mut pack_file_offsets: HashMap<&str, u32> = HashMap::new();
        let mut extra_data: Vec<u8> = Vec::new();
        for info in self.entries.values() {
            pack_file_offsets
                .entry(info.pack_file.as_str())
                .or_insert_with(|| {
                    let off = extra_data.len() as u32;
                    extra_data.extend_from_slice(info.pack_file.as_bytes());
                    off
                });
        }

        let mut buf =
            Vec::with_capacity(extra_data_offset + extra_data.len());
        buf.push(INDEX_FORMAT_VERSION);
        buf.push(key_length as u8);
        buf.extend_from_slice(&(ENTRY_BODY_SIZE as u16).to_be_bytes());
        buf.extend_from_slice(&(entry_count as u32).to_be_bytes());

        for (info, key) in self.entries.values().zip(&keys) {
            buf.extend_from_slice(key);

            let timestamp_and_flags = (info.timestamp_seconds << 16)
                | u64::from(info.format_version) << 8
                | info.pack_file.len() as u64;
            buf.extend_from_slice(&timestamp_and_flags.to_be_bytes());

            let pack_file_offset =
                extra_data_offset as u32 + pack_file_offsets[info.pack_file.as_str()];
            buf.extend_from_slice(&pack_file_offset.to_be_bytes());

            let packed_offset = if info.deleted {
                info.pack_offset | DELETED_FLAG
            } else {
                info.pack_offset
            };
            buf.extend_from_slice(&packed_offset.to_be_bytes());
            buf.extend_from_slice(&info.length.to_be_bytes());
        }

        buf.extend_from_slice(&extra_data);
        Ok(buf)
    }
}

/// Backing bytes of an opened index: a mapped cache file or an owned buffer.
pub enum IndexData {
    Mapped(memmap2::Mmap),
    Owned(Vec<u8>),
}

impl IndexData {
    fn bytes(&self) -> &[u8] {
        match self {
            IndexData::Mapped(m) => m,
            IndexData::Owned(v) => v,
        }
    }
}

/// Read-only view over one encoded index blob. Point lookups binary-search
/// the fixed-width entry table; pack-file-ID strings are read lazily from
/// the extra-data section.
pub struct PackIndex {
    data: IndexData,
    key_length: usize,
    entry_count: usize,
}

impl PackIndex {
    pub fn open(data: IndexData) -> Result<Self> {
        let bytes = data.bytes();
        if bytes.len() < HEADER_SIZE {
            return Err(CairnError::InvalidFormat(format!(
                "index too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != INDEX_FORMAT_VERSION {
            return Err(CairnError::UnsupportedVersion(bytes[0]));
        }
        let key_length = bytes[1] as usize;
        let entry_length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let entry_count = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

        if entry_length != ENTRY_BODY_SIZE {
            return Err(CairnError::InvalidFormat(format!(
                "unexpected entry length: {entry_length}"
            )));
        }
        if entry_count > 0 && key_length < 2 {
            return Err(CairnError::InvalidFormat(format!(
                "invalid key length: {key_length}"
            )));
        }
        let table_size = entry_count
            .checked_mul(key_length + ENTRY_BODY_SIZE)
            .and_then(|s| s.checked_add(HEADER_SIZE))
            .ok_or_else(|| CairnError::InvalidFormat("index entry table overflows".into()))?;
        if table_size > bytes.len() {
            return Err(CairnError::InvalidFormat(format!(
                "index truncated: {} bytes, {entry_count} entries need {table_size}",
                bytes.len()
            )));
        }

        Ok(PackIndex {
            data,
            key_length,
            entry_count,
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::open(IndexData::Owned(bytes))
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    /// Point lookup by content ID. O(log n) over the fixed-width entries.
    pub fn get(&self, block_id: &ContentId) -> Result<Option<BlockInfo>> {
        let key = block_id.index_key();
        if key.len() != self.key_length {
            return Ok(None);
        }

        let mut lo = 0usize;
        let mut hi = self.entry_count;
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.key_at(mid).cmp(key.as_slice()) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return self.decode_entry(mid).map(Some),
            }
        }
        Ok(None)
    }

    /// Iterate all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = Result<BlockInfo>> + '_ {
        (0..self.entry_count).map(|i| self.decode_entry(i))
    }

    fn entry_stride(&self) -> usize {
        self.key_length + ENTRY_BODY_SIZE
    }

    fn key_at(&self, i: usize) -> &[u8] {
        let start = HEADER_SIZE + i * self.entry_stride();
        &self.data.bytes()[start..start + self.key_length]
    }

    fn decode_entry(&self, i: usize) -> Result<BlockInfo> {
        let bytes = self.data.bytes();
        let body_start = HEADER_SIZE + i * self.entry_stride() + self.key_length;
        let body = &bytes[body_start..body_start + ENTRY_BODY_SIZE];

        let block_id = ContentId::from_index_key(self.key_at(i))?;

        let timestamp_and_flags = u64::from_be_bytes(body[0..8].try_into().unwrap());
        let timestamp_seconds = timestamp_and_flags >> 16;
        let format_version = (timestamp_and_flags >> 8) as u8;
        let pack_file_length = (timestamp_and_flags & 0xff) as usize;

        let pack_file_offset = u32::from_be_bytes(body[8..12].try_into().unwrap()) as usize;
        let packed_offset = u32::from_be_bytes(body[12..16].try_into().unwrap());
        let length = u32::from_be_bytes(body[16..20].try_into().unwrap());

        if pack_file_length == 0 {
            return Err(CairnError::InvalidFormat(format!(
                "entry for {block_id} references an empty pack file ID"
            )));
        }
        let pack_file_end = pack_file_offset
            .checked_add(pack_file_length)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| {
                CairnError::InvalidFormat(format!(
                    "pack file reference for {block_id} is out of bounds"
                ))
            })?;
        let pack_file = std::str::from_utf8(&bytes[pack_file_offset..pack_file_end])
            .map_err(|_| {
                CairnError::InvalidFormat(format!(
                    "pack file reference for {block_id} is not valid UTF-8"
                ))
            })?
            .to_string();

        Ok(BlockInfo {
            block_id,
            pack_file,
            pack_offset: packed_offset & !DELETED_FLAG,
            length,
            timestamp_seconds,
            format_version,
            deleted: packed_offset & DELETED_FLAG != 0,
            payload: None,
        })
    }
}
