pub mod committed;
pub mod index;
pub mod index_cache;
pub mod manager;
pub mod pack;
pub mod pending;

use std::cmp::Ordering;

use cairn_types::ContentId;

/// Namespace prefix of pack blobs in the blob store.
pub const PACK_BLOB_PREFIX: &str = "p";
/// Namespace prefix of index blobs in the blob store.
pub const INDEX_BLOB_PREFIX: &str = "n";

/// Synthetic pack-file ID carried by tombstones that reference no real pack.
/// Never dereferenced: tombstoned entries are reported as not-found before
/// any pack read happens.
pub const TOMBSTONE_PACK_ID: &str = "-";

/// Everything the index records about one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_id: ContentId,
    /// ID of the pack blob holding the payload. Never empty in a committed
    /// entry.
    pub pack_file: String,
    /// Payload offset inside the pack file.
    pub pack_offset: u32,
    /// Payload length in bytes.
    pub length: u32,
    /// Whole seconds since the Unix epoch.
    pub timestamp_seconds: u64,
    pub format_version: u8,
    pub deleted: bool,
    /// Inline payload. Not representable in the index format; its presence
    /// is rejected at encode time.
    pub payload: Option<Vec<u8>>,
}

impl BlockInfo {
    /// A tombstone for `block_id` at the given time.
    pub fn tombstone(block_id: ContentId, pack_file: String, timestamp_seconds: u64) -> Self {
        BlockInfo {
            block_id,
            pack_file,
            pack_offset: 0,
            length: 0,
            timestamp_seconds,
            format_version: 0,
            deleted: true,
            payload: None,
        }
    }
}

/// Total, deterministic precedence between two entries for the same content
/// ID: greater timestamp wins; on a timestamp tie a tombstone beats a live
/// entry; remaining ties fall back to a stable field comparison. Total
/// ordering makes index merging commutative and associative, which compaction
/// relies on.
pub fn merge_precedence(a: &BlockInfo, b: &BlockInfo) -> Ordering {
    a.timestamp_seconds
        .cmp(&b.timestamp_seconds)
        .then_with(|| a.deleted.cmp(&b.deleted))
        .then_with(|| a.pack_file.cmp(&b.pack_file))
        .then_with(|| a.pack_offset.cmp(&b.pack_offset))
        .then_with(|| a.length.cmp(&b.length))
}

/// Of two entries for the same content ID, pick the one that survives a
/// merge.
pub fn pick_winner<'a>(a: &'a BlockInfo, b: &'a BlockInfo) -> &'a BlockInfo {
    if merge_precedence(a, b) == Ordering::Less {
        b
    } else {
        a
    }
}
