//! In-memory assembly of pack blobs and their on-disk framing.
//!
//! A pack blob is the concatenation of raw block payloads in insertion
//! order, followed by a self-describing table of the entries it contains and
//! a fixed footer locating that table:
//!
//! ```text
//! payload_0 .. payload_k | embedded table | footer(table_offset u64 BE, table_length u64 BE)
//! ```
//!
//! The embedded table alone suffices to rebuild index entries for the pack,
//! which is what the recovery path relies on when index blobs are lost.

use std::collections::HashMap;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use cairn_types::{CairnError, ContentId, Result};

/// Size of the trailing pack footer.
pub const PACK_FOOTER_SIZE: u64 = 16;

type Blake2b256 = Blake2b<U32>;

/// Derive a blob ID from finished blob bytes under a namespace prefix.
/// Content addressing keeps uploads idempotent: identical bytes always get
/// the same ID.
pub fn content_address(prefix: &str, bytes: &[u8]) -> String {
    let digest = Blake2b256::digest(bytes);
    format!("{prefix}{}", hex::encode(digest))
}

/// One row of the embedded pack table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackTableEntry {
    pub block_id: ContentId,
    pub offset: u32,
    pub length: u32,
    pub timestamp_seconds: u64,
    pub format_version: u8,
}

/// A pack being assembled in memory. Immutable once sealed; the pack blob ID
/// is derived from the sealed bytes.
pub struct PackAssembly {
    buffer: Vec<u8>,
    entries: Vec<PackTableEntry>,
    by_id: HashMap<ContentId, usize>,
}

impl PackAssembly {
    pub fn new() -> Self {
        PackAssembly {
            buffer: Vec::new(),
            entries: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Accumulated payload bytes.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn contains(&self, block_id: &ContentId) -> bool {
        self.by_id.contains_key(block_id)
    }

    pub fn entry(&self, block_id: &ContentId) -> Option<&PackTableEntry> {
        self.by_id.get(block_id).map(|&i| &self.entries[i])
    }

    /// The staged payload for a block, straight from the assembly buffer.
    pub fn payload(&self, block_id: &ContentId) -> Option<&[u8]> {
        self.entry(block_id).map(|e| {
            &self.buffer[e.offset as usize..(e.offset + e.length) as usize]
        })
    }

    pub fn entries(&self) -> &[PackTableEntry] {
        &self.entries
    }

    /// Append a payload, recording its offset. The caller ensures the ID is
    /// not already present.
    pub fn add(
        &mut self,
        block_id: ContentId,
        payload: &[u8],
        timestamp_seconds: u64,
        format_version: u8,
    ) {
        let entry = PackTableEntry {
            block_id: block_id.clone(),
            offset: self.buffer.len() as u32,
            length: payload.len() as u32,
            timestamp_seconds,
            format_version,
        };
        self.buffer.extend_from_slice(payload);
        self.by_id.insert(block_id, self.entries.len());
        self.entries.push(entry);
    }

    /// Produce the final pack blob bytes: payloads, embedded table, footer.
    pub fn seal(&self) -> Result<Vec<u8>> {
        if self.entries.is_empty() {
            return Err(CairnError::Internal("cannot seal an empty pack".into()));
        }
        let table = rmp_serde::to_vec(&self.entries)?;
        let table_offset = self.buffer.len() as u64;

        let mut bytes = Vec::with_capacity(self.buffer.len() + table.len() + 16);
        bytes.extend_from_slice(&self.buffer);
        bytes.extend_from_slice(&table);
        bytes.extend_from_slice(&table_offset.to_be_bytes());
        bytes.extend_from_slice(&(table.len() as u64).to_be_bytes());
        Ok(bytes)
    }
}

impl Default for PackAssembly {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the 16-byte footer into `(table_offset, table_length)`.
pub fn parse_pack_footer(footer: &[u8]) -> Result<(u64, u64)> {
    if footer.len() != PACK_FOOTER_SIZE as usize {
        return Err(CairnError::InvalidFormat(format!(
            "pack footer has {} bytes, expected {PACK_FOOTER_SIZE}",
            footer.len()
        )));
    }
    let table_offset = u64::from_be_bytes(footer[0..8].try_into().unwrap());
    let table_length = u64::from_be_bytes(footer[8..16].try_into().unwrap());
    Ok((table_offset, table_length))
}

/// Decode an embedded pack table.
pub fn decode_pack_table(bytes: &[u8]) -> Result<Vec<PackTableEntry>> {
    Ok(rmp_serde::from_slice(bytes)?)
}
