pub mod hashing;
pub mod reader;
pub mod splitter;
pub mod writer;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cairn_types::{CancelToken, ContentId, ObjectId, Result};

use crate::block::manager::BlockManager;

use self::hashing::BlockHasher;
use self::reader::ObjectReader;
use self::writer::ObjectWriter;

/// One span of an indirect object: `length` bytes at stream `offset`,
/// stored under `block_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectEntry {
    pub offset: u64,
    pub length: u64,
    pub block_id: ContentId,
}

/// Writes and reads objects on top of the block manager: splits streams
/// into blocks, derives content IDs with the repository's keyed hash, and
/// stitches multi-block objects together through indirect index blocks.
pub struct ObjectManager {
    blocks: Arc<BlockManager>,
    hasher: BlockHasher,
    max_block_size: usize,
}

impl ObjectManager {
    pub fn new(blocks: Arc<BlockManager>, hasher: BlockHasher, max_block_size: usize) -> Self {
        ObjectManager {
            blocks,
            hasher,
            max_block_size,
        }
    }

    pub fn blocks(&self) -> &Arc<BlockManager> {
        &self.blocks
    }

    pub(crate) fn hasher(&self) -> &BlockHasher {
        &self.hasher
    }

    pub(crate) fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Start writing a new object.
    pub fn new_writer(&self, cancel: &CancelToken) -> ObjectWriter<'_> {
        ObjectWriter::new(self, cancel.clone())
    }

    /// Open a stored object for reading and seeking.
    pub fn open(&self, cancel: &CancelToken, object_id: &ObjectId) -> Result<ObjectReader<'_>> {
        ObjectReader::open(self, cancel.clone(), object_id)
    }
}
