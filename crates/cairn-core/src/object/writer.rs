use cairn_types::{CancelToken, ObjectId, Result};

use super::splitter::FixedSplitter;
use super::{IndirectEntry, ObjectManager};

/// Accumulates a written stream and emits completed blocks through the
/// block manager. `result` finalizes the object and returns its ID; writing
/// the same bytes always yields the same ID.
pub struct ObjectWriter<'m> {
    manager: &'m ObjectManager,
    cancel: CancelToken,
    splitter: FixedSplitter,
    spans: Vec<IndirectEntry>,
    written: u64,
}

impl<'m> ObjectWriter<'m> {
    pub(super) fn new(manager: &'m ObjectManager, cancel: CancelToken) -> Self {
        ObjectWriter {
            manager,
            cancel,
            splitter: FixedSplitter::new(manager.max_block_size()),
            spans: Vec::new(),
            written: 0,
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let manager = self.manager;
        let cancel = &self.cancel;
        let spans = &mut self.spans;
        let written = &mut self.written;
        self.splitter
            .push(data, |block| emit_block(manager, cancel, spans, written, block))
    }

    /// Finish the object and return its ID.
    ///
    /// Single-block objects (including the empty object) are direct: their
    /// ID is the block's content ID. Larger objects store their span list as
    /// an indirect index block.
    pub fn result(mut self) -> Result<ObjectId> {
        let manager = self.manager;
        let cancel = &self.cancel;
        let spans = &mut self.spans;
        let written = &mut self.written;
        self.splitter
            .finish(|block| emit_block(manager, cancel, spans, written, block))?;

        match self.spans.len() {
            0 => {
                // Empty object: a single empty block.
                let block_id = self.manager.hasher().content_id(b"");
                self.manager
                    .blocks()
                    .put_block(&self.cancel, &block_id, b"")?;
                Ok(ObjectId::Direct(block_id))
            }
            1 => Ok(ObjectId::Direct(self.spans.remove(0).block_id)),
            _ => {
                let index_bytes = rmp_serde::to_vec(&self.spans)?;
                let block_id = self.manager.hasher().content_id(&index_bytes);
                self.manager
                    .blocks()
                    .put_block(&self.cancel, &block_id, &index_bytes)?;
                Ok(ObjectId::Indirect(block_id))
            }
        }
    }
}

fn emit_block(
    manager: &ObjectManager,
    cancel: &CancelToken,
    spans: &mut Vec<IndirectEntry>,
    written: &mut u64,
    block: &[u8],
) -> Result<()> {
    let block_id = manager.hasher().content_id(block);
    manager.blocks().put_block(cancel, &block_id, block)?;
    spans.push(IndirectEntry {
        offset: *written,
        length: block.len() as u64,
        block_id,
    });
    *written += block.len() as u64;
    Ok(())
}
