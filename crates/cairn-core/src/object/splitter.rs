use cairn_types::Result;

/// Splits a written stream into blocks of a fixed maximum size.
pub struct FixedSplitter {
    max_block_size: usize,
    buffer: Vec<u8>,
}

impl FixedSplitter {
    pub fn new(max_block_size: usize) -> Self {
        assert!(max_block_size > 0, "block size must be positive");
        FixedSplitter {
            max_block_size,
            buffer: Vec::new(),
        }
    }

    /// Feed stream bytes, emitting each completed full-size block.
    pub fn push(
        &mut self,
        mut data: &[u8],
        mut emit: impl FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        while !data.is_empty() {
            let room = self.max_block_size - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.max_block_size {
                emit(&self.buffer)?;
                self.buffer.clear();
            }
        }
        Ok(())
    }

    /// Emit the final short block, if any bytes remain buffered.
    pub fn finish(&mut self, mut emit: impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
        if !self.buffer.is_empty() {
            emit(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }
}
