use std::io::{self, Read, Seek, SeekFrom};

use cairn_types::{CairnError, CancelToken, ObjectId, Result};

use super::{IndirectEntry, ObjectManager};

/// Random-access reader over a stored object.
///
/// Direct objects hold their payload in memory; indirect objects resolve
/// spans lazily through the block manager, caching the most recently read
/// block.
pub struct ObjectReader<'m> {
    manager: &'m ObjectManager,
    cancel: CancelToken,
    spans: Vec<IndirectEntry>,
    length: u64,
    pos: u64,
    cached: Option<(usize, Vec<u8>)>,
}

impl<'m> ObjectReader<'m> {
    pub(super) fn open(
        manager: &'m ObjectManager,
        cancel: CancelToken,
        object_id: &ObjectId,
    ) -> Result<Self> {
        let mut cached = None;
        let spans = match object_id {
            ObjectId::Direct(block_id) => {
                let payload = manager.blocks().get_block(&cancel, block_id)?;
                let length = payload.len() as u64;
                cached = Some((0, payload));
                vec![IndirectEntry {
                    offset: 0,
                    length,
                    block_id: block_id.clone(),
                }]
            }
            ObjectId::Indirect(block_id) => {
                let index_bytes = manager.blocks().get_block(&cancel, block_id)?;
                let spans: Vec<IndirectEntry> = rmp_serde::from_slice(&index_bytes)?;
                validate_spans(&spans)?;
                spans
            }
        };
        let length = spans.last().map(|s| s.offset + s.length).unwrap_or(0);
        Ok(ObjectReader {
            manager,
            cancel,
            spans,
            length,
            pos: 0,
            cached,
        })
    }

    /// Total object length in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn span_at(&self, pos: u64) -> Option<usize> {
        if pos >= self.length {
            return None;
        }
        let i = self
            .spans
            .partition_point(|s| s.offset + s.length <= pos);
        (i < self.spans.len()).then_some(i)
    }

    fn load_span(&mut self, i: usize) -> Result<&[u8]> {
        if self.cached.as_ref().map(|(ci, _)| *ci) != Some(i) {
            let payload = self
                .manager
                .blocks()
                .get_block(&self.cancel, &self.spans[i].block_id)?;
            if payload.len() as u64 != self.spans[i].length {
                return Err(CairnError::InvalidFormat(format!(
                    "span block {} has {} bytes, index says {}",
                    self.spans[i].block_id,
                    payload.len(),
                    self.spans[i].length
                )));
            }
            self.cached = Some((i, payload));
        }
        Ok(&self.cached.as_ref().unwrap().1)
    }
}

fn validate_spans(spans: &[IndirectEntry]) -> Result<()> {
    let mut expected_offset = 0u64;
    for span in spans {
        if span.offset != expected_offset {
            return Err(CairnError::InvalidFormat(format!(
                "indirect index has a gap at offset {expected_offset}"
            )));
        }
        expected_offset += span.length;
    }
    Ok(())
}

impl std::fmt::Debug for ObjectReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("length", &self.length)
            .field("pos", &self.pos)
            .field("spans", &self.spans.len())
            .finish()
    }
}

impl Read for ObjectReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(i) = self.span_at(self.pos) else {
            return Ok(0);
        };
        let span_offset = self.spans[i].offset;
        let pos = self.pos;
        let payload = self
            .load_span(i)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let start = (pos - span_offset) as usize;
        let n = buf.len().min(payload.len() - start);
        buf[..n].copy_from_slice(&payload[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for ObjectReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => self.length as i64 + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of object",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
