//! Forward iteration over a stream's block chain.
//!
//! The iterator decodes delta pairs in file order, carrying running
//! (time, value) accumulators. The accumulators reset at every block
//! boundary: a block's first pair was encoded against a `(0, 0)` baseline
//! and therefore decodes as an absolute sample, so a damaged block cannot
//! skew anything decoded from its successors.

use crate::error::{Result, StoreError};
use crate::store::block::BlockMeta;
use crate::store::database::DatabaseInner;
use crate::store::{Sample, Timestamp, Value};
use crate::varint;
use std::sync::Arc;

/// Per-block view captured when the iterator was created.
#[derive(Debug, Clone, Copy)]
struct BlockView {
    position: u64,
    used: u32,
}

/// A forward iterator over one stream's committed samples.
///
/// Yields `Result<Sample>`: decoding stops at the first error, which can
/// only be [`StoreError::TruncatedRecord`] on a record cut short of its
/// block's `used` watermark, or [`StoreError::DatabaseClosed`] if the
/// database goes away mid-iteration.
pub struct SampleIter {
    db: Arc<DatabaseInner>,
    blocks: Vec<BlockView>,
    /// Index of the block currently being decoded.
    index: usize,
    /// Byte offset into the current block's data area.
    offset: u32,
    /// True while the next pair is the first of its block.
    fresh: bool,
    time: Timestamp,
    value: Value,
}

impl SampleIter {
    pub(crate) fn new(db: Arc<DatabaseInner>, chain: &[BlockMeta]) -> Self {
        Self {
            db,
            blocks: chain
                .iter()
                .map(|block| BlockView {
                    position: block.position,
                    used: block.used,
                })
                .collect(),
            index: 0,
            offset: 0,
            fresh: true,
            time: 0,
            value: 0,
        }
    }

    /// Decodes the next sample, or `None` at the end of the chain.
    fn next_sample(&mut self) -> Result<Option<Sample>> {
        loop {
            let Some(block) = self.blocks.get(self.index).copied() else {
                return Ok(None);
            };

            if self.offset == block.used {
                // A successor can exist and still be empty, so keep walking
                // rather than assuming the chain ends here.
                self.index += 1;
                self.offset = 0;
                self.fresh = true;
                continue;
            }

            let core_guard = self.db.core.lock().unwrap_or_else(|err| err.into_inner());
            let core = core_guard.as_ref().ok_or(StoreError::DatabaseClosed)?;

            let start = BlockMeta::data_start(block.position);
            let data = &core.file.bytes()[start + self.offset as usize..start + block.used as usize];

            let Some((tdelta, n)) = varint::decode_varint(data) else {
                return Err(StoreError::TruncatedRecord {
                    position: block.position,
                    offset: self.offset,
                });
            };
            let Some((vdelta, m)) = varint::decode_varint(&data[n..]) else {
                return Err(StoreError::TruncatedRecord {
                    position: block.position,
                    offset: self.offset + n as u32,
                });
            };
            self.offset += (n + m) as u32;

            if self.fresh {
                // First pair of a block is absolute.
                self.time = tdelta;
                self.value = vdelta;
                self.fresh = false;
            } else {
                self.time = self.time.wrapping_add(tdelta);
                self.value = self.value.wrapping_add(vdelta);
            }

            return Ok(Some(Sample {
                time: self.time,
                value: self.value,
            }));
        }
    }
}

impl Iterator for SampleIter {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sample().transpose()
    }
}
