//! Fixed-capacity sample blocks with double-buffered headers.
//!
//! A block is one append-only segment of a stream, resident in the mapped
//! file at a fixed position:
//!
//! ```text
//! Offset   Size    Field
//! ------   ----    -----
//! P+0      4       length: u32 BE       (capacity of the data area)
//! P+4      1       active page selector (0|1)
//! P+5      44      header page 0
//! P+49     44      header page 1
//! P+93     length  data area: (tdelta, vdelta) signed-varint pairs
//! ```
//!
//! Each 44-byte header page holds `used: u32 BE`, `next: u64 BE`, and the
//! last encoded sample as a 16-byte unsigned-varint time field and a
//! 16-byte signed-varint value field. Appends stage bytes into the data
//! area without touching the header; [`BlockMeta::flush_header`] writes the
//! inactive page, flips the selector byte, and flushes the mapping. Until
//! that flip, a crash leaves the previously active page authoritative with
//! its old `used` watermark, and staged data bytes past it stay invisible.

use crate::error::{Result, StoreError};
use crate::mmap::MappedFile;
use crate::store::{Timestamp, Value};
use crate::varint;
use tracing::debug;

/// Fixed per-block overhead: length field, page selector, two header pages.
pub(crate) const BLOCK_PRELUDE: u64 = 93;

/// Data capacity of a stream's root block; successors double from here.
///
/// A sample encodes to at most two maximal varints (20 bytes), so even the
/// smallest block accepts at least one sample and the overflow retry in the
/// append path cannot loop.
pub(crate) const ROOT_DATA_CAPACITY: u32 = 32;

/// Offset of the active-page selector within a block.
const PAGE_BYTE: u64 = 4;

/// Offset of header page 0 within a block; page 1 follows at `PAGE_BASE +
/// PAGE_LEN`.
const PAGE_BASE: u64 = 5;

/// Size of one header page.
const PAGE_LEN: u64 = 44;

/// In-memory mirror of a block's header.
///
/// The mirror is the working copy: appends mutate it freely, and the
/// on-disk header only catches up when a commit (or a freeze before
/// chaining a successor) calls [`BlockMeta::flush_header`].
#[derive(Debug, Clone)]
pub(crate) struct BlockMeta {
    /// Absolute file offset of the block.
    pub(crate) position: u64,
    /// Capacity of the data area in bytes.
    pub(crate) length: u32,
    /// Currently active header page.
    pub(crate) page: u8,
    /// Bytes of the data area in use.
    pub(crate) used: u32,
    /// File offset of the successor block, or 0.
    pub(crate) next: u64,
    /// Time of the last sample encoded into this block.
    pub(crate) time: Timestamp,
    /// Value of the last sample encoded into this block.
    pub(crate) value: Value,
}

impl BlockMeta {
    /// Reads and validates the block at `position`.
    ///
    /// Returns `CorruptLayout` if the prelude or data area overruns the
    /// mapping, the page selector is out of range, or the header fields are
    /// impossible.
    pub(crate) fn load(file: &MappedFile, position: u64) -> Result<Self> {
        let file_len = file.len();
        let data_start = position.checked_add(BLOCK_PRELUDE).ok_or_else(|| {
            StoreError::CorruptLayout(format!("block position {position} overflows"))
        })?;
        if data_start > file_len {
            return Err(StoreError::CorruptLayout(format!(
                "block prelude at {position} overruns mapping of {file_len} bytes"
            )));
        }

        let bytes = file.bytes();
        let p = position as usize;

        let length = u32::from_be_bytes(bytes[p..p + 4].try_into().unwrap());
        if data_start + u64::from(length) > file_len {
            return Err(StoreError::CorruptLayout(format!(
                "block at {position} claims {length} data bytes past end of mapping"
            )));
        }

        let page = bytes[p + PAGE_BYTE as usize];
        if page > 1 {
            return Err(StoreError::CorruptLayout(format!(
                "block at {position} has page selector {page}, expected 0 or 1"
            )));
        }

        let o = p + (PAGE_BASE + u64::from(page) * PAGE_LEN) as usize;
        let used = u32::from_be_bytes(bytes[o..o + 4].try_into().unwrap());
        let next = u64::from_be_bytes(bytes[o + 4..o + 12].try_into().unwrap());
        let (time, _) = varint::decode_uvarint(&bytes[o + 12..o + 28]).ok_or_else(|| {
            StoreError::CorruptLayout(format!("block at {position} has an unreadable time field"))
        })?;
        let (value, _) = varint::decode_varint(&bytes[o + 28..o + 44]).ok_or_else(|| {
            StoreError::CorruptLayout(format!("block at {position} has an unreadable value field"))
        })?;

        if used > length {
            return Err(StoreError::CorruptLayout(format!(
                "block at {position} uses {used} of {length} data bytes"
            )));
        }

        debug!(position, length, page, used, next, "loaded block");

        Ok(Self {
            position,
            length,
            page,
            used,
            next,
            time: time as Timestamp,
            value,
        })
    }

    /// File offset where this block's data area begins.
    pub(crate) fn data_start(position: u64) -> usize {
        (position + BLOCK_PRELUDE) as usize
    }

    /// Stages one sample into the data area.
    ///
    /// The sample is encoded as deltas against the block's last sample; a
    /// fresh block has `(0, 0)` as its baseline, making its first pair
    /// absolute. Returns [`StoreError::BlockFull`] without side effects
    /// when the encoded pair does not fit; the header is not touched either
    /// way.
    pub(crate) fn append(
        &mut self,
        file: &mut MappedFile,
        time: Timestamp,
        value: Value,
    ) -> Result<()> {
        let tdelta = time.wrapping_sub(self.time);
        let vdelta = value.wrapping_sub(self.value);

        let mut scratch = [0u8; 32];
        let mut n = varint::encode_varint(&mut scratch, tdelta);
        n += varint::encode_varint(&mut scratch[n..], vdelta);

        if self.used as usize + n >= self.length as usize {
            return Err(StoreError::BlockFull);
        }

        let at = Self::data_start(self.position) + self.used as usize;
        file.bytes_mut()[at..at + n].copy_from_slice(&scratch[..n]);

        self.used += n as u32;
        self.time = time;
        self.value = value;

        Ok(())
    }

    /// Serializes the header mirror onto the given page.
    fn write_page(&self, file: &mut MappedFile, page: u8) {
        let o = self.position as usize + (PAGE_BASE + u64::from(page) * PAGE_LEN) as usize;
        let bytes = file.bytes_mut();

        bytes[o..o + 4].copy_from_slice(&self.used.to_be_bytes());
        bytes[o + 4..o + 12].copy_from_slice(&self.next.to_be_bytes());
        varint::encode_uvarint(&mut bytes[o + 12..o + 28], self.time as u64);
        varint::encode_varint(&mut bytes[o + 28..o + 44], self.value);
    }

    /// Publishes the header mirror: writes the inactive page, flips the
    /// selector byte, and flushes the mapping.
    ///
    /// This is the only operation that makes staged `used`/`next` changes
    /// observable after a crash.
    pub(crate) fn flush_header(&mut self, file: &mut MappedFile) -> Result<()> {
        debug!(
            position = self.position,
            used = self.used,
            next = self.next,
            page = self.page ^ 1,
            "swapping block header"
        );

        self.write_page(file, self.page ^ 1);
        self.page ^= 1;
        file.bytes_mut()[self.position as usize + PAGE_BYTE as usize] = self.page;
        file.flush()?;

        Ok(())
    }
}
