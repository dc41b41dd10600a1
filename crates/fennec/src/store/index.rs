//! Stream index blocks: digest → root block offset records.
//!
//! The index is a self-describing region in the allocator area:
//!
//! ```text
//! Offset   Size   Field
//! ------   ----   -----
//! I+0      4      length: u32 BE  (total block size, header + capacity)
//! I+4      4      used: u32 BE    (record bytes in use, multiple of 28)
//! I+8      28×N   records: { id: [u8; 20], root_pos: u64 BE }
//! ```
//!
//! The roots table rewrites in place while the block has capacity and is
//! re-allocated at double size when it runs out; superseded index blocks
//! are leaked, bounded by the doubling to O(log N) occurrences.

use crate::error::{Result, StoreError};
use crate::mmap::MappedFile;
use crate::store::StreamId;

/// Size of one index record: 20-byte stream id plus root offset.
pub(crate) const RECORD_LEN: usize = 28;

/// Size of the index block's own header (`length` + `used`).
pub(crate) const HEADER_LEN: usize = 8;

/// One entry of the in-memory roots table.
#[derive(Debug, Clone)]
pub(crate) struct RootEntry {
    /// Stream identifier.
    pub(crate) id: StreamId,
    /// File offset of the stream's root block.
    pub(crate) position: u64,
}

/// Capacity a freshly allocated index block gets for `records` entries:
/// twice the record bytes, plus the header.
pub(crate) fn doubled_capacity(records: usize) -> u32 {
    (records * RECORD_LEN * 2 + HEADER_LEN) as u32
}

/// Reads the roots table from the index block at `position`.
///
/// Position 0 means no index has been written yet and yields an empty
/// table. Returns `CorruptLayout` when the block or its record region
/// overruns the mapping or the `used` field is not a whole number of
/// records.
pub(crate) fn read(file: &MappedFile, position: u64) -> Result<Vec<RootEntry>> {
    if position == 0 {
        return Ok(Vec::new());
    }

    let file_len = file.len();
    let header_end = position.checked_add(HEADER_LEN as u64).ok_or_else(|| {
        StoreError::CorruptLayout(format!("index position {position} overflows"))
    })?;
    if header_end > file_len {
        return Err(StoreError::CorruptLayout(format!(
            "index position {position} is out of bounds for a {file_len}-byte mapping"
        )));
    }

    let bytes = file.bytes();
    let p = position as usize;
    let length = u32::from_be_bytes(bytes[p..p + 4].try_into().unwrap());
    let used = u32::from_be_bytes(bytes[p + 4..p + 8].try_into().unwrap());

    if (length as usize) < HEADER_LEN || position + u64::from(length) > file_len {
        return Err(StoreError::CorruptLayout(format!(
            "index block at {position} claims {length} bytes past end of mapping"
        )));
    }
    if used as usize % RECORD_LEN != 0 {
        return Err(StoreError::CorruptLayout(format!(
            "index record region of {used} bytes is not a whole number of records"
        )));
    }
    if used as usize > length as usize - HEADER_LEN {
        return Err(StoreError::CorruptLayout(format!(
            "index block at {position} uses {used} of {length} bytes"
        )));
    }

    let count = used as usize / RECORD_LEN;
    let mut roots = Vec::with_capacity(count);
    for i in 0..count {
        let o = p + HEADER_LEN + i * RECORD_LEN;
        let id: StreamId = bytes[o..o + 20].try_into().unwrap();
        let root = u64::from_be_bytes(bytes[o + 20..o + 28].try_into().unwrap());
        roots.push(RootEntry { id, position: root });
    }

    Ok(roots)
}

/// Serializes the roots table into the index block at `position`.
///
/// The caller guarantees capacity (`length − 8 ≥ records × 28`); the block's
/// `length` field is left untouched, `used` and the records are rewritten.
pub(crate) fn write(file: &mut MappedFile, position: u64, roots: &[RootEntry]) {
    let bytes = file.bytes_mut();
    let p = position as usize;

    let used = (roots.len() * RECORD_LEN) as u32;
    bytes[p + 4..p + 8].copy_from_slice(&used.to_be_bytes());

    for (i, root) in roots.iter().enumerate() {
        let o = p + HEADER_LEN + i * RECORD_LEN;
        bytes[o..o + 20].copy_from_slice(&root.id);
        bytes[o + 20..o + 28].copy_from_slice(&root.position.to_be_bytes());
    }
}
