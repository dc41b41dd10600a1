//! The storage engine: file layout, allocator, streams, and iteration.
//!
//! A database is one file under a writable memory map. The byte at offset 0
//! selects which of two root header pages is authoritative; the active page
//! carries the bump allocator's watermark and the offset of the stream
//! index. Every structure past the 33-byte root header is carved out of the
//! file by the allocator and addressed by absolute offset.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Root header (33 bytes)                                     │
//! │  - active page selector: u8 (0|1)                           │
//! │  - page 0 @ 1:  { index_pos: u64 BE, used: u64 BE }         │
//! │  - page 1 @ 17: { index_pos: u64 BE, used: u64 BE }         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Allocator region (bump-allocated, never reclaimed)         │
//! │  - sample blocks: 93-byte prelude + delta-varint data area  │
//! │  - stream index blocks: 28-byte (id, root offset) records   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Streams are chains of blocks linked by `next` offsets; appends go to the
//! chain's tail, and a full tail is frozen behind a successor of twice its
//! data capacity. Block and root headers alike are double-buffered: updates
//! land on the inactive page, then a single-byte page flip publishes them,
//! so a torn write can never corrupt the authoritative copy.
//!
//! All multi-byte integers on disk are big-endian.

mod block;
mod database;
mod index;
mod iter;
mod stream;

pub use database::Database;
pub use iter::SampleIter;
pub use stream::{Stream, StreamTx};

use sha1::{Digest, Sha1};

/// Nanoseconds since the Unix epoch.
///
/// Sample times, header timestamps, and encoded time deltas all use this
/// one unit, so round-trips are exact at nanosecond resolution.
pub type Timestamp = i64;

/// The value carried by a sample.
pub type Value = i64;

/// A 20-byte stream identifier: the SHA-1 digest of the stream's name.
pub type StreamId = [u8; 20];

/// Derives the stream id for a user-supplied stream name.
pub fn stream_id(name: &[u8]) -> StreamId {
    let mut hasher = Sha1::new();
    hasher.update(name);
    hasher.finalize().into()
}

/// A single time-series sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Sample time, nanoseconds since the Unix epoch.
    pub time: Timestamp,
    /// Sample value.
    pub value: Value,
}

impl Sample {
    /// Creates a new sample.
    pub fn new(time: Timestamp, value: Value) -> Self {
        Self { time, value }
    }
}
