//! Error and Result types for fennec storage operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for fennec operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O error from open, truncate, map, or flush.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file's structural metadata is impossible: an offset points past
    /// the end of the mapping, a page selector is neither 0 nor 1, or a
    /// record region overruns its container.
    #[error("corrupt database layout: {0}")]
    CorruptLayout(String),

    /// A block's data area cannot hold the encoded sample.
    ///
    /// Internal to the append path: the stream reacts by chaining a new
    /// block and retrying, so callers never observe it from a transaction.
    #[error("no space left in block")]
    BlockFull,

    /// A varint decode ran out of bytes before the block's recorded `used`
    /// watermark.
    #[error("truncated record in block at {position} (data offset {offset})")]
    TruncatedRecord {
        /// File offset of the block containing the short record.
        position: u64,
        /// Offset into the block's data area where decoding stopped.
        offset: u32,
    },

    /// A cancelled transaction left the stream's in-memory state ahead of
    /// its on-disk headers. The stream refuses further work until the
    /// database is reopened.
    #[error("stream poisoned by a cancelled transaction; reopen the database")]
    StreamPoisoned,

    /// The database was closed while this handle was still live.
    #[error("database is closed")]
    DatabaseClosed,
}
