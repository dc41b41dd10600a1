//! Fennec - single-file embedded time-series storage.
//!
//! This crate provides an append-only store for (timestamp, integer-value)
//! samples, grouped into named streams, all living in one memory-mapped
//! file. It is built for a single writing process linking the library
//! directly; there is no server and no background work.
//!
//! # Components
//!
//! - [`Database`]: the mapped file, its bump allocator, and the stream table
//! - [`Stream`] / [`StreamTx`]: per-stream block chains with transactional,
//!   mutex-serialized appends
//! - [`SampleIter`]: forward decoding of delta-varint records across block
//!   boundaries
//! - [`varint`]: the unsigned/zig-zag variable-length integer codec
//!
//! Crash consistency comes from double-buffered headers: every header has
//! two on-disk pages and a one-byte selector, updates land on the inactive
//! page, and a single-byte flip publishes them. Durability is whatever an
//! explicit flush of the mapping provides; there is no write-ahead log.
//!
//! # Example
//!
//! ```rust,ignore
//! use fennec::Database;
//!
//! let db = Database::open("metrics.db")?;
//! let stream = db.stream(b"cpu.load")?;
//!
//! let mut tx = stream.begin()?;
//! tx.add(1_700_000_000_000_000_000, 42)?;
//! tx.add(1_700_000_001_000_000_000, 45)?;
//! tx.commit()?;
//!
//! for sample in stream.iter()? {
//!     let sample = sample?;
//!     println!("{} {}", sample.time, sample.value);
//! }
//!
//! db.close()?;
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod mmap;
pub mod store;
pub mod varint;

pub use error::{Result, StoreError};
pub use store::{stream_id, Database, Sample, SampleIter, Stream, StreamId, StreamTx, Timestamp, Value};
