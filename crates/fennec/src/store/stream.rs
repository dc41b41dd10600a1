//! Streams: named block chains with transactional appends.
//!
//! A stream is the chain of blocks reachable from its root via `next`
//! offsets; the last element is the tail every append lands in. The chain
//! is materialized eagerly when the stream is opened and kept in memory for
//! the life of the handle.
//!
//! All writes go through a [`StreamTx`], which holds the stream's mutex for
//! its whole duration. Appends stage bytes into the mapping immediately but
//! the tail's header, and with it the observable `used` watermark, only
//! reaches disk on commit, so a crash before commit rolls the stream back
//! to its last committed state.

use crate::error::{Result, StoreError};
use crate::store::block::BlockMeta;
use crate::store::database::DatabaseInner;
use crate::store::iter::SampleIter;
use crate::store::{StreamId, Timestamp, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Mutable stream state behind the per-stream mutex.
#[derive(Debug)]
pub(crate) struct StreamState {
    /// Block chain from root to tail. Never empty.
    pub(crate) chain: Vec<BlockMeta>,
    /// Set when a cancelled transaction left this state ahead of the
    /// on-disk headers; cleared only by reopening the database.
    pub(crate) poisoned: bool,
}

impl StreamState {
    pub(crate) fn new(chain: Vec<BlockMeta>) -> Self {
        Self {
            chain,
            poisoned: false,
        }
    }

    fn tail(&mut self) -> &mut BlockMeta {
        self.chain
            .last_mut()
            .expect("stream chain always holds its root block")
    }
}

/// Shared stream state: the id plus the mutex serializing writes.
#[derive(Debug)]
pub(crate) struct StreamInner {
    id: StreamId,
    state: Mutex<StreamState>,
}

impl StreamInner {
    pub(crate) fn new(id: StreamId, state: StreamState) -> Self {
        Self {
            id,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// A named time-series stream.
///
/// Handles are cheap clones over shared state; every handle for a given
/// name serializes its writes through the same mutex.
#[derive(Debug, Clone)]
pub struct Stream {
    db: Arc<DatabaseInner>,
    inner: Arc<StreamInner>,
}

impl Stream {
    pub(crate) fn new(db: Arc<DatabaseInner>, inner: Arc<StreamInner>) -> Self {
        Self { db, inner }
    }

    /// The stream's 20-byte identifier.
    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    /// Number of blocks currently in the chain.
    pub fn block_count(&self) -> usize {
        self.inner.lock_state().chain.len()
    }

    /// Starts a transaction, taking the stream's write lock until the
    /// transaction commits, cancels, or is dropped.
    ///
    /// Returns [`StoreError::StreamPoisoned`] if an earlier cancelled
    /// transaction left the stream inconsistent.
    pub fn begin(&self) -> Result<StreamTx<'_>> {
        let guard = self.inner.lock_state();
        if guard.poisoned {
            return Err(StoreError::StreamPoisoned);
        }

        let tail = guard
            .chain
            .last()
            .expect("stream chain always holds its root block");
        let snapshot = TxSnapshot {
            blocks: guard.chain.len(),
            used: tail.used,
            time: tail.time,
            value: tail.value,
        };

        Ok(StreamTx {
            db: &self.db,
            guard,
            snapshot,
            finished: false,
        })
    }

    /// Runs `f` inside a transaction and commits if it succeeds.
    ///
    /// An error from `f` cancels the transaction and propagates.
    pub fn with_tx<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut StreamTx<'_>) -> Result<()>,
    {
        let mut tx = self.begin()?;
        f(&mut tx)?;
        tx.commit()
    }

    /// Returns a forward iterator over the stream's committed samples.
    ///
    /// The chain is snapshotted under the stream mutex, so creation
    /// serializes with transactions; decoding afterwards reads the mapping
    /// without further stream-level synchronization. Callers that need a
    /// frozen view across several streams quiesce writers first.
    pub fn iter(&self) -> Result<SampleIter> {
        let guard = self.inner.lock_state();
        if guard.poisoned {
            return Err(StoreError::StreamPoisoned);
        }

        Ok(SampleIter::new(self.db.clone(), &guard.chain))
    }
}

/// Pre-transaction tail state, restored on cancel.
#[derive(Debug, Clone, Copy)]
struct TxSnapshot {
    blocks: usize,
    used: u32,
    time: Timestamp,
    value: Value,
}

/// An exclusive write transaction on one stream.
///
/// Dropping a transaction without committing cancels it.
pub struct StreamTx<'a> {
    db: &'a Arc<DatabaseInner>,
    guard: MutexGuard<'a, StreamState>,
    snapshot: TxSnapshot,
    finished: bool,
}

impl StreamTx<'_> {
    /// Appends one sample to the stream's tail block.
    ///
    /// When the tail is out of space it is frozen: its header, now
    /// pointing at a successor of twice its data capacity, is flushed,
    /// and the append retries in the successor, which is guaranteed to
    /// accept it. Times are expected to be non-decreasing within a stream;
    /// the engine encodes whatever deltas it is given.
    pub fn add(&mut self, time: Timestamp, value: Value) -> Result<()> {
        let mut core_guard = self.db.core.lock().unwrap_or_else(|err| err.into_inner());
        let core = core_guard.as_mut().ok_or(StoreError::DatabaseClosed)?;
        let state = &mut *self.guard;

        match state.tail().append(&mut core.file, time, value) {
            Err(StoreError::BlockFull) => {}
            other => return other,
        }

        let capacity = state.tail().length.saturating_mul(2);
        debug!(capacity, "tail block full, chaining successor");

        let outcome = core.new_block(capacity).and_then(|mut successor| {
            let tail = state.tail();
            tail.next = successor.position;
            tail.flush_header(&mut core.file)?;
            successor.append(&mut core.file, time, value)?;
            state.chain.push(successor);
            Ok(())
        });

        if outcome.is_err() {
            // The frozen tail's header may already be published; the
            // in-memory chain can no longer be trusted to match disk.
            state.poisoned = true;
        }

        outcome
    }

    /// Commits the transaction: publishes the tail's header with a page
    /// swap and mapping flush, then releases the stream.
    ///
    /// If the flush fails the stream is poisoned, since the header pages
    /// may be half-published.
    pub fn commit(mut self) -> Result<()> {
        let outcome = self.flush_tail();
        if outcome.is_err() {
            self.guard.poisoned = true;
        }
        self.finished = true;
        outcome
    }

    /// Cancels the transaction without publishing anything.
    ///
    /// If every append stayed inside the original tail block, the tail's
    /// in-memory header is restored from the begin-time snapshot and the
    /// stream is reusable: disk never saw the staged bytes as live. If the
    /// transaction overflowed into a successor, the frozen predecessor's
    /// header flush already published mid-transaction state, so the stream
    /// is poisoned until the database is reopened.
    pub fn cancel(mut self) -> Result<()> {
        self.rollback();
        Ok(())
    }

    fn flush_tail(&mut self) -> Result<()> {
        let mut core_guard = self.db.core.lock().unwrap_or_else(|err| err.into_inner());
        let core = core_guard.as_mut().ok_or(StoreError::DatabaseClosed)?;
        self.guard.tail().flush_header(&mut core.file)
    }

    fn rollback(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if self.guard.chain.len() > self.snapshot.blocks {
            warn!("cancelled transaction already froze a block; poisoning stream");
            self.guard.poisoned = true;
            return;
        }

        let snapshot = self.snapshot;
        let tail = self.guard.tail();
        tail.used = snapshot.used;
        tail.time = snapshot.time;
        tail.value = snapshot.value;
    }
}

impl Drop for StreamTx<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}
