//! Database root: mapped file, bump allocator, and the stream table.
//!
//! The first 33 bytes of the file are the double-buffered root header. The
//! byte at offset 0 selects the active page; each 16-byte page records the
//! stream index position and the allocator watermark. Everything else is
//! carved from the file by [`Core::allocate`], which only ever moves the
//! watermark forward and expands the mapping on demand.
//!
//! Locking: one database mutex (the [`Core`]) covers the mapping, the
//! watermark, and the roots table; each stream carries its own mutex for
//! appends. Lock order is stream → database, never the reverse, so a
//! transaction may reach the allocator but the allocator never reaches into
//! a stream.

use crate::error::{Result, StoreError};
use crate::mmap::MappedFile;
use crate::store::block::{BlockMeta, BLOCK_PRELUDE, ROOT_DATA_CAPACITY};
use crate::store::index::{self, RootEntry};
use crate::store::stream::{Stream, StreamInner, StreamState};
use crate::store::{stream_id, StreamId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Minimum file size: the page selector byte plus two 16-byte header pages.
pub(crate) const MIN_HEADER_LEN: u64 = 33;

/// Offset of root header page 0; page 1 follows at `PAGE_BASE + PAGE_LEN`.
const PAGE_BASE: u64 = 1;

/// Size of one root header page.
const PAGE_LEN: u64 = 16;

/// The database mutex's protectorate: the mapping, the allocator, and the
/// roots table.
#[derive(Debug)]
pub(crate) struct Core {
    pub(crate) file: MappedFile,
    /// Active root header page.
    page: u8,
    /// File offset of the current stream index block, 0 before the first
    /// stream exists.
    index_pos: u64,
    /// Bump allocator watermark: first unallocated byte.
    pub(crate) used: u64,
    /// In-memory roots table, rebuilt from the index on open.
    roots: Vec<RootEntry>,
}

impl Core {
    /// Reserves `n` contiguous bytes, expanding the mapping if needed.
    ///
    /// Expansion invalidates every byte view into the mapping; callers
    /// re-derive slices after this returns.
    pub(crate) fn allocate(&mut self, n: u64) -> Result<u64> {
        if self.file.len() - self.used < n {
            self.file.expand(n)?;
        }

        let position = self.used;
        self.used += n;
        debug!(position, n, used = self.used, "allocated");

        Ok(position)
    }

    /// Allocates and zero-initializes a block with the given data capacity.
    pub(crate) fn new_block(&mut self, data_capacity: u32) -> Result<BlockMeta> {
        let position = self.allocate(BLOCK_PRELUDE + u64::from(data_capacity))?;

        let bytes = self.file.bytes_mut();
        let p = position as usize;
        bytes[p..p + BLOCK_PRELUDE as usize].fill(0);
        bytes[p..p + 4].copy_from_slice(&data_capacity.to_be_bytes());

        BlockMeta::load(&self.file, position)
    }

    /// Looks up a stream's root block position in the roots table.
    fn root_position(&self, id: &StreamId) -> Option<u64> {
        self.roots
            .iter()
            .find(|root| &root.id == id)
            .map(|root| root.position)
    }

    /// Creates a root block for a new stream and publishes it through a
    /// header swap.
    fn create_root(&mut self, id: StreamId) -> Result<BlockMeta> {
        debug!("creating root block for new stream");

        let root = self.new_block(ROOT_DATA_CAPACITY)?;
        self.roots.push(RootEntry {
            id,
            position: root.position,
        });
        self.write_header_and_swap()?;

        Ok(root)
    }

    /// Serializes the roots table, re-allocating the index block at double
    /// capacity when the current one is out of room.
    fn write_index(&mut self) -> Result<()> {
        if self.roots.is_empty() {
            return Ok(());
        }

        let required = (self.roots.len() * index::RECORD_LEN) as u32;
        let mut position = self.index_pos;

        let capacity = if position == 0 {
            0
        } else {
            let p = position as usize;
            u32::from_be_bytes(self.file.bytes()[p..p + 4].try_into().unwrap())
        };

        if capacity < required + index::HEADER_LEN as u32 {
            let doubled = index::doubled_capacity(self.roots.len());
            position = self.allocate(u64::from(doubled))?;

            let bytes = self.file.bytes_mut();
            let p = position as usize;
            bytes[p..p + 4].copy_from_slice(&doubled.to_be_bytes());

            debug!(
                old = self.index_pos,
                new = position,
                capacity = doubled,
                "reallocated stream index"
            );
            // The previous index block is leaked; doubling bounds the waste.
            self.index_pos = position;
        }

        index::write(&mut self.file, position, &self.roots);

        Ok(())
    }

    /// Publishes the root header: serializes the index, writes the inactive
    /// page, flips the selector byte, and flushes the mapping.
    fn write_header_and_swap(&mut self) -> Result<()> {
        self.write_index()?;

        let page = self.page ^ 1;
        let o = (PAGE_BASE + u64::from(page) * PAGE_LEN) as usize;
        let bytes = self.file.bytes_mut();
        bytes[o..o + 8].copy_from_slice(&self.index_pos.to_be_bytes());
        bytes[o + 8..o + 16].copy_from_slice(&self.used.to_be_bytes());

        self.page = page;
        self.file.bytes_mut()[0] = page;

        debug!(
            page,
            index_pos = self.index_pos,
            used = self.used,
            "swapped database header"
        );

        self.file.flush()?;

        Ok(())
    }
}

/// Shared state behind every [`Database`], [`Stream`], and iterator handle.
#[derive(Debug)]
pub(crate) struct DatabaseInner {
    path: PathBuf,
    /// `None` once the database has been closed.
    pub(crate) core: Mutex<Option<Core>>,
    /// Open-streams cache; streams persist here for the life of the handle.
    streams: Mutex<HashMap<StreamId, Arc<StreamInner>>>,
}

/// A single-file time-series database.
///
/// Cloning the handle is cheap and every clone addresses the same underlying
/// file; the handle is `Send + Sync` and may be shared across threads.
#[derive(Debug, Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Opens the database at `path`, creating it if absent.
    ///
    /// A new file is truncated to the 33-byte root header and zero-filled.
    /// On an existing file the active header page is validated and the
    /// roots table is rebuilt from the stream index; impossible metadata
    /// (a page selector other than 0/1, an index position or watermark past
    /// the end of the file) fails with [`StoreError::CorruptLayout`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = MappedFile::open(path, MIN_HEADER_LEN)?;

        let bytes = file.bytes();
        let page = bytes[0];
        if page > 1 {
            return Err(StoreError::CorruptLayout(format!(
                "active header page byte is {page}, expected 0 or 1"
            )));
        }

        let o = (PAGE_BASE + u64::from(page) * PAGE_LEN) as usize;
        let index_pos = u64::from_be_bytes(bytes[o..o + 8].try_into().unwrap());
        let mut used = u64::from_be_bytes(bytes[o + 8..o + 16].try_into().unwrap());

        // A freshly created file persists a watermark of 0; the header
        // itself occupies the first 33 bytes.
        if used == 0 {
            used = MIN_HEADER_LEN;
        }
        if used < MIN_HEADER_LEN || used > file.len() {
            return Err(StoreError::CorruptLayout(format!(
                "allocator watermark {used} is outside the {}-byte mapping",
                file.len()
            )));
        }

        let roots = index::read(&file, index_pos)?;

        debug!(
            path = %path.display(),
            page,
            index_pos,
            used,
            streams = roots.len(),
            "opened database"
        );

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                path: path.to_path_buf(),
                core: Mutex::new(Some(Core {
                    file,
                    page,
                    index_pos,
                    used,
                    roots,
                })),
                streams: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Path this database was opened at.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Current allocator watermark: the offset of the first unallocated
    /// byte. Strictly non-decreasing over the life of the file.
    pub fn watermark(&self) -> Result<u64> {
        let core = self.inner.core.lock().unwrap_or_else(|err| err.into_inner());
        Ok(core.as_ref().ok_or(StoreError::DatabaseClosed)?.used)
    }

    /// Returns the stream named `name`, creating it on first use.
    ///
    /// The name is reduced to its 20-byte SHA-1 digest. A stream seen
    /// before (by this handle) comes from the open-streams cache; otherwise
    /// its block chain is materialized by walking `next` pointers from the
    /// root. If the stream never existed, a root block is created and the
    /// stream index is rewritten to record it. Streams are never deleted.
    pub fn stream(&self, name: &[u8]) -> Result<Stream> {
        let id = stream_id(name);

        let mut streams = self
            .inner
            .streams
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        if let Some(inner) = streams.get(&id) {
            return Ok(Stream::new(self.inner.clone(), inner.clone()));
        }

        let mut core_guard = self.inner.core.lock().unwrap_or_else(|err| err.into_inner());
        let core = core_guard.as_mut().ok_or(StoreError::DatabaseClosed)?;

        let root = match core.root_position(&id) {
            Some(position) => BlockMeta::load(&core.file, position)?,
            None => core.create_root(id)?,
        };

        let mut next = root.next;
        let mut chain = vec![root];
        while next != 0 {
            let block = BlockMeta::load(&core.file, next)?;
            next = block.next;
            chain.push(block);
        }
        drop(core_guard);

        debug!(blocks = chain.len(), "materialized stream chain");

        let inner = Arc::new(StreamInner::new(id, StreamState::new(chain)));
        streams.insert(id, inner.clone());

        Ok(Stream::new(self.inner.clone(), inner))
    }

    /// Closes the database.
    ///
    /// Acquires every open stream's mutex, draining rather than aborting
    /// in-flight transactions, then flushes and unmaps the file. Any
    /// operation through a surviving handle afterwards returns
    /// [`StoreError::DatabaseClosed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        debug!(path = %self.inner.path.display(), "closing database");

        let streams = self
            .inner
            .streams
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let handles: Vec<Arc<StreamInner>> = streams.values().cloned().collect();
        let _drained: Vec<_> = handles
            .iter()
            .map(|stream| stream.lock_state())
            .collect();

        let mut core_guard = self.inner.core.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(core) = core_guard.take() {
            core.file.flush()?;
        }

        Ok(())
    }
}
