//! Writable memory-mapped file with on-demand growth.
//!
//! [`MappedFile`] owns the file descriptor and one writable mapping over the
//! whole file. Growth is truncate-then-remap: [`MappedFile::expand`] takes
//! `&mut self`, so the borrow checker guarantees no byte view from the old
//! mapping survives the remap. Callers re-derive slices after any operation
//! that may expand.

use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::debug;

/// A file and a writable memory map covering all of it.
#[derive(Debug)]
pub struct MappedFile {
    file: File,
    map: MmapMut,
}

impl MappedFile {
    /// Opens or creates the file at `path` and maps it read-write.
    ///
    /// A file shorter than `min_len` is truncated up to `min_len` first, so
    /// a fresh file starts as `min_len` zero bytes.
    pub fn open(path: &Path, min_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if file.metadata()?.len() < min_len {
            file.set_len(min_len)?;
        }

        // Safety: fennec is single-process single-writer; all mutation of
        // the mapped region goes through `&mut self` on this handle, and the
        // file is never truncated shorter while mapped.
        let map = unsafe { MmapMut::map_mut(&file)? };

        debug!(path = %path.display(), len = map.len(), "mapped file");

        Ok(Self { file, map })
    }

    /// Current mapped length in bytes.
    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    /// Returns true if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Read-only view of the mapped bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Writable view of the mapped bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Synchronously flushes dirty pages back to the file.
    pub fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }

    /// Grows the file by `additional` bytes and remaps it.
    ///
    /// Every slice previously derived from this mapping is invalidated;
    /// taking `&mut self` makes holding one across this call a compile
    /// error rather than undefined behavior.
    pub fn expand(&mut self, additional: u64) -> io::Result<()> {
        let new_len = self.len() + additional;
        debug!(old = self.len(), new = new_len, "expanding mapped file");

        self.map.flush()?;
        self.file.set_len(new_len)?;
        // Safety: same ownership argument as in `open`; the old mapping is
        // dropped by the assignment.
        self.map = unsafe { MmapMut::map_mut(&self.file)? };

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_truncates_to_minimum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grow.db");

        let file = MappedFile::open(&path, 64).unwrap();
        assert_eq!(file.len(), 64);
        assert!(file.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_open_keeps_longer_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("long.db");
        std::fs::write(&path, vec![7u8; 128]).unwrap();

        let file = MappedFile::open(&path, 64).unwrap();
        assert_eq!(file.len(), 128);
        assert_eq!(file.bytes()[0], 7);
    }

    #[test]
    fn test_expand_preserves_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("expand.db");

        let mut file = MappedFile::open(&path, 32).unwrap();
        file.bytes_mut()[..4].copy_from_slice(b"fnnc");
        file.expand(32).unwrap();

        assert_eq!(file.len(), 64);
        assert_eq!(&file.bytes()[..4], b"fnnc");
        assert!(file.bytes()[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_flush_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flush.db");

        {
            let mut file = MappedFile::open(&path, 32).unwrap();
            file.bytes_mut()[0] = 42;
            file.flush().unwrap();
        }

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents[0], 42);
    }
}
