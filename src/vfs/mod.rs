//! Virtual file system: the only layer allowed to touch real I/O.
//!
//! `Vfs` is a small trait rather than a concrete `File` wrapper so that
//! tests can substitute [`faulty::FaultyVfs`] to inject torn writes and I/O
//! failures at named points (§4.1). Production code uses [`OsVfs`].

pub mod faulty;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{DbError, Result};

/// An open file handle as seen by the rest of the engine. `Vfs` impls are
/// free to choose any backing representation (`OsVfs` uses `std::fs::File`).
pub trait VfsFile: Send {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize>;
    fn fsync(&mut self) -> Result<()>;
    fn truncate(&mut self, size: u64) -> Result<()>;
    fn size(&mut self) -> Result<u64>;

    /// Whether this file can back an [`MmapRegion`]. The WAL writer falls
    /// back to plain `write_at` when false.
    fn supports_mmap(&self) -> bool {
        false
    }

    /// Checks a named failpoint (§4.1). A no-op that always passes through
    /// on every production `VfsFile`; meaningful only under
    /// [`faulty::FaultyVfs`]. Call sites in the WAL and Pager invoke this
    /// unconditionally before the labeled operation.
    fn failpoint(&self, _label: &str) -> faulty::FailpointOutcome {
        faulty::FailpointOutcome::Pass
    }
}

/// Opens, and otherwise manages the lifecycle of, files backing a database.
/// Implemented once for production (`OsVfs`) and once for fault injection
/// (`FaultyVfs`), per the dynamic-dispatch guidance in §9: a small trait at
/// the I/O seam, not runtime reflection on the hot path.
pub trait Vfs: Send + Sync {
    type File: VfsFile;

    fn open(&self, path: &Path, create: bool) -> Result<Self::File>;
}

/// Production VFS backed directly by `std::fs::File`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsVfs;

pub struct OsFile {
    file: File,
}

impl Vfs for OsVfs {
    type File = OsFile;

    fn open(&self, path: &Path, create: bool) -> Result<Self::File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;
        Ok(OsFile { file })
    }
}

impl VfsFile for OsFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn fsync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn supports_mmap(&self) -> bool {
        true
    }
}

/// A writable memory map over a [`VfsFile`], used by the WAL append path
/// when capacity allows (§4.3, §9). Only `OsFile` implements mapping; the
/// mapping is re-created (via `ensure_capacity`) whenever the backing file
/// must grow past the current map length.
pub struct MmapRegion {
    map: memmap2::MmapMut,
}

impl MmapRegion {
    pub fn map(file: &File, len: u64) -> Result<Self> {
        // SAFETY: the mapped file is exclusively owned by the single writer
        // for the lifetime of the mapping (§9, "ownership of pages"); no
        // other process or thread truncates it concurrently.
        let map = unsafe {
            memmap2::MmapOptions::new()
                .len(len as usize)
                .map_mut(file)
                .map_err(|e| DbError::io(format!("mmap failed: {e}")))?
        };
        Ok(Self { map })
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.map
            .flush()
            .map_err(|e| DbError::io(format!("mmap flush failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn os_vfs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        std::fs::File::create(&path).unwrap().write_all(b"").unwrap();

        let vfs = OsVfs;
        let mut file = vfs.open(&path, true).unwrap();
        file.write_at(0, b"hello world").unwrap();
        file.fsync().unwrap();

        let mut buf = [0u8; 5];
        let n = file.read_at(6, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"world");
        assert_eq!(file.size().unwrap(), 11);
    }
}
