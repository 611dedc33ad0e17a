//! `FaultyVfs`: a test-oriented [`Vfs`] wrapper that injects named failures
//! at labeled call sites (§4.1). Production code calls
//! [`VfsFile::failpoint`] unconditionally — it is a no-op on [`super::OsFile`]
//! and only meaningful when the engine is opened against a `FaultyVfs`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{Vfs, VfsFile};
use crate::error::Result;

/// What a configured failpoint should do the next time it fires.
#[derive(Debug, Clone, Copy)]
pub enum FailMode {
    /// The labeled operation fails with `ErrIO`.
    Error,
    /// The write is truncated to exactly `n` bytes (simulated torn write).
    Partial(usize),
}

#[derive(Debug, Clone, Copy)]
struct FailpointConfig {
    mode: FailMode,
    remaining: u32,
}

type FailpointMap = Arc<Mutex<HashMap<String, FailpointConfig>>>;

/// Outcome of checking a named failpoint at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailpointOutcome {
    Pass,
    Fail,
    Partial(usize),
}

pub struct FaultyVfs<V> {
    inner: V,
    failpoints: FailpointMap,
}

impl<V: Vfs> FaultyVfs<V> {
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            failpoints: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arms a failpoint so the next `fires` calls to the labeled operation
    /// fail (or truncate) before reverting to pass-through.
    pub fn set_failpoint(&self, label: impl Into<String>, mode: FailMode, fires: u32) {
        let mut map = self.failpoints.lock().unwrap();
        if fires == 0 {
            map.remove(&label.into());
        } else {
            map.insert(label.into(), FailpointConfig { mode, remaining: fires });
        }
    }

    pub fn clear_failpoint(&self, label: &str) {
        self.failpoints.lock().unwrap().remove(label);
    }
}

impl<V: Vfs> Vfs for FaultyVfs<V> {
    type File = FaultyFile<V::File>;

    fn open(&self, path: &Path, create: bool) -> Result<Self::File> {
        let inner = self.inner.open(path, create)?;
        Ok(FaultyFile {
            inner,
            failpoints: self.failpoints.clone(),
        })
    }
}

pub struct FaultyFile<F> {
    inner: F,
    failpoints: FailpointMap,
}

impl<F: VfsFile> VfsFile for FaultyFile<F> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.inner.write_at(offset, buf)
    }

    fn fsync(&mut self) -> Result<()> {
        self.inner.fsync()
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.inner.truncate(size)
    }

    fn size(&mut self) -> Result<u64> {
        self.inner.size()
    }

    fn supports_mmap(&self) -> bool {
        // Force the single-write() WAL path in tests so torn-write
        // failpoints land where the test expects them.
        false
    }

    /// Checks and atomically consumes one fire of the named failpoint.
    fn failpoint(&self, label: &str) -> FailpointOutcome {
        let mut map = self.failpoints.lock().unwrap();
        let Some(cfg) = map.get_mut(label) else {
            return FailpointOutcome::Pass;
        };
        if cfg.remaining == 0 {
            map.remove(label);
            return FailpointOutcome::Pass;
        }
        cfg.remaining -= 1;
        let outcome = match cfg.mode {
            FailMode::Error => FailpointOutcome::Fail,
            FailMode::Partial(n) => FailpointOutcome::Partial(n),
        };
        if cfg.remaining == 0 {
            map.remove(label);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::OsVfs;

    #[test]
    fn failpoint_fires_then_reverts() {
        let vfs = FaultyVfs::new(OsVfs);
        let dir = tempfile::tempdir().unwrap();
        let file = vfs.open(&dir.path().join("f"), true).unwrap();

        vfs.set_failpoint("wal_fsync", FailMode::Error, 1);
        assert_eq!(file.failpoint("wal_fsync"), FailpointOutcome::Fail);
        assert_eq!(file.failpoint("wal_fsync"), FailpointOutcome::Pass);
    }

    #[test]
    fn partial_mode_truncates_n_times() {
        let vfs = FaultyVfs::new(OsVfs);
        let dir = tempfile::tempdir().unwrap();
        let file = vfs.open(&dir.path().join("f"), true).unwrap();

        vfs.set_failpoint("checkpoint_write_page", FailMode::Partial(10), 2);
        assert_eq!(
            file.failpoint("checkpoint_write_page"),
            FailpointOutcome::Partial(10)
        );
        assert_eq!(
            file.failpoint("checkpoint_write_page"),
            FailpointOutcome::Partial(10)
        );
        assert_eq!(file.failpoint("checkpoint_write_page"), FailpointOutcome::Pass);
    }
}
