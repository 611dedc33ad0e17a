//! Reader registry and the read-transaction handle (§4.3, "Reader
//! registry", "Cancellation"). Readers are never blocked by the writer or
//! by each other; a checkpoint may instead mark a long-running reader
//! aborted via a shared atomic flag that the reader's own hot path checks
//! before each page fetch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Lsn, Wal};
use crate::error::{DbError, Result};
use crate::pager::PageId;
use crate::vfs::Vfs;

struct ReaderHandle {
    snapshot: Lsn,
    started: Instant,
    last_warning_at: Option<Instant>,
    aborted: Arc<AtomicBool>,
}

pub(super) struct ReaderRegistry {
    next_id: AtomicU64,
    readers: BTreeMap<u64, ReaderHandle>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            readers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, snapshot: Lsn) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.readers.insert(
            id,
            ReaderHandle {
                snapshot,
                started: Instant::now(),
                last_warning_at: None,
                aborted: Arc::new(AtomicBool::new(false)),
            },
        );
        id
    }

    pub fn remove(&mut self, id: u64) {
        self.readers.remove(&id);
    }

    pub fn aborted_flag(&self, id: u64) -> Arc<AtomicBool> {
        self.readers
            .get(&id)
            .map(|h| h.aborted.clone())
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)))
    }

    /// Smallest snapshot among currently registered readers (the `§4.3
    /// minReaderSnapshot()` scan, "linear... reader count is small").
    pub fn min_snapshot(&self) -> Option<Lsn> {
        self.readers.values().map(|h| h.snapshot).min()
    }

    pub fn all_at_or_past(&self, lsn: Lsn) -> bool {
        self.readers.values().all(|h| h.snapshot >= lsn)
    }

    /// Applies the warn/timeout/WAL-pinning policy (§4.3, checkpoint step
    /// 2). Returns the number of readers aborted and removed.
    pub fn apply_policy(
        &mut self,
        current_end: u64,
        warn_after: Duration,
        timeout_after: Duration,
        max_wal_bytes_per_reader: u64,
    ) -> usize {
        let mut to_abort = Vec::new();
        for (&id, handle) in self.readers.iter_mut() {
            let elapsed = handle.started.elapsed();
            let pinned = current_end.saturating_sub(handle.snapshot);

            if elapsed >= timeout_after || pinned > max_wal_bytes_per_reader {
                handle.aborted.store(true, Ordering::Release);
                to_abort.push(id);
                continue;
            }

            if elapsed >= warn_after {
                let should_warn = handle
                    .last_warning_at
                    .map(|t| t.elapsed() >= Duration::from_secs(60))
                    .unwrap_or(true);
                if should_warn {
                    log::warn!(
                        "reader {id} has been open for {:?}, pinning {pinned} WAL bytes",
                        elapsed
                    );
                    handle.last_warning_at = Some(Instant::now());
                }
            }
        }

        for id in &to_abort {
            self.readers.remove(id);
        }
        to_abort.len()
    }
}

/// A snapshot-isolated read transaction (§4.3, §5). Ends automatically when
/// dropped.
pub struct ReadTxn<'w, V: Vfs> {
    wal: &'w Wal<V>,
    id: u64,
    snapshot: Lsn,
    aborted: Arc<AtomicBool>,
}

impl<'w, V: Vfs> ReadTxn<'w, V> {
    pub(super) fn new(wal: &'w Wal<V>, id: u64, snapshot: Lsn, aborted: Arc<AtomicBool>) -> Self {
        Self {
            wal,
            id,
            snapshot,
            aborted,
        }
    }

    pub fn snapshot(&self) -> Lsn {
        self.snapshot
    }

    /// Checks the shared abort flag (acquire-load) before a page fetch
    /// (§4.3, "Cancellation"). Once a reader observes its own abort it must
    /// fail every subsequent fetch with `ErrTransaction`.
    pub fn check_aborted(&self) -> Result<()> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(DbError::transaction(
                "read transaction aborted by checkpoint (timeout or WAL-pinning limit)",
            ));
        }
        Ok(())
    }

    /// Looks up the WAL-resident version of `page_id` visible at this
    /// snapshot, if any; `None` means the caller should fall back to the
    /// main DB file.
    pub fn get_page_at_or_before(&self, page_id: PageId) -> Result<Option<(Lsn, u64)>> {
        self.check_aborted()?;
        Ok(self.wal.get_page_at_or_before(page_id, self.snapshot))
    }
}

impl<'w, V: Vfs> Drop for ReadTxn<'w, V> {
    fn drop(&mut self) {
        self.wal.end_read(self.id);
    }
}
