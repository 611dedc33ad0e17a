//! Write-Ahead Log: frame encoding, the append path, the snapshot overlay
//! index, the reader registry, checkpointing, and crash recovery (§4.3).
//!
//! The Pager <-> WAL relationship is explicitly non-owning in both
//! directions (§9, "Cyclic references"): `Wal` never stores a `Pager`
//! reference; checkpoint and the memory-pressure flush path both receive
//! `&Pager<V>` as an ordinary parameter instead.

mod frame;
mod reader;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use zerocopy::{little_endian::U32, little_endian::U64, AsBytes, FromBytes, FromZeroes, Unaligned};

pub use frame::{FrameType, MAX_FRAME_HEADER_SIZE};
pub use reader::ReadTxn;

use crate::error::{DbError, Result};
use crate::header::DbHeader;
use crate::pager::{PageId, Pager};
use crate::vfs::{Vfs, VfsFile};
use reader::ReaderRegistry;

pub type Lsn = u64;

pub const WAL_HEADER_SIZE: usize = 32;
const WAL_MAGIC: [u8; 8] = *b"DDBWAL01";
pub const WAL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct WalHeaderBytes {
    magic: [u8; 8],
    version: U32,
    page_size: U32,
    end_offset: U64,
    reserved: U64,
}

/// Durability knob for the WAL commit fsync (§6.2 `walSyncMode`). `Off` is
/// test-only: it skips the fsync syscall entirely, trading torn-write safety
/// for throughput in scenarios like bulk loads with `BulkLoadDurability::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncMode {
    Full,
    Normal,
    Off,
}

/// Configuration affecting WAL behaviour that is not itself persisted.
#[derive(Debug, Clone)]
pub struct WalOptions {
    pub reader_warn_ms: u64,
    pub reader_timeout_ms: u64,
    pub max_wal_bytes_per_reader: u64,
    pub checkpoint_every_bytes: u64,
    pub checkpoint_every_ms: u64,
    pub checkpoint_memory_threshold: usize,
    pub checkpoint_check_interval: u64,
    pub wal_sync_mode: WalSyncMode,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            reader_warn_ms: 5_000,
            reader_timeout_ms: 30_000,
            max_wal_bytes_per_reader: 64 * 1024 * 1024,
            checkpoint_every_bytes: 4 * 1024 * 1024,
            checkpoint_every_ms: 5_000,
            checkpoint_memory_threshold: 16 * 1024 * 1024,
            checkpoint_check_interval: 1,
            wal_sync_mode: WalSyncMode::Full,
        }
    }
}

struct WriteState {
    end_offset: u64,
    last_checkpoint_lsn: Lsn,
    last_checkpoint_at: Instant,
    commits_since_checkpoint_check: u64,
}

struct PendingFrame {
    page_id: PageId,
    bytes: Vec<u8>,
}

pub struct CheckpointStats {
    pub pages_written: usize,
    pub safe_lsn: Lsn,
    pub truncated: bool,
}

/// Owns the WAL file, the in-memory snapshot overlay index, and the reader
/// registry. One `Wal` per open database, shared between the single writer
/// and every concurrent reader.
pub struct Wal<V: Vfs> {
    file: Mutex<V::File>,
    write_lock: Mutex<WriteState>,
    wal_end: AtomicU64,
    index: RwLock<HashMap<PageId, Vec<(Lsn, u64)>>>,
    dirty_since_checkpoint: Mutex<HashSet<PageId>>,
    readers: Mutex<ReaderRegistry>,
    page_size: usize,
    options: WalOptions,
}

impl<V: Vfs> Wal<V> {
    /// Opens (or initializes) the WAL and runs recovery (§4.3 "Recovery").
    pub fn open(mut file: V::File, page_size: usize, options: WalOptions) -> Result<Self> {
        let size = file.size()?;
        let header = if size < WAL_HEADER_SIZE as u64 {
            let header = WalHeaderBytes {
                magic: WAL_MAGIC,
                version: WAL_FORMAT_VERSION.into(),
                page_size: (page_size as u32).into(),
                end_offset: 0u64.into(),
                reserved: 0u64.into(),
            };
            let bytes = header.as_bytes().to_vec();
            file.write_at(0, &bytes)?;
            file.fsync()?;
            header
        } else {
            let mut bytes = [0u8; WAL_HEADER_SIZE];
            file.read_at(0, &mut bytes)?;
            let header = WalHeaderBytes::read_from(&bytes[..])
                .ok_or_else(|| DbError::corruption("truncated WAL header"))?;
            if header.magic != WAL_MAGIC {
                return Err(DbError::corruption("bad WAL header magic"));
            }
            header
        };

        let wal = Self {
            file: Mutex::new(file),
            write_lock: Mutex::new(WriteState {
                end_offset: header.end_offset.get(),
                last_checkpoint_lsn: 0,
                last_checkpoint_at: Instant::now(),
                commits_since_checkpoint_check: 0,
            }),
            wal_end: AtomicU64::new(0),
            index: RwLock::new(HashMap::new()),
            dirty_since_checkpoint: Mutex::new(HashSet::new()),
            readers: Mutex::new(ReaderRegistry::new()),
            page_size,
            options,
        };

        wal.recover(header.end_offset.get())?;
        Ok(wal)
    }

    /// Scans committed frames from offset 32 up to `end_offset`, rebuilding
    /// `index`, `dirty_since_checkpoint`, and `wal_end` from scratch.
    fn recover(&self, end_offset: u64) -> Result<()> {
        if end_offset == 0 {
            return Ok(());
        }

        let mut file = self.file.lock().unwrap();
        let mut pos: u64 = 0;
        let mut pending: Vec<(PageId, Lsn, u64)> = Vec::new();
        let mut last_commit: Lsn = 0;
        let mut last_checkpoint_lsn: Lsn = 0;

        let mut index = self.index.write().unwrap();
        let mut dirty = self.dirty_since_checkpoint.lock().unwrap();

        while pos < end_offset {
            let abs_offset = WAL_HEADER_SIZE as u64 + pos;
            let mut head = [0u8; frame::FRAME_HEADER_SIZE];
            let n = file.read_at(abs_offset, &mut head)?;
            if n < head.len() {
                log::warn!("WAL recovery: truncated frame header at offset {pos}, stopping scan");
                break;
            }
            let frame_type = frame::FrameType::from_byte(head[0]);
            let page_id = u32::from_le_bytes(head[1..5].try_into().unwrap());

            let Some(frame_type) = frame_type else {
                log::warn!("WAL recovery: unknown frame type at offset {pos}, stopping scan");
                break;
            };
            let payload_len = frame_type.payload_len(self.page_size);
            let frame_len = (frame::FRAME_HEADER_SIZE + payload_len + frame::FRAME_TRAILER_SIZE) as u64;
            if pos + frame_len > end_offset {
                log::warn!("WAL recovery: frame at offset {pos} exceeds logical end, stopping scan");
                break;
            }
            let payload_offset = abs_offset + frame::FRAME_HEADER_SIZE as u64;
            let next_pos = pos + frame_len;

            match frame_type {
                frame::FrameType::Page => {
                    pending.push((page_id, next_pos, payload_offset));
                }
                frame::FrameType::Commit => {
                    for (pid, lsn, off) in pending.drain(..) {
                        index.entry(pid).or_default().push((lsn, off));
                        dirty.insert(pid);
                    }
                    last_commit = next_pos;
                }
                frame::FrameType::Checkpoint => {
                    let mut payload = [0u8; 8];
                    file.read_at(payload_offset, &mut payload)?;
                    last_checkpoint_lsn = u64::from_le_bytes(payload);
                    pending.clear();
                }
            }

            pos = next_pos;
        }

        if !pending.is_empty() {
            log::warn!(
                "WAL recovery: {} uncommitted frame(s) discarded",
                pending.len()
            );
        }

        for entries in index.values_mut() {
            entries.sort_by_key(|(lsn, _)| *lsn);
        }

        drop(index);
        drop(dirty);

        self.wal_end.store(last_commit, Ordering::SeqCst);
        let mut state = self.write_lock.lock().unwrap();
        state.end_offset = pos;
        state.last_checkpoint_lsn = last_checkpoint_lsn;
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Current published snapshot boundary (§4.3, "Ordering guarantees").
    pub fn wal_end(&self) -> Lsn {
        self.wal_end.load(Ordering::SeqCst)
    }

    /// Highest page id with a committed frame in the index, or 0 if none.
    /// Used at `Db::open` to recover the logical database size for pages
    /// that were committed to the WAL but never checkpointed into the main
    /// file before a restart.
    pub fn max_indexed_page(&self) -> PageId {
        self.index.read().unwrap().keys().copied().max().unwrap_or(0)
    }

    pub fn last_checkpoint_lsn(&self) -> Lsn {
        self.write_lock.lock().unwrap().last_checkpoint_lsn
    }

    /// Acquires `wal.lock`, the single-writer mutex (§5).
    pub fn begin_write(&self) -> WalWriter<'_, V> {
        let guard = self.write_lock.lock().unwrap();
        WalWriter {
            wal: self,
            guard,
            pending: Vec::new(),
            touched: Vec::new(),
        }
    }

    /// Begins a snapshot read at the current `walEnd` (§4.3, §5).
    pub fn begin_read(&self) -> ReadTxn<'_, V> {
        let snapshot = self.wal_end();
        let mut readers = self.readers.lock().unwrap();
        let id = readers.register(snapshot);
        ReadTxn::new(self, id, snapshot, readers.aborted_flag(id))
    }

    pub(crate) fn end_read(&self, reader_id: u64) {
        self.readers.lock().unwrap().remove(reader_id);
    }

    /// Binary-searches the snapshot overlay for the newest version of
    /// `page_id` at or before `snapshot` (§4.3, "Snapshot overlay").
    pub fn get_page_at_or_before(&self, page_id: PageId, snapshot: Lsn) -> Option<(Lsn, u64)> {
        let index = self.index.read().unwrap();
        let entries = index.get(&page_id)?;
        let idx = entries.partition_point(|(lsn, _)| *lsn <= snapshot);
        if idx == 0 {
            None
        } else {
            Some(entries[idx - 1])
        }
    }

    /// Reads a frame's page payload given a previously recorded location.
    pub fn read_frame_payload(&self, payload_offset: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size];
        let mut file = self.file.lock().unwrap();
        let n = file.read_at(payload_offset, &mut buf)?;
        if n < buf.len() {
            return Err(DbError::corruption("short read of WAL frame payload"));
        }
        Ok(buf)
    }

    fn min_reader_snapshot(&self) -> Option<Lsn> {
        self.readers.lock().unwrap().min_snapshot()
    }

    /// Applies the reader warn/timeout/WAL-pinning policy (§4.3, checkpoint
    /// step 2). Returns the number of readers aborted.
    fn apply_reader_policy(&self, current_end: u64) -> usize {
        let mut readers = self.readers.lock().unwrap();
        readers.apply_policy(
            current_end,
            Duration::from_millis(self.options.reader_warn_ms),
            Duration::from_millis(self.options.reader_timeout_ms),
            self.options.max_wal_bytes_per_reader,
        )
    }

    fn estimate_index_memory(&self) -> usize {
        let index = self.index.read().unwrap();
        index
            .values()
            .map(|v| v.len() * std::mem::size_of::<(Lsn, u64)>())
            .sum()
    }

    /// Whether an auto-checkpoint should run now, given byte/time/memory
    /// thresholds and the check-interval deferral (§4.3, "Auto-checkpoint
    /// triggers").
    pub fn should_checkpoint(&self) -> bool {
        let mut state = self.write_lock.lock().unwrap();
        state.commits_since_checkpoint_check += 1;
        if state.commits_since_checkpoint_check < self.options.checkpoint_check_interval {
            return state.end_offset as u64 >= self.options.checkpoint_every_bytes;
        }
        state.commits_since_checkpoint_check = 0;

        let by_bytes = state.end_offset >= self.options.checkpoint_every_bytes;
        let by_time =
            state.last_checkpoint_at.elapsed() >= Duration::from_millis(self.options.checkpoint_every_ms);
        drop(state);
        let by_memory = self.estimate_index_memory() >= self.options.checkpoint_memory_threshold;
        by_bytes || by_time || by_memory
    }

    /// Runs the checkpoint protocol (§4.3, "Checkpoint protocol").
    pub fn checkpoint(&self, pager: &Pager<V>, header: &mut DbHeader) -> Result<CheckpointStats> {
        // Phase 1: plan, under wal.lock.
        let (last_commit, safe_lsn, end_offset_before) = {
            let state = self.write_lock.lock().unwrap();
            let last_commit = self.wal_end();
            self.apply_reader_policy(state.end_offset);
            let safe_lsn = match self.min_reader_snapshot() {
                Some(min) => last_commit.min(min),
                None => last_commit,
            };
            (last_commit, safe_lsn, state.end_offset)
        };

        // Phase 2: copy eligible pages, without wal.lock.
        let to_checkpoint: Vec<PageId> = {
            let dirty = self.dirty_since_checkpoint.lock().unwrap();
            dirty.iter().copied().collect()
        };

        let mut pages_written = 0usize;
        for page_id in to_checkpoint {
            let Some((lsn, payload_offset)) = self.get_page_at_or_before(page_id, safe_lsn) else {
                continue;
            };
            if lsn > safe_lsn {
                continue;
            }
            if let Some(outcome) = self.check_failpoint("checkpoint_write_page") {
                outcome?;
            }
            let payload = self.read_frame_payload(payload_offset)?;
            pager.write_page_to_file(page_id, &payload)?;
            pager.invalidate(page_id);
            pages_written += 1;
        }

        if let Some(outcome) = self.check_failpoint("checkpoint_fsync") {
            outcome?;
        }
        pager.fsync()?;
        header.set_last_checkpoint_lsn(safe_lsn);

        // Phase 3: finalize, under wal.lock again.
        let mut state = self.write_lock.lock().unwrap();
        state.last_checkpoint_lsn = safe_lsn;
        state.last_checkpoint_at = Instant::now();

        let checkpoint_frame = frame::encode_checkpoint_frame(safe_lsn);
        let abs_offset = WAL_HEADER_SIZE as u64 + state.end_offset;
        if let Some(outcome) = self.check_failpoint("checkpoint_wal_fsync") {
            outcome?;
        }
        {
            let mut file = self.file.lock().unwrap();
            file.write_at(abs_offset, &checkpoint_frame)?;
            file.fsync()?;
        }
        state.end_offset += checkpoint_frame.len() as u64;

        let no_new_commits = state.end_offset == end_offset_before + checkpoint_frame.len() as u64;
        let readers_past_commit = {
            let readers = self.readers.lock().unwrap();
            readers.all_at_or_past(last_commit)
        };

        let truncated = if no_new_commits && readers_past_commit {
            self.truncate_locked(&mut state)?;
            true
        } else {
            let mut index = self.index.write().unwrap();
            for entries in index.values_mut() {
                entries.retain(|(lsn, _)| *lsn > safe_lsn);
            }
            index.retain(|_, entries| !entries.is_empty());
            let mut dirty = self.dirty_since_checkpoint.lock().unwrap();
            dirty.retain(|page_id| index.contains_key(page_id));
            false
        };

        Ok(CheckpointStats {
            pages_written,
            safe_lsn,
            truncated,
        })
    }

    fn truncate_locked(&self, state: &mut WriteState) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.truncate(WAL_HEADER_SIZE as u64)?;
        let header = WalHeaderBytes {
            magic: WAL_MAGIC,
            version: WAL_FORMAT_VERSION.into(),
            page_size: (self.page_size as u32).into(),
            end_offset: 0u64.into(),
            reserved: 0u64.into(),
        };
        file.write_at(0, header.as_bytes())?;
        file.fsync()?;
        drop(file);

        state.end_offset = 0;
        self.index.write().unwrap().clear();
        self.dirty_since_checkpoint.lock().unwrap().clear();
        self.wal_end.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn check_failpoint(&self, label: &str) -> Option<Result<()>> {
        let file = self.file.lock().unwrap();
        match file.failpoint(label) {
            crate::vfs::faulty::FailpointOutcome::Pass => None,
            crate::vfs::faulty::FailpointOutcome::Fail => {
                Some(Err(DbError::io(format!("injected failure at {label}"))))
            }
            crate::vfs::faulty::FailpointOutcome::Partial(_) => {
                Some(Err(DbError::io(format!("injected partial write at {label}"))))
            }
        }
    }
}

/// Holds `wal.lock` for the duration of one write transaction.
pub struct WalWriter<'w, V: Vfs> {
    wal: &'w Wal<V>,
    guard: MutexGuard<'w, WriteState>,
    pending: Vec<PendingFrame>,
    touched: Vec<(PageId, Lsn, u64)>,
}

impl<'w, V: Vfs> WalWriter<'w, V> {
    pub fn write_page(&mut self, page_id: PageId, bytes: &[u8]) {
        self.pending.push(PendingFrame {
            page_id,
            bytes: bytes.to_vec(),
        });
    }

    /// Appends a single Page frame immediately, ahead of commit, so the
    /// Pager can relieve memory pressure on a dirty overlay mid-transaction
    /// (§4.2, "Page cache"). The frame is physically durable on disk but not
    /// yet visible to other readers; it only enters the shared index once
    /// this transaction's `commit()` runs.
    pub fn flush_page_for_pressure(&mut self, page_id: PageId, bytes: &[u8]) -> Result<(Lsn, u64)> {
        if let Some(outcome) = self.check_failpoint("wal_write_frame") {
            outcome?;
        }
        let frame = frame::encode_page_frame(page_id, bytes);
        let abs_offset = WAL_HEADER_SIZE as u64 + self.guard.end_offset;
        let payload_offset = abs_offset + frame::FRAME_HEADER_SIZE as u64;
        {
            let mut file = self.wal.file.lock().unwrap();
            file.write_at(abs_offset, &frame)?;
        }
        self.guard.end_offset += frame.len() as u64;
        let lsn = self.guard.end_offset;
        self.touched.push((page_id, lsn, payload_offset));
        Ok((lsn, payload_offset))
    }

    /// Encodes all still-pending frames plus a terminating Commit frame
    /// into one contiguous buffer and writes it in a single call, then
    /// fsyncs and publishes `walEnd` (§4.3, "Append path").
    pub fn commit(mut self) -> Result<Lsn> {
        let page_size = self.wal.page_size;
        let base_offset = WAL_HEADER_SIZE as u64 + self.guard.end_offset;

        let mut buf = Vec::with_capacity(
            self.pending
                .iter()
                .map(|p| frame::FRAME_HEADER_SIZE + page_size + frame::FRAME_TRAILER_SIZE)
                .sum::<usize>()
                + frame::FRAME_HEADER_SIZE
                + frame::FRAME_TRAILER_SIZE,
        );

        let mut newly_touched = Vec::with_capacity(self.pending.len());
        let mut offset = base_offset;
        for pending in &self.pending {
            let frame = frame::encode_page_frame(pending.page_id, &pending.bytes);
            let payload_offset = offset + frame::FRAME_HEADER_SIZE as u64;
            newly_touched.push((pending.page_id, payload_offset));
            buf.extend_from_slice(&frame);
            offset += frame.len() as u64;
        }
        let commit_frame = frame::encode_commit_frame();
        buf.extend_from_slice(&commit_frame);
        offset += commit_frame.len() as u64;
        let commit_lsn = offset - WAL_HEADER_SIZE as u64;

        if let Some(outcome) = self.check_failpoint("wal_write_frame") {
            outcome?;
        }

        // §4.3: "if mmap is supported and capacity suffices, writes directly
        // into the mapped region; otherwise issues a single write()". The
        // mmap fast path is future work (it needs a persistent MmapRegion
        // sized ahead via ensureWalMmapCapacity, §9); both VfsFile impls
        // converge on a single write_at call for now, which is equally a
        // single syscall for OsFile.
        {
            let mut file = self.wal.file.lock().unwrap();
            file.write_at(base_offset, &buf)?;
        }

        // Update the WAL header's logical end-offset in place, then fsync
        // (§4.3: "header's logical end-offset is updated in place, followed
        // by one fsync").
        let mut header_bytes = [0u8; WAL_HEADER_SIZE];
        {
            let mut file = self.wal.file.lock().unwrap();
            file.read_at(0, &mut header_bytes)?;
        }
        header_bytes[16..24].copy_from_slice(&commit_lsn.to_le_bytes());

        if let Some(outcome) = self.check_failpoint("wal_fsync") {
            outcome?;
        }
        {
            let mut file = self.wal.file.lock().unwrap();
            file.write_at(0, &header_bytes)?;
            if self.wal.options.wal_sync_mode != WalSyncMode::Off {
                file.fsync()?;
            }
        }

        self.guard.end_offset = commit_lsn;

        let mut index = self.wal.index.write().unwrap();
        let mut dirty = self.wal.dirty_since_checkpoint.lock().unwrap();
        for (page_id, lsn, payload_offset) in self.touched.drain(..) {
            index.entry(page_id).or_default().push((lsn, payload_offset));
            dirty.insert(page_id);
        }
        for (page_id, payload_offset) in newly_touched {
            index.entry(page_id).or_default().push((commit_lsn, payload_offset));
            dirty.insert(page_id);
        }
        drop(index);
        drop(dirty);

        self.wal.wal_end.store(commit_lsn, Ordering::SeqCst);
        Ok(commit_lsn)
    }

    /// Discards pending frames. Nothing durable has happened yet for this
    /// transaction (flushed pressure-relief frames aside, which simply stay
    /// un-indexed and are overwritten by the next writer's frames).
    pub fn rollback(self) {
        drop(self);
    }

    fn check_failpoint(&self, label: &str) -> Option<Result<()>> {
        let file = self.wal.file.lock().unwrap();
        match file.failpoint(label) {
            crate::vfs::faulty::FailpointOutcome::Pass => None,
            crate::vfs::faulty::FailpointOutcome::Fail => {
                Some(Err(DbError::io(format!("injected failure at {label}"))))
            }
            crate::vfs::faulty::FailpointOutcome::Partial(_) => {
                Some(Err(DbError::io(format!("injected partial write at {label}"))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{OsVfs, Vfs as _};

    fn new_wal(page_size: usize) -> Wal<OsVfs> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wal");
        std::mem::forget(dir);
        let file = OsVfs.open(&path, true).unwrap();
        Wal::open(file, page_size, WalOptions::default()).unwrap()
    }

    #[test]
    fn commit_publishes_wal_end_and_index() {
        let wal = new_wal(64);
        let mut writer = wal.begin_write();
        writer.write_page(1, &[7u8; 64]);
        let lsn = writer.commit().unwrap();
        assert_eq!(wal.wal_end(), lsn);
        let (found_lsn, offset) = wal.get_page_at_or_before(1, lsn).unwrap();
        assert_eq!(found_lsn, lsn);
        let payload = wal.read_frame_payload(offset).unwrap();
        assert_eq!(payload, vec![7u8; 64]);
    }

    #[test]
    fn snapshot_isolation_sees_only_committed_prior_versions() {
        let wal = new_wal(64);
        let mut w1 = wal.begin_write();
        w1.write_page(1, &[1u8; 64]);
        let lsn1 = w1.commit().unwrap();

        let reader = wal.begin_read();
        assert_eq!(reader.snapshot(), lsn1);

        let mut w2 = wal.begin_write();
        w2.write_page(1, &[2u8; 64]);
        w2.commit().unwrap();

        let (found_lsn, _) = wal.get_page_at_or_before(1, reader.snapshot()).unwrap();
        assert_eq!(found_lsn, lsn1);
    }

    #[test]
    fn recovery_replays_committed_frames_and_drops_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wal");
        let file = OsVfs.open(&path, true).unwrap();
        let wal = Wal::open(file, 64, WalOptions::default()).unwrap();
        let mut writer = wal.begin_write();
        writer.write_page(3, &[9u8; 64]);
        let lsn = writer.commit().unwrap();
        drop(wal);

        let file = OsVfs.open(&path, true).unwrap();
        let reopened = Wal::open(file, 64, WalOptions::default()).unwrap();
        assert_eq!(reopened.wal_end(), lsn);
        assert!(reopened.get_page_at_or_before(3, lsn).is_some());
    }
}
