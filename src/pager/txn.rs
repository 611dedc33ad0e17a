//! Per-transaction dirty-page overlay (§3.3, §4.2). Generalizes
//! `squeak::physical::transaction::Transaction`: reads check the local
//! overlay first, then an optional WAL snapshot, then fall back to the
//! shared [`Pager`] cache/file; writes always land in the overlay and are
//! only durable once the owning transaction hands them to the WAL at
//! commit.

use std::collections::BTreeMap;

use super::{Pager, PageId};
use crate::error::Result;
use crate::vfs::Vfs;
use crate::wal::{Lsn, Wal};

/// A page the transaction has already flushed to the WAL under memory
/// pressure (§4.2, §4.3) before commit. Recorded so a later read of the
/// same page within the same transaction can still find the latest
/// version, by asking the WAL for the frame at this offset.
#[derive(Debug, Clone, Copy)]
pub struct FlushedLocation {
    pub lsn: u64,
    pub payload_offset: u64,
}

pub struct PageTxn<'p, V: Vfs> {
    pager: &'p Pager<V>,
    /// The WAL and the snapshot this transaction should see through it, if
    /// any. A write transaction is given the current `walEnd` so it builds
    /// on every prior commit even before those pages are checkpointed into
    /// the main file; a read-only transaction is given its own frozen
    /// snapshot so it keeps seeing exactly the versions visible when it
    /// began (§4.3, "Snapshot overlay"; §5, "Ordering guarantees"). `None`
    /// means read straight from the pager/file, which is what every
    /// existing single-pager unit test in this module still does.
    wal_snapshot: Option<(&'p Wal<V>, Lsn)>,
    database_size: u32,
    pub(crate) freelist_head: PageId,
    pub(crate) freelist_count: u32,
    dirty_pages: BTreeMap<PageId, Vec<u8>>,
    flushed: BTreeMap<PageId, FlushedLocation>,
}

impl<'p, V: Vfs> PageTxn<'p, V> {
    pub fn new(
        pager: &'p Pager<V>,
        database_size: u32,
        freelist_head: PageId,
        freelist_count: u32,
    ) -> Self {
        Self {
            pager,
            wal_snapshot: None,
            database_size,
            freelist_head,
            freelist_count,
            dirty_pages: BTreeMap::new(),
            flushed: BTreeMap::new(),
        }
    }

    /// Routes every first-touch page read through `wal`'s snapshot overlay
    /// at `snapshot` before falling back to the pager/file (§4.3, §9).
    pub fn with_wal_snapshot(mut self, wal: &'p Wal<V>, snapshot: Lsn) -> Self {
        self.wal_snapshot = Some((wal, snapshot));
        self
    }

    pub fn pager(&self) -> &'p Pager<V> {
        self.pager
    }

    fn read_through(&self, page_id: PageId) -> Result<Vec<u8>> {
        if let Some((wal, snapshot)) = self.wal_snapshot {
            if let Some((_, payload_offset)) = wal.get_page_at_or_before(page_id, snapshot) {
                return wal.read_frame_payload(payload_offset);
            }
        }
        Ok(self.pager.get_page(page_id)?.to_vec())
    }

    pub fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    pub fn database_size(&self) -> u32 {
        self.database_size
    }

    /// Location of `page_id` if this transaction already pushed it to the
    /// WAL under memory pressure; `None` means the caller should read it
    /// normally (dirty overlay, then pager/file).
    pub fn flushed_location(&self, page_id: PageId) -> Option<FlushedLocation> {
        self.flushed.get(&page_id).copied()
    }

    pub fn is_dirty(&self, page_id: PageId) -> bool {
        self.dirty_pages.contains_key(&page_id)
    }

    /// Reads a page as it currently stands within this transaction: the
    /// dirty overlay if present, otherwise the shared pager/file content.
    /// Callers that must also honor `flushed_location` (anything that can
    /// run after a mid-transaction WAL flush) should check that first.
    pub fn page(&self, page_id: PageId) -> Result<Vec<u8>> {
        if let Some(bytes) = self.dirty_pages.get(&page_id) {
            return Ok(bytes.clone());
        }
        self.read_through(page_id)
    }

    /// Returns a mutable view of `page_id`, copying it into the dirty
    /// overlay on first touch.
    pub fn page_mut(&mut self, page_id: PageId) -> Result<&mut [u8]> {
        if !self.dirty_pages.contains_key(&page_id) {
            let initial = self.read_through(page_id)?;
            self.dirty_pages.insert(page_id, initial);
        }
        Ok(self.dirty_pages.get_mut(&page_id).unwrap())
    }

    /// Allocates a new page: reuse a freelist page if one is available,
    /// otherwise grow the logical database size by one page (§3.3, §4.2).
    pub fn new_page(&mut self) -> Result<(PageId, &mut [u8])> {
        if let Some(page_id) = super::freelist::pop_page(self)? {
            let page = self.page_mut(page_id)?;
            page.fill(0);
            return Ok((page_id, self.dirty_pages.get_mut(&page_id).unwrap()));
        }

        let page_id = self.database_size + 1;
        self.database_size = page_id;
        self.dirty_pages.insert(page_id, vec![0u8; self.page_size()]);
        Ok((page_id, self.dirty_pages.get_mut(&page_id).unwrap()))
    }

    /// Pushes `page_id` onto the freelist (§3.3, §4.2).
    pub fn free_page(&mut self, page_id: PageId) -> Result<()> {
        super::freelist::push_page(self, page_id)
    }

    /// Records that `page_id`'s current dirty content has been written to
    /// the WAL at `location`, and drops it from the in-memory overlay so
    /// cache pressure does not keep growing unbounded (§4.2).
    pub fn mark_flushed(&mut self, page_id: PageId, location: FlushedLocation) {
        self.dirty_pages.remove(&page_id);
        self.flushed.insert(page_id, location);
    }

    pub fn dirty_page_count(&self) -> usize {
        self.dirty_pages.len()
    }

    /// Picks an arbitrary still-dirty page to flush under memory pressure.
    /// `squeak` never needed an eviction policy at all (its cache is
    /// unbounded); this generalizes to pick the lowest page id, which is as
    /// good a tie-break as any absent real LRU ordering over the overlay.
    pub fn pick_page_to_flush(&self) -> Option<PageId> {
        self.dirty_pages.keys().next().copied()
    }

    /// Consumes the transaction, handing back every dirty page plus the
    /// final freelist/size bookkeeping, for the caller (the WAL commit
    /// path) to encode into frames.
    pub fn into_parts(self) -> (BTreeMap<PageId, Vec<u8>>, u32, PageId, u32) {
        (
            self.dirty_pages,
            self.database_size,
            self.freelist_head,
            self.freelist_count,
        )
    }
}
