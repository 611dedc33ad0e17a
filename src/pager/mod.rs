//! Paged file I/O: page allocation, the shared page cache, and the
//! rollback lock (§4.2). `Pager` owns the DB file handle and the clean-page
//! cache; a [`txn::PageTxn`] layers an in-memory overlay of dirty pages on
//! top of it for the duration of a single write transaction, mirroring how
//! `squeak::physical::transaction::Transaction` layers `dirty_pages` over
//! `squeak::physical::db::DB`.

pub mod cache;
pub mod freelist;
pub mod txn;

use std::sync::{Arc, Mutex, RwLock};

use crate::error::Result;
use crate::vfs::{Vfs, VfsFile};

pub use cache::PageBuf;
pub use txn::PageTxn;

pub type PageId = u32;

/// Owns file I/O and the shared clean-page cache. There is exactly one
/// `Pager` per open database, shared by the writer and every reader.
pub struct Pager<V: Vfs> {
    file: Mutex<V::File>,
    cache: cache::ShardedPageCache,
    page_size: usize,
    /// Held in write mode during rollback cache scrubbing, and in read mode
    /// by snapshot readers at critical moments, so readers never observe a
    /// half-reverted cache (§4.2, §5).
    rollback_lock: RwLock<()>,
}

impl<V: Vfs> Pager<V> {
    pub fn new(file: V::File, page_size: usize, cache_pages: usize) -> Self {
        Self {
            file: Mutex::new(file),
            cache: cache::ShardedPageCache::new(cache_pages),
            page_size,
            rollback_lock: RwLock::new(()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn rollback_lock(&self) -> &RwLock<()> {
        &self.rollback_lock
    }

    fn offset_of(&self, page_id: PageId) -> u64 {
        debug_assert!(page_id >= 1, "page id must be 1-based");
        (page_id as u64 - 1) * self.page_size as u64
    }

    /// Reads a page directly from the file, bypassing the cache. Pages past
    /// the current end of file (e.g. freshly allocated but not yet written)
    /// read back as all-zero, matching a sparse/just-grown file.
    pub fn read_page_from_file(&self, page_id: PageId) -> Result<PageBuf> {
        let mut buf = vec![0u8; self.page_size];
        let offset = self.offset_of(page_id);
        let mut file = self.file.lock().unwrap();
        let n = file.read_at(offset, &mut buf)?;
        if n < buf.len() {
            buf[n..].fill(0);
        }
        Ok(Arc::from(buf))
    }

    /// Reads a page, preferring the shared cache.
    pub fn get_page(&self, page_id: PageId) -> Result<PageBuf> {
        if let Some(page) = self.cache.get(page_id) {
            return Ok(page);
        }
        let page = self.read_page_from_file(page_id)?;
        self.cache.insert(page_id, page.clone());
        Ok(page)
    }

    /// Writes `bytes` (exactly one page worth) directly to the file. Used
    /// by checkpoint to apply WAL-resident page images to the main file,
    /// and by header writes.
    pub fn write_page_to_file(&self, page_id: PageId, bytes: &[u8]) -> Result<()> {
        debug_assert_eq!(bytes.len(), self.page_size);
        let offset = self.offset_of(page_id);
        let mut file = self.file.lock().unwrap();
        file.write_at(offset, bytes)?;
        Ok(())
    }

    /// Drops a cache entry so the next read reloads authoritative content
    /// from the file (called after checkpoint writes a page, per §4.2).
    pub fn invalidate(&self, page_id: PageId) {
        self.cache.invalidate(page_id);
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    pub fn fsync(&self) -> Result<()> {
        self.file.lock().unwrap().fsync()
    }

    pub fn file_size(&self) -> Result<u64> {
        self.file.lock().unwrap().size()
    }

    pub fn with_file<R>(&self, f: impl FnOnce(&mut V::File) -> Result<R>) -> Result<R> {
        let mut file = self.file.lock().unwrap();
        f(&mut file)
    }
}
