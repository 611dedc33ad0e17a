//! Overflow chains: singly linked lists of pages holding a value too large
//! to fit inline in a B+Tree leaf cell (§3.1, "Overflow Page"; §4.4).

use super::page::{decode_overflow_page, encode_overflow_page, overflow_capacity};
use crate::pager::txn::PageTxn;
use crate::pager::PageId;
use crate::vfs::Vfs;
use crate::error::Result;

/// Writes `bytes` across as many overflow pages as needed and returns the
/// head page id.
pub fn write_chain<V: Vfs>(txn: &mut PageTxn<V>, bytes: &[u8]) -> Result<PageId> {
    let capacity = overflow_capacity(txn.page_size());
    let mut chunks: Vec<&[u8]> = bytes.chunks(capacity).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    // Pages must be allocated tail-first so each chunk's `next` pointer is
    // known before that page is written.
    let mut next: PageId = 0;
    for chunk in chunks.into_iter().rev() {
        let (page_id, page) = txn.new_page()?;
        page.copy_from_slice(&encode_overflow_page(next, chunk, page.len()));
        next = page_id;
    }
    Ok(next)
}

/// Reads an entire overflow chain starting at `head` back into one buffer.
pub fn read_chain<V: Vfs>(txn: &PageTxn<V>, head: PageId) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut page_id = head;
    while page_id != 0 {
        let page = txn.page(page_id)?;
        let (next, chunk) = decode_overflow_page(&page)?;
        out.extend_from_slice(chunk);
        page_id = next;
    }
    Ok(out)
}

/// Frees every page in the chain starting at `head`.
pub fn free_chain<V: Vfs>(txn: &mut PageTxn<V>, head: PageId) -> Result<()> {
    let mut page_id = head;
    while page_id != 0 {
        let page = txn.page(page_id)?;
        let (next, _) = decode_overflow_page(&page)?;
        txn.free_page(page_id)?;
        page_id = next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::Pager;
    use crate::vfs::{OsVfs, Vfs as _};

    fn new_pager(page_size: usize) -> Pager<OsVfs> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("o.db");
        std::mem::forget(dir);
        let file = OsVfs.open(&path, true).unwrap();
        Pager::new(file, page_size, 64)
    }

    #[test]
    fn chain_round_trips_across_multiple_pages() {
        let pager = new_pager(32); // capacity 24 bytes/page
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let data: Vec<u8> = (0..100u8).collect();
        let head = write_chain(&mut txn, &data).unwrap();
        let read_back = read_chain(&txn, head).unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn free_chain_releases_every_page() {
        let pager = new_pager(32);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let data = vec![7u8; 100];
        let head = write_chain(&mut txn, &data).unwrap();
        free_chain(&mut txn, head).unwrap();
        assert!(txn.freelist_count > 0 || txn.freelist_head != 0);
    }
}
