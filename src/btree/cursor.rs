//! Ordered forward scans over a B+Tree (§4.4 `openCursor`/`openCursorAt`),
//! walking leaf pages via their sibling pointers rather than re-descending
//! from the root for every `next()`.

use super::page::{decode_internal_page, decode_leaf_page, page_type, LeafCell, PAGE_TYPE_INTERNAL, PAGE_TYPE_LEAF};
use crate::error::{DbError, Result};
use crate::pager::txn::PageTxn;
use crate::pager::PageId;
use crate::vfs::Vfs;

/// A forward-only cursor over a tree's leaves in key order.
pub struct Cursor<'t, V: Vfs> {
    txn: &'t PageTxn<'t, V>,
    cells: Vec<LeafCell>,
    sibling: PageId,
    pos: usize,
}

impl<'t, V: Vfs> Cursor<'t, V> {
    /// Positions at the first cell of the tree.
    pub fn open(txn: &'t PageTxn<'t, V>, root: PageId) -> Result<Self> {
        Self::open_at(txn, root, None)
    }

    /// Positions at the first cell whose key is `>= key` (or the start of
    /// the tree if `key` is `None`).
    pub fn open_at(txn: &'t PageTxn<'t, V>, root: PageId, key: Option<&[u8]>) -> Result<Self> {
        if root == 0 {
            return Ok(Self {
                txn,
                cells: Vec::new(),
                sibling: 0,
                pos: 0,
            });
        }

        let mut page_id = root;
        loop {
            let data = txn.page(page_id)?;
            match page_type(&data)? {
                PAGE_TYPE_LEAF => {
                    let (cells, sibling) = decode_leaf_page(&data)?;
                    let pos = match key {
                        Some(k) => cells.partition_point(|c| c.key.as_slice() < k),
                        None => 0,
                    };
                    return Ok(Self {
                        txn,
                        cells,
                        sibling,
                        pos,
                    });
                }
                PAGE_TYPE_INTERNAL => {
                    let (cells, rightmost) = decode_internal_page(&data)?;
                    page_id = match key {
                        Some(k) => cells
                            .iter()
                            .find(|c| k < c.key.as_slice())
                            .map(|c| c.child)
                            .unwrap_or(rightmost),
                        None => cells.first().map(|c| c.child).unwrap_or(rightmost),
                    };
                }
                other => return Err(DbError::corruption(format!("unexpected page type {other}"))),
            }
        }
    }

    /// Advances to and returns the next `(key, resolved value)` pair, or
    /// `None` once the last leaf is exhausted.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if self.pos < self.cells.len() {
                let cell = &self.cells[self.pos];
                let value = super::resolve_value(self.txn, &cell.value)?;
                let key = cell.key.clone();
                self.pos += 1;
                return Ok(Some((key, value)));
            }
            if self.sibling == 0 {
                return Ok(None);
            }
            let data = self.txn.page(self.sibling)?;
            let (cells, sibling) = decode_leaf_page(&data)?;
            self.cells = cells;
            self.sibling = sibling;
            self.pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{insert, key_from_rowid};
    use crate::pager::Pager;
    use crate::vfs::{OsVfs, Vfs as _};

    fn new_pager(page_size: usize) -> Pager<OsVfs> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.db");
        std::mem::forget(dir);
        let file = OsVfs.open(&path, true).unwrap();
        Pager::new(file, page_size, 64)
    }

    #[test]
    fn scans_all_rows_in_key_order_across_leaf_splits() {
        let pager = new_pager(128);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let mut root = 0;
        for rowid in 0..40i64 {
            let value = format!("row-{rowid}").into_bytes();
            root = insert(&mut txn, root, key_from_rowid(rowid), &value, false).unwrap();
        }

        let mut cursor = Cursor::open(&txn, root).unwrap();
        let mut seen = Vec::new();
        while let Some((key, _value)) = cursor.next().unwrap() {
            seen.push(crate::btree::rowid_from_key(&key));
        }
        assert_eq!(seen, (0..40i64).collect::<Vec<_>>());
    }

    #[test]
    fn open_at_skips_to_first_key_not_less_than() {
        let pager = new_pager(128);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let mut root = 0;
        for rowid in [0i64, 5, 10, 15, 20] {
            root = insert(&mut txn, root, key_from_rowid(rowid), b"v", false).unwrap();
        }

        let mut cursor = Cursor::open_at(&txn, root, Some(&key_from_rowid(7))).unwrap();
        let (key, _) = cursor.next().unwrap().unwrap();
        assert_eq!(crate::btree::rowid_from_key(&key), 10);
    }
}
