//! The B+Tree: variable-length cells, front-coded (delta) keys, splits,
//! and overflow chains (§4.4). Grounded in `squeak::physical::btree`'s
//! page/cell model, generalized from SQLite's read-only fixed record
//! format into one that also supports insert, delete, and splitting.
//!
//! Every operation takes an explicit `root: PageId` and returns whatever
//! new root the caller must remember (insert/delete can replace the root
//! when the tree grows a new level or starts from empty); there is no
//! `BTree` struct holding its own root; the Catalog and Storage layers own
//! that piece of state per table/index.

pub mod cursor;
pub mod overflow;
pub mod page;

use page::{
    decode_internal_page, decode_leaf_page, encode_internal_page, encode_leaf_page,
    encoded_internal_size, encoded_leaf_size, InternalCell, Key, LeafCell, LeafValue,
    PAGE_TYPE_INTERNAL, PAGE_TYPE_LEAF,
};

use crate::error::{DbError, Result};
use crate::pager::txn::PageTxn;
use crate::pager::PageId;
use crate::vfs::Vfs;

pub use page::{key_from_rowid, key_from_u32, key_from_u64, rowid_from_key};

enum InsertEffect {
    Updated(PageId),
    Split {
        left: PageId,
        separator: Key,
        right: PageId,
    },
}

/// Looks up `key`, returning its raw value bytes (overflow chains already
/// resolved) if present.
pub fn find<V: Vfs>(txn: &PageTxn<V>, root: PageId, key: &[u8]) -> Result<Option<Vec<u8>>> {
    if root == 0 {
        return Ok(None);
    }
    let mut page_id = root;
    loop {
        let data = txn.page(page_id)?;
        match page::page_type(&data)? {
            PAGE_TYPE_LEAF => {
                let (cells, _) = decode_leaf_page(&data)?;
                return match cells.iter().find(|c| c.key == key) {
                    Some(cell) => Ok(Some(resolve_value(txn, &cell.value)?)),
                    None => Ok(None),
                };
            }
            PAGE_TYPE_INTERNAL => {
                let (cells, rightmost) = decode_internal_page(&data)?;
                page_id = descend_target(&cells, rightmost, key);
            }
            other => return Err(DbError::corruption(format!("unexpected page type {other}"))),
        }
    }
}

fn descend_target(cells: &[InternalCell], rightmost: PageId, key: &[u8]) -> PageId {
    for cell in cells {
        if key < cell.key.as_slice() {
            return cell.child;
        }
    }
    rightmost
}

fn resolve_value<V: Vfs>(txn: &PageTxn<V>, value: &LeafValue) -> Result<Vec<u8>> {
    match value {
        LeafValue::Inline(bytes) => Ok(bytes.clone()),
        LeafValue::Overflow { head } => overflow::read_chain(txn, *head),
    }
}

/// Inserts `key` → `value`, returning the (possibly new) root page id.
/// When `check_unique` is set, a pre-existing `key` is rejected with
/// `ErrSql` rather than silently overwritten — callers wanting
/// update-or-replace semantics should use [`update`] instead.
pub fn insert<V: Vfs>(
    txn: &mut PageTxn<V>,
    root: PageId,
    key: Key,
    value: &[u8],
    check_unique: bool,
) -> Result<PageId> {
    if root == 0 {
        let (page_id, page) = txn.new_page()?;
        let page_size = page.len();
        let cell = LeafCell {
            key,
            value: LeafValue::Inline(value.to_vec()),
        };
        page.copy_from_slice(&encode_leaf_page(&[cell], 0, page_size));
        return Ok(page_id);
    }

    match insert_into_node(txn, root, key, value, check_unique)? {
        InsertEffect::Updated(page_id) => Ok(page_id),
        InsertEffect::Split {
            left,
            separator,
            right,
        } => {
            let (new_root, page) = txn.new_page()?;
            let page_size = page.len();
            let cells = [InternalCell {
                key: separator,
                child: left,
            }];
            page.copy_from_slice(&encode_internal_page(&cells, right, page_size));
            Ok(new_root)
        }
    }
}

/// Replaces the value for an existing `key`; fails if absent.
pub fn update<V: Vfs>(txn: &mut PageTxn<V>, root: PageId, key: &[u8], value: &[u8]) -> Result<PageId> {
    let leaf_page_id = locate_leaf(txn, root, key)?;
    let data = txn.page(leaf_page_id)?;
    let (mut cells, sibling) = decode_leaf_page(&data)?;
    let Some(pos) = cells.iter().position(|c| c.key == key) else {
        return Err(DbError::internal("update: key not found in located leaf"));
    };
    if let LeafValue::Overflow { head } = cells[pos].value {
        overflow::free_chain(txn, head)?;
    }
    cells[pos].value = pick_leaf_value(txn, value)?;
    write_leaf_or_split_in_place(txn, leaf_page_id, cells, sibling, root)
}

/// Rewrites a single already-located leaf page; if it now overflows, this
/// degrades into the same split path `insert` would have taken, reusing
/// `insert`'s machinery by re-running descent (acceptable: updates that
/// grow a value large enough to split a page are rare).
fn write_leaf_or_split_in_place<V: Vfs>(
    txn: &mut PageTxn<V>,
    leaf_page_id: PageId,
    cells: Vec<LeafCell>,
    sibling: PageId,
    root: PageId,
) -> Result<PageId> {
    let page_size = txn.page_size();
    if encoded_leaf_size(&cells) <= page_size {
        let page = txn.page_mut(leaf_page_id)?;
        page.copy_from_slice(&encode_leaf_page(&cells, sibling, page_size));
        Ok(root)
    } else {
        let (left_cells, separator, right_cells) = split_cells(cells);
        let (right_page_id, _) = txn.new_page()?;
        {
            let page = txn.page_mut(right_page_id)?;
            page.copy_from_slice(&encode_leaf_page(&right_cells, sibling, page_size));
        }
        {
            let page = txn.page_mut(leaf_page_id)?;
            page.copy_from_slice(&encode_leaf_page(&left_cells, right_page_id, page_size));
        }
        graft_split_into_parent(txn, root, leaf_page_id, separator, right_page_id)
    }
}

/// Finds the leaf page that would contain `key`, without mutating anything.
fn locate_leaf<V: Vfs>(txn: &PageTxn<V>, root: PageId, key: &[u8]) -> Result<PageId> {
    let mut page_id = root;
    loop {
        let data = txn.page(page_id)?;
        match page::page_type(&data)? {
            PAGE_TYPE_LEAF => return Ok(page_id),
            PAGE_TYPE_INTERNAL => {
                let (cells, rightmost) = decode_internal_page(&data)?;
                page_id = descend_target(&cells, rightmost, key);
            }
            other => return Err(DbError::corruption(format!("unexpected page type {other}"))),
        }
    }
}

/// Re-descends from `root` to find whichever internal page currently
/// points at `old_child`, and grafts a split result into it, recursing on
/// further splits exactly like [`insert_into_node`] would.
fn graft_split_into_parent<V: Vfs>(
    txn: &mut PageTxn<V>,
    root: PageId,
    old_child: PageId,
    separator: Key,
    new_right: PageId,
) -> Result<PageId> {
    if root == old_child {
        let (new_root, page) = txn.new_page()?;
        let page_size = page.len();
        let cells = [InternalCell {
            key: separator,
            child: old_child,
        }];
        page.copy_from_slice(&encode_internal_page(&cells, new_right, page_size));
        return Ok(new_root);
    }

    fn find_parent<V: Vfs>(txn: &PageTxn<V>, page_id: PageId, target: PageId) -> Result<Option<PageId>> {
        let data = txn.page(page_id)?;
        if page::page_type(&data)? != PAGE_TYPE_INTERNAL {
            return Ok(None);
        }
        let (cells, rightmost) = decode_internal_page(&data)?;
        if cells.iter().any(|c| c.child == target) || rightmost == target {
            return Ok(Some(page_id));
        }
        for cell in &cells {
            if let Some(found) = find_parent(txn, cell.child, target)? {
                return Ok(Some(found));
            }
        }
        find_parent(txn, rightmost, target)
    }

    let parent_id = find_parent(txn, root, old_child)?
        .ok_or_else(|| DbError::internal("graft: parent of split child not found"))?;
    apply_split_to_internal(txn, parent_id, old_child, separator, new_right)?;
    Ok(root)
}

fn apply_split_to_internal<V: Vfs>(
    txn: &mut PageTxn<V>,
    page_id: PageId,
    old_child: PageId,
    separator: Key,
    new_right: PageId,
) -> Result<()> {
    let data = txn.page(page_id)?;
    let (mut cells, mut rightmost) = decode_internal_page(&data)?;
    graft_child(&mut cells, &mut rightmost, old_child, separator, new_right);
    let page_size = txn.page_size();
    let page = txn.page_mut(page_id)?;
    page.copy_from_slice(&encode_internal_page(&cells, rightmost, page_size));
    Ok(())
}

fn graft_child(cells: &mut Vec<InternalCell>, rightmost: &mut PageId, old_child: PageId, separator: Key, new_right: PageId) {
    if let Some(i) = cells.iter().position(|c| c.child == old_child) {
        cells[i].child = new_right;
        cells.insert(
            i,
            InternalCell {
                key: separator,
                child: old_child,
            },
        );
    } else {
        debug_assert_eq!(*rightmost, old_child);
        *rightmost = new_right;
        cells.push(InternalCell {
            key: separator,
            child: old_child,
        });
    }
}

fn insert_into_node<V: Vfs>(
    txn: &mut PageTxn<V>,
    page_id: PageId,
    key: Key,
    value: &[u8],
    check_unique: bool,
) -> Result<InsertEffect> {
    let data = txn.page(page_id)?;
    match page::page_type(&data)? {
        PAGE_TYPE_LEAF => {
            let (mut cells, sibling) = decode_leaf_page(&data)?;
            let pos = cells.partition_point(|c| c.key < key);
            if check_unique && pos < cells.len() && cells[pos].key == key {
                return Err(DbError::sql(format!(
                    "duplicate key in unique index (insert at page {page_id})"
                )));
            }
            let leaf_value = pick_leaf_value(txn, value)?;
            cells.insert(pos, LeafCell { key, value: leaf_value });

            let page_size = txn.page_size();
            if encoded_leaf_size(&cells) <= page_size {
                let page = txn.page_mut(page_id)?;
                page.copy_from_slice(&encode_leaf_page(&cells, sibling, page_size));
                Ok(InsertEffect::Updated(page_id))
            } else {
                let (left_cells, separator, right_cells) = split_cells(cells);
                let (right_page_id, _) = txn.new_page()?;
                {
                    let page = txn.page_mut(right_page_id)?;
                    page.copy_from_slice(&encode_leaf_page(&right_cells, sibling, page_size));
                }
                {
                    let page = txn.page_mut(page_id)?;
                    page.copy_from_slice(&encode_leaf_page(&left_cells, right_page_id, page_size));
                }
                Ok(InsertEffect::Split {
                    left: page_id,
                    separator,
                    right: right_page_id,
                })
            }
        }
        PAGE_TYPE_INTERNAL => {
            let (mut cells, mut rightmost) = decode_internal_page(&data)?;
            let target_child = descend_target(&cells, rightmost, &key);
            match insert_into_node(txn, target_child, key, value, check_unique)? {
                InsertEffect::Updated(_) => Ok(InsertEffect::Updated(page_id)),
                InsertEffect::Split {
                    left,
                    separator,
                    right,
                } => {
                    graft_child(&mut cells, &mut rightmost, target_child, separator, right);
                    debug_assert!(left == target_child);

                    let page_size = txn.page_size();
                    if encoded_internal_size(&cells) <= page_size {
                        let page = txn.page_mut(page_id)?;
                        page.copy_from_slice(&encode_internal_page(&cells, rightmost, page_size));
                        Ok(InsertEffect::Updated(page_id))
                    } else {
                        let median = (cells.len() - 1) / 2;
                        let promoted = cells[median].key.clone();
                        let left_rightmost = cells[median].child;
                        let right_cells: Vec<InternalCell> = cells.split_off(median + 1);
                        let mut left_cells = cells;
                        left_cells.truncate(median);

                        let (right_page_id, _) = txn.new_page()?;
                        {
                            let page = txn.page_mut(right_page_id)?;
                            page.copy_from_slice(&encode_internal_page(&right_cells, rightmost, page_size));
                        }
                        {
                            let page = txn.page_mut(page_id)?;
                            page.copy_from_slice(&encode_internal_page(&left_cells, left_rightmost, page_size));
                        }
                        Ok(InsertEffect::Split {
                            left: page_id,
                            separator: promoted,
                            right: right_page_id,
                        })
                    }
                }
            }
        }
        other => Err(DbError::corruption(format!("unexpected page type {other}"))),
    }
}

/// Splits a leaf's cell list at the lower of the two middle cells
/// (left-biased, §4.4 "Implementation notes"), returning
/// `(left_cells, separator_key, right_cells)`.
fn split_cells(cells: Vec<LeafCell>) -> (Vec<LeafCell>, Key, Vec<LeafCell>) {
    let median = (cells.len() - 1) / 2;
    let mut cells = cells;
    let right_cells = cells.split_off(median + 1);
    let separator = right_cells[0].key.clone();
    (cells, separator, right_cells)
}

/// Decides whether `value` should be stored inline or pushed out to an
/// overflow chain (§4.4: inline when it fits, otherwise allocate an
/// overflow chain and store just the head page id in the cell).
fn pick_leaf_value<V: Vfs>(txn: &mut PageTxn<V>, value: &[u8]) -> Result<LeafValue> {
    let reserve = 128usize.min(txn.page_size() / 4);
    if value.len() + 32 <= txn.page_size().saturating_sub(reserve) {
        Ok(LeafValue::Inline(value.to_vec()))
    } else {
        let head = overflow::write_chain(txn, value)?;
        Ok(LeafValue::Overflow { head })
    }
}

/// Removes `key` if present; no merge/rebalance is performed afterward
/// (§4.4, baseline behavior — `rebuildIndex` offers offline compaction).
pub fn delete<V: Vfs>(txn: &mut PageTxn<V>, root: PageId, key: &[u8]) -> Result<bool> {
    if root == 0 {
        return Ok(false);
    }
    let leaf_page_id = locate_leaf(txn, root, key)?;
    let data = txn.page(leaf_page_id)?;
    let (mut cells, sibling) = decode_leaf_page(&data)?;
    let Some(pos) = cells.iter().position(|c| c.key == key) else {
        return Ok(false);
    };
    if let LeafValue::Overflow { head } = cells[pos].value {
        overflow::free_chain(txn, head)?;
    }
    cells.remove(pos);
    let page_size = txn.page_size();
    let page = txn.page_mut(leaf_page_id)?;
    page.copy_from_slice(&encode_leaf_page(&cells, sibling, page_size));
    Ok(true)
}

/// Removes the cell matching both `key` and `value` exactly — used by
/// non-unique indexes that store one cell per (key, rowid) pair rather
/// than overwriting on collision (§4.4 `deleteKeyValue`).
pub fn delete_key_value<V: Vfs>(
    txn: &mut PageTxn<V>,
    root: PageId,
    key: &[u8],
    value: &[u8],
) -> Result<bool> {
    if root == 0 {
        return Ok(false);
    }
    let leaf_page_id = locate_leaf(txn, root, key)?;
    let data = txn.page(leaf_page_id)?;
    let (mut cells, sibling) = decode_leaf_page(&data)?;
    let Some(pos) = cells.iter().position(|c| {
        c.key == key
            && resolve_value(txn, &c.value)
                .map(|v| v == value)
                .unwrap_or(false)
    }) else {
        return Ok(false);
    };
    if let LeafValue::Overflow { head } = cells[pos].value {
        overflow::free_chain(txn, head)?;
    }
    cells.remove(pos);
    let page_size = txn.page_size();
    let page = txn.page_mut(leaf_page_id)?;
    page.copy_from_slice(&encode_leaf_page(&cells, sibling, page_size));
    Ok(true)
}

/// Bulk-builds a brand-new tree from already-sorted `(key, value)` pairs,
/// bottom-up: pack leaves to capacity, chain them via next-leaf pointers,
/// then build each internal level the same way over the level below
/// (§4.4 `bulkBuildFromSorted`).
pub fn bulk_build_from_sorted<V: Vfs>(
    txn: &mut PageTxn<V>,
    pairs: impl IntoIterator<Item = (Key, Vec<u8>)>,
) -> Result<PageId> {
    let page_size = txn.page_size();

    // Decide value placement (inline vs. overflow) and pack cells into
    // leaf-sized groups first, deferring page allocation until every
    // group's membership is final — that way each leaf's sibling pointer
    // can be filled in with the *next* leaf's real page id as we go.
    let mut groups: Vec<Vec<LeafCell>> = Vec::new();
    let mut current: Vec<LeafCell> = Vec::new();
    for (key, value_bytes) in pairs {
        let value = pick_leaf_value(txn, &value_bytes)?;
        let mut candidate = current.clone();
        candidate.push(LeafCell { key, value });
        if !current.is_empty() && encoded_leaf_size(&candidate) > page_size {
            groups.push(std::mem::take(&mut current));
            current = candidate.split_off(candidate.len() - 1);
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    if groups.is_empty() {
        return Ok(0);
    }

    let leaf_ids: Vec<PageId> = groups
        .iter()
        .map(|_| txn.new_page().map(|(id, _)| id))
        .collect::<Result<_>>()?;
    let first_keys: Vec<Key> = groups.iter().map(|g| g[0].key.clone()).collect();

    for (i, group) in groups.iter().enumerate() {
        let sibling = leaf_ids.get(i + 1).copied().unwrap_or(0);
        let page = txn.page_mut(leaf_ids[i])?;
        page.copy_from_slice(&encode_leaf_page(group, sibling, page_size));
    }

    build_level(txn, leaf_ids, first_keys, page_size)
}

fn build_level<V: Vfs>(
    txn: &mut PageTxn<V>,
    child_ids: Vec<PageId>,
    first_keys: Vec<Key>,
    page_size: usize,
) -> Result<PageId> {
    if child_ids.len() == 1 {
        return Ok(child_ids[0]);
    }

    let mut level_ids = Vec::new();
    let mut level_keys = Vec::new();
    let mut cells: Vec<InternalCell> = Vec::new();
    let mut pending_first_key: Option<Key> = None;

    let mut i = 0;
    while i < child_ids.len() {
        let child = child_ids[i];
        let key = first_keys[i].clone();
        if pending_first_key.is_none() {
            pending_first_key = Some(key.clone());
        }
        let mut candidate = cells.clone();
        if i + 1 < child_ids.len() {
            candidate.push(InternalCell {
                key: first_keys[i + 1].clone(),
                child,
            });
        }
        if encoded_internal_size(&candidate) > page_size && !cells.is_empty() {
            let (page_id, _) = txn.new_page()?;
            {
                let page = txn.page_mut(page_id)?;
                page.copy_from_slice(&encode_internal_page(&cells, child, page_size));
            }
            level_ids.push(page_id);
            level_keys.push(pending_first_key.take().unwrap());
            cells = Vec::new();
            i += 1;
        } else {
            cells = candidate;
            i += 1;
        }
    }
    if pending_first_key.is_some() {
        let last_child = *child_ids.last().unwrap();
        let (page_id, _) = txn.new_page()?;
        {
            let page = txn.page_mut(page_id)?;
            page.copy_from_slice(&encode_internal_page(&cells, last_child, page_size));
        }
        level_ids.push(page_id);
        level_keys.push(pending_first_key.take().unwrap());
    }

    build_level(txn, level_ids, level_keys, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::Pager;
    use crate::vfs::{OsVfs, Vfs as _};

    fn new_pager(page_size: usize) -> Pager<OsVfs> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        std::mem::forget(dir);
        let file = OsVfs.open(&path, true).unwrap();
        Pager::new(file, page_size, 64)
    }

    #[test]
    fn insert_and_find_round_trips_on_a_single_page() {
        let pager = new_pager(512);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let mut root = 0;
        for rowid in 0..5i64 {
            let value = format!("v{rowid}").into_bytes();
            root = insert(&mut txn, root, key_from_rowid(rowid), &value, false).unwrap();
        }
        for rowid in 0..5i64 {
            let found = find(&txn, root, &key_from_rowid(rowid)).unwrap().unwrap();
            assert_eq!(found, format!("v{rowid}").into_bytes());
        }
        assert!(find(&txn, root, &key_from_rowid(99)).unwrap().is_none());
    }

    #[test]
    fn insert_triggers_leaf_and_internal_splits_and_stays_findable() {
        let pager = new_pager(96); // tiny pages force frequent splits
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let mut root = 0;
        for rowid in 0..200i64 {
            let value = format!("value-{rowid}").into_bytes();
            root = insert(&mut txn, root, key_from_rowid(rowid), &value, false).unwrap();
        }
        for rowid in 0..200i64 {
            let found = find(&txn, root, &key_from_rowid(rowid)).unwrap().unwrap();
            assert_eq!(found, format!("value-{rowid}").into_bytes());
        }
    }

    #[test]
    fn check_unique_rejects_duplicate_keys() {
        let pager = new_pager(512);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let root = insert(&mut txn, 0, key_from_rowid(1), b"a", true).unwrap();
        let err = insert(&mut txn, root, key_from_rowid(1), b"b", true).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn delete_removes_key_and_is_idempotent() {
        let pager = new_pager(512);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let mut root = 0;
        for rowid in 0..10i64 {
            root = insert(&mut txn, root, key_from_rowid(rowid), b"x", false).unwrap();
        }
        assert!(delete(&mut txn, root, &key_from_rowid(5)).unwrap());
        assert!(find(&txn, root, &key_from_rowid(5)).unwrap().is_none());
        assert!(!delete(&mut txn, root, &key_from_rowid(5)).unwrap());
    }

    #[test]
    fn delete_key_value_matches_on_exact_pair_for_non_unique_indexes() {
        let pager = new_pager(512);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        // a non-unique index storing one cell per (key, rowid) pair
        let root = insert(&mut txn, 0, b"shared".to_vec(), &key_from_rowid(1), false).unwrap();
        let root = insert(&mut txn, root, b"shared".to_vec(), &key_from_rowid(2), false).unwrap();
        assert!(delete_key_value(&mut txn, root, b"shared", &key_from_rowid(1)).unwrap());
        assert!(!delete_key_value(&mut txn, root, b"shared", &key_from_rowid(1)).unwrap());
        assert!(delete_key_value(&mut txn, root, b"shared", &key_from_rowid(2)).unwrap());
    }

    #[test]
    fn large_value_is_pushed_to_overflow_and_still_found() {
        let pager = new_pager(128);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let big = vec![9u8; 1000];
        let root = insert(&mut txn, 0, key_from_rowid(1), &big, false).unwrap();
        assert_eq!(find(&txn, root, &key_from_rowid(1)).unwrap().unwrap(), big);
    }

    #[test]
    fn bulk_build_from_sorted_produces_a_findable_tree() {
        let pager = new_pager(128);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let pairs = (0..150i64).map(|r| (key_from_rowid(r), format!("row{r}").into_bytes()));
        let root = bulk_build_from_sorted(&mut txn, pairs).unwrap();
        for rowid in [0i64, 1, 74, 149] {
            let found = find(&txn, root, &key_from_rowid(rowid)).unwrap().unwrap();
            assert_eq!(found, format!("row{rowid}").into_bytes());
        }
    }

    #[test]
    fn bulk_build_from_sorted_on_empty_input_returns_empty_root() {
        let pager = new_pager(128);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let root = bulk_build_from_sorted(&mut txn, std::iter::empty()).unwrap();
        assert_eq!(root, 0);
    }
}
