//! Persisted table/index/view/trigger metadata (§3.1 "Catalog entries",
//! §4.6). Catalog rows live in their own B+Tree, rooted at
//! `header.catalog_root`, encoded with the same record codec every table
//! row uses: a kind column (`"table"`/`"index"`/`"view"`/`"trigger"`), a
//! name column, and a TEXT column holding the rest of that kind's metadata
//! as JSON (§4.6 [EXPANDED]) — generalizing `squeak::schema::Schema`'s
//! fixed `(type_, name, tbl_name, rootpage, sql)` shape into a richer
//! per-kind payload. Lookup keys are `crc32c("<kind>:<name>")`.

use serde::{Deserialize, Serialize};

use crate::btree;
use crate::codec::crc32c;
use crate::error::{DbError, Result};
use crate::pager::txn::PageTxn;
use crate::pager::PageId;
use crate::record::{self, Value};
use crate::vfs::Vfs;

pub const KIND_TABLE: &str = "table";
pub const KIND_INDEX: &str = "index";
pub const KIND_VIEW: &str = "view";
pub const KIND_TRIGGER: &str = "trigger";

/// A column's logical type, one-to-one with [`crate::record::Value`]'s
/// non-`Null` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int64,
    Float64,
    Bool,
    Text,
    Blob,
    Decimal { precision: u8, scale: u8 },
    Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub table: String,
    pub column: String,
    /// This crate only enforces `RESTRICT` (§7); other referential actions
    /// are recorded for the external SQL layer but not acted on here.
    pub on_delete_restrict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub foreign_key: Option<ForeignKeyDef>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            unique: false,
            primary_key: false,
            foreign_key: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// CHECK constraint SQL text; evaluated by the external expression
    /// evaluator (§1, Non-goals), stored here only for round-tripping.
    pub checks: Vec<String>,
    pub root: PageId,
    pub next_row_id: i64,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            checks: Vec::new(),
            root: 0,
            next_row_id: 1,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// The single-column `INTEGER PRIMARY KEY` that reuses the rowid as its
    /// value, if the table has one (§3.3: "Single-column INTEGER PRIMARY
    /// KEY columns reuse the rowid (no separate PK index)").
    pub fn rowid_column(&self) -> Option<usize> {
        let pk_cols: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        match pk_cols.as_slice() {
            [i] if matches!(self.columns[*i].ty, ColumnType::Int64) => Some(*i),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Btree,
    Trigram,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexKey {
    Columns(Vec<String>),
    /// `expr:<sql>` token per §3.1; the expression text is opaque to this
    /// crate and evaluated by the external expression evaluator.
    Expr(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub kind: IndexKind,
    pub unique: bool,
    pub key: IndexKey,
    pub partial_predicate: Option<String>,
    pub root: PageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDef {
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDef {
    pub name: String,
    pub table: String,
    pub sql: String,
}

fn catalog_key(kind: &str, name: &str) -> Vec<u8> {
    btree::key_from_u32(crc32c(format!("{kind}:{name}").as_bytes()))
}

fn encode_entry<V: Vfs>(
    txn: &mut PageTxn<V>,
    kind: &str,
    name: &str,
    metadata: &impl Serialize,
) -> Result<Vec<u8>> {
    let json = serde_json::to_string(metadata)
        .map_err(|e| DbError::internal(format!("catalog metadata serialize failed: {e}")))?;
    let values = [
        Value::Text(kind.to_string()),
        Value::Text(name.to_string()),
        Value::Text(json),
    ];
    record::encode_record(txn, &values)
}

fn decode_entry<V: Vfs, T: for<'de> Deserialize<'de>>(txn: &PageTxn<V>, bytes: &[u8]) -> Result<(String, String, T)> {
    let values = record::decode_record_with_overflow(txn, bytes)?;
    let mut it = values.into_iter();
    let kind = expect_text(it.next())?;
    let name = expect_text(it.next())?;
    let json = expect_text(it.next())?;
    let metadata = serde_json::from_str(&json)
        .map_err(|e| DbError::corruption(format!("catalog metadata deserialize failed: {e}")))?;
    Ok((kind, name, metadata))
}

fn expect_text(value: Option<Value>) -> Result<String> {
    match value {
        Some(Value::Text(s)) => Ok(s),
        _ => Err(DbError::corruption("malformed catalog entry: expected a Text field")),
    }
}

/// Inserts-or-replaces the entry at `key`, since catalog entries (unlike
/// secondary index cells) are keyed 1:1 by name and must be overwritten in
/// place on every DDL that touches them.
fn upsert<V: Vfs>(txn: &mut PageTxn<V>, root: PageId, key: Vec<u8>, bytes: &[u8]) -> Result<PageId> {
    if btree::find(txn, root, &key)?.is_some() {
        btree::update(txn, root, &key, bytes)
    } else {
        btree::insert(txn, root, key, bytes, true)
    }
}

pub fn put_table<V: Vfs>(txn: &mut PageTxn<V>, catalog_root: PageId, table: &TableDef) -> Result<PageId> {
    let key = catalog_key(KIND_TABLE, &table.name);
    let bytes = encode_entry(txn, KIND_TABLE, &table.name, table)?;
    upsert(txn, catalog_root, key, &bytes)
}

pub fn put_index<V: Vfs>(txn: &mut PageTxn<V>, catalog_root: PageId, index: &IndexDef) -> Result<PageId> {
    let key = catalog_key(KIND_INDEX, &index.name);
    let bytes = encode_entry(txn, KIND_INDEX, &index.name, index)?;
    upsert(txn, catalog_root, key, &bytes)
}

pub fn put_view<V: Vfs>(txn: &mut PageTxn<V>, catalog_root: PageId, view: &ViewDef) -> Result<PageId> {
    let key = catalog_key(KIND_VIEW, &view.name);
    let bytes = encode_entry(txn, KIND_VIEW, &view.name, view)?;
    upsert(txn, catalog_root, key, &bytes)
}

pub fn put_trigger<V: Vfs>(txn: &mut PageTxn<V>, catalog_root: PageId, trigger: &TriggerDef) -> Result<PageId> {
    let key = catalog_key(KIND_TRIGGER, &trigger.name);
    let bytes = encode_entry(txn, KIND_TRIGGER, &trigger.name, trigger)?;
    upsert(txn, catalog_root, key, &bytes)
}

pub fn lookup_table<V: Vfs>(txn: &PageTxn<V>, catalog_root: PageId, name: &str) -> Result<Option<TableDef>> {
    let key = catalog_key(KIND_TABLE, name);
    match btree::find(txn, catalog_root, &key)? {
        None => Ok(None),
        Some(bytes) => {
            let (_, _, table) = decode_entry(txn, &bytes)?;
            Ok(Some(table))
        }
    }
}

pub fn lookup_index<V: Vfs>(txn: &PageTxn<V>, catalog_root: PageId, name: &str) -> Result<Option<IndexDef>> {
    let key = catalog_key(KIND_INDEX, name);
    match btree::find(txn, catalog_root, &key)? {
        None => Ok(None),
        Some(bytes) => {
            let (_, _, index) = decode_entry(txn, &bytes)?;
            Ok(Some(index))
        }
    }
}

pub fn drop_table<V: Vfs>(txn: &mut PageTxn<V>, catalog_root: PageId, name: &str) -> Result<PageId> {
    btree::delete(txn, catalog_root, &catalog_key(KIND_TABLE, name))?;
    Ok(catalog_root)
}

pub fn drop_index<V: Vfs>(txn: &mut PageTxn<V>, catalog_root: PageId, name: &str) -> Result<PageId> {
    btree::delete(txn, catalog_root, &catalog_key(KIND_INDEX, name))?;
    Ok(catalog_root)
}

pub fn drop_view<V: Vfs>(txn: &mut PageTxn<V>, catalog_root: PageId, name: &str) -> Result<PageId> {
    btree::delete(txn, catalog_root, &catalog_key(KIND_VIEW, name))?;
    Ok(catalog_root)
}

pub fn drop_trigger<V: Vfs>(txn: &mut PageTxn<V>, catalog_root: PageId, name: &str) -> Result<PageId> {
    btree::delete(txn, catalog_root, &catalog_key(KIND_TRIGGER, name))?;
    Ok(catalog_root)
}

pub fn lookup_view<V: Vfs>(txn: &PageTxn<V>, catalog_root: PageId, name: &str) -> Result<Option<ViewDef>> {
    let key = catalog_key(KIND_VIEW, name);
    match btree::find(txn, catalog_root, &key)? {
        None => Ok(None),
        Some(bytes) => {
            let (_, _, view) = decode_entry(txn, &bytes)?;
            Ok(Some(view))
        }
    }
}

/// Scans every catalog entry of a given `kind`, decoding each as `T`. Used
/// for `list-tables`/`describe` style operations and for finding every
/// index on a table, since those are not directly keyed lookups (§6.2).
fn scan_kind<V: Vfs, T: for<'de> Deserialize<'de>>(
    txn: &PageTxn<V>,
    catalog_root: PageId,
    kind: &str,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    let mut cursor = btree::cursor::Cursor::open(txn, catalog_root)?;
    while let Some((_, bytes)) = cursor.next()? {
        let (entry_kind, _, value) = decode_entry(txn, &bytes)?;
        if entry_kind == kind {
            out.push(value);
        }
    }
    Ok(out)
}

pub fn list_tables<V: Vfs>(txn: &PageTxn<V>, catalog_root: PageId) -> Result<Vec<TableDef>> {
    scan_kind(txn, catalog_root, KIND_TABLE)
}

pub fn list_indexes<V: Vfs>(txn: &PageTxn<V>, catalog_root: PageId) -> Result<Vec<IndexDef>> {
    scan_kind(txn, catalog_root, KIND_INDEX)
}

pub fn list_indexes_for_table<V: Vfs>(
    txn: &PageTxn<V>,
    catalog_root: PageId,
    table: &str,
) -> Result<Vec<IndexDef>> {
    Ok(list_indexes(txn, catalog_root)?
        .into_iter()
        .filter(|i| i.table == table)
        .collect())
}

pub fn list_views<V: Vfs>(txn: &PageTxn<V>, catalog_root: PageId) -> Result<Vec<ViewDef>> {
    scan_kind(txn, catalog_root, KIND_VIEW)
}

pub fn list_triggers<V: Vfs>(txn: &PageTxn<V>, catalog_root: PageId) -> Result<Vec<TriggerDef>> {
    scan_kind(txn, catalog_root, KIND_TRIGGER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::Pager;
    use crate::vfs::{OsVfs, Vfs as _};

    fn new_txn(page_size: usize) -> (Pager<OsVfs>, ()) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.db");
        std::mem::forget(dir);
        let file = OsVfs.open(&path, true).unwrap();
        (Pager::new(file, page_size, 64), ())
    }

    #[test]
    fn put_and_lookup_table_round_trips() {
        let (pager, _) = new_txn(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let table = TableDef::new(
            "widgets",
            vec![
                ColumnDef::new("id", ColumnType::Int64).primary_key(),
                ColumnDef::new("name", ColumnType::Text).not_null(),
            ],
        );
        let root = put_table(&mut txn, 0, &table).unwrap();
        let found = lookup_table(&txn, root, "widgets").unwrap().unwrap();
        assert_eq!(found.name, "widgets");
        assert_eq!(found.columns.len(), 2);
        assert_eq!(found.rowid_column(), Some(0));
    }

    #[test]
    fn put_table_twice_replaces_rather_than_duplicating() {
        let (pager, _) = new_txn(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let mut table = TableDef::new("t", vec![ColumnDef::new("id", ColumnType::Int64).primary_key()]);
        let root = put_table(&mut txn, 0, &table).unwrap();
        table.next_row_id = 42;
        let root = put_table(&mut txn, root, &table).unwrap();
        assert_eq!(lookup_table(&txn, root, "t").unwrap().unwrap().next_row_id, 42);
        assert_eq!(list_tables(&txn, root).unwrap().len(), 1);
    }

    #[test]
    fn drop_table_removes_entry() {
        let (pager, _) = new_txn(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let table = TableDef::new("t", vec![ColumnDef::new("id", ColumnType::Int64).primary_key()]);
        let root = put_table(&mut txn, 0, &table).unwrap();
        let root = drop_table(&mut txn, root, "t").unwrap();
        assert!(lookup_table(&txn, root, "t").unwrap().is_none());
    }

    #[test]
    fn list_indexes_for_table_filters_by_owner() {
        let (pager, _) = new_txn(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let idx_a = IndexDef {
            name: "idx_a".into(),
            table: "t".into(),
            kind: IndexKind::Btree,
            unique: false,
            key: IndexKey::Columns(vec!["name".into()]),
            partial_predicate: None,
            root: 0,
        };
        let idx_b = IndexDef {
            table: "other".into(),
            name: "idx_b".into(),
            ..idx_a.clone()
        };
        let root = put_index(&mut txn, 0, &idx_a).unwrap();
        let root = put_index(&mut txn, root, &idx_b).unwrap();
        let found = list_indexes_for_table(&txn, root, "t").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "idx_a");
    }
}
