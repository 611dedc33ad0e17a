//! Row storage and secondary-index maintenance (§4.7). This is the layer an
//! external SQL planner actually drives: every row op here resolves a table
//! name through the [`catalog`] to find the table's B+Tree root, then walks
//! [`btree`]/[`record`] the same way `squeak`'s reader walked `sqlite_schema`
//! rows to find a table's root page, generalized to also write.
//!
//! Catalog rows (table/index metadata) are immutable per call: every mutating
//! function here takes the current `catalog_root`, does its writes, and
//! returns the new `catalog_root` the caller must remember — mirroring how
//! [`btree::insert`] threads a root through rather than owning it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use crate::btree;
use crate::catalog::{self, ColumnDef, ColumnType, IndexDef, IndexKey, IndexKind, TableDef};
use crate::codec::{crc32c, read_uvarint, write_uvarint, zigzag_decode, zigzag_encode};
use crate::error::{DbError, Result};
use crate::pager::txn::PageTxn;
use crate::pager::PageId;
use crate::record::{self, Value};
use crate::vfs::Vfs;

/// Evaluates a partial index's predicate or an expression index's key
/// expression against a row (§1, §3.1 "expr:<sql>" token): both are owned by
/// the external SQL layer, which is expected to register one of these over
/// the raw column values this crate already has in hand.
pub trait PredicateEvaluator: Send + Sync {
    fn evaluate(&self, predicate_sql: &str, row: &[Value], columns: &[ColumnDef]) -> bool;
}

/// The default evaluator: every row satisfies every predicate. Correct for
/// tables that declare no partial indexes; anything richer needs a real
/// expression evaluator wired in by the caller.
pub struct AlwaysTrue;

impl PredicateEvaluator for AlwaysTrue {
    fn evaluate(&self, _predicate_sql: &str, _row: &[Value], _columns: &[ColumnDef]) -> bool {
        true
    }
}

// ---------------------------------------------------------------------
// Secondary-index key/value encoding (§3.1 "composite/expression keys")
// ---------------------------------------------------------------------

/// Sort-preserving byte-string projection of a single column value, used as
/// the B+Tree key for single-column indexes and as one component of the
/// concatenation hashed for composite indexes.
fn column_key_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => Vec::new(),
        Value::Int64(i) => btree::key_from_rowid(*i),
        Value::Float64(f) => sortable_float_bytes(*f).to_vec(),
        Value::Bool(b) => vec![*b as u8],
        Value::Text(s) => text_prefix_key(s.as_bytes()),
        Value::Blob(b) => text_prefix_key(b),
        // The fractional part is not order-preserving this way, but ALTER
        // COLUMN TYPE aside this crate has no DECIMAL arithmetic of its own;
        // ordering by the unscaled integer is a documented approximation.
        Value::Decimal { unscaled, .. } => btree::key_from_rowid(*unscaled),
        Value::Uuid(bytes) => bytes.to_vec(),
    }
}

fn sortable_float_bytes(f: f64) -> [u8; 8] {
    let bits = f.to_bits();
    let sortable = if bits & (1u64 << 63) != 0 { !bits } else { bits | (1u64 << 63) };
    sortable.to_be_bytes()
}

fn text_prefix_key(bytes: &[u8]) -> Vec<u8> {
    let mut key = [0u8; 8];
    let n = bytes.len().min(8);
    key[..n].copy_from_slice(&bytes[..n]);
    key.to_vec()
}

/// Computes the B+Tree key for an index entry, or `None` if any indexed
/// column is `Null` (NULLs are excluded from indexes, the common SQL
/// convention this crate adopts in the absence of a spec ruling).
fn index_key(col_indices: &[usize], row: &[Value]) -> Option<Vec<u8>> {
    if col_indices.iter().any(|&i| matches!(row[i], Value::Null)) {
        return None;
    }
    if col_indices.len() == 1 {
        return Some(column_key_bytes(&row[col_indices[0]]));
    }
    let mut buf = Vec::new();
    for &i in col_indices {
        buf.extend_from_slice(&column_key_bytes(&row[i]));
    }
    Some(btree::key_from_u32(crc32c(&buf)))
}

const IDX_NULL: u8 = 0;
const IDX_INT64: u8 = 1;
const IDX_FLOAT64: u8 = 2;
const IDX_BOOL: u8 = 3;
const IDX_TEXT: u8 = 4;
const IDX_BLOB: u8 = 5;
const IDX_DECIMAL: u8 = 6;
const IDX_UUID: u8 = 7;

/// An index cell's value: the indexed column(s) plus the owning rowid, so a
/// hash-collision on the key (composite indexes, or two different 8-byte
/// text prefixes) can be resolved by comparing the real values, and so a
/// point lookup can report which row matched (§8.1 "Index consistency").
///
/// This is a deliberately small, overflow-free encoding distinct from
/// [`record::encode_record`] — index entries never need to round-trip
/// through overflow chains, whose head pointer would differ between the
/// insert and a later delete of bit-identical content.
fn encode_index_entry(columns: &[Value], rowid: i64) -> Vec<u8> {
    let mut out = Vec::new();
    write_uvarint(columns.len() as u64, &mut out);
    for value in columns {
        encode_index_value(value, &mut out);
    }
    out.extend_from_slice(&rowid.to_be_bytes());
    out
}

/// Text/Blob payloads are capped: an index entry only needs enough of the
/// value to disambiguate a key collision, not a faithful copy.
const INDEX_VALUE_CAP: usize = 256;

fn encode_index_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(IDX_NULL),
        Value::Int64(i) => {
            out.push(IDX_INT64);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Value::Float64(f) => {
            out.push(IDX_FLOAT64);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Bool(b) => {
            out.push(IDX_BOOL);
            out.push(*b as u8);
        }
        Value::Text(s) => {
            out.push(IDX_TEXT);
            let bytes = &s.as_bytes()[..s.len().min(INDEX_VALUE_CAP)];
            write_uvarint(bytes.len() as u64, out);
            out.extend_from_slice(bytes);
        }
        Value::Blob(b) => {
            out.push(IDX_BLOB);
            let bytes = &b[..b.len().min(INDEX_VALUE_CAP)];
            write_uvarint(bytes.len() as u64, out);
            out.extend_from_slice(bytes);
        }
        Value::Decimal { unscaled, scale } => {
            out.push(IDX_DECIMAL);
            out.extend_from_slice(&unscaled.to_be_bytes());
            out.push(*scale);
        }
        Value::Uuid(bytes) => {
            out.push(IDX_UUID);
            out.extend_from_slice(bytes);
        }
    }
}

fn decode_index_entry(bytes: &[u8]) -> Result<(Vec<Value>, i64)> {
    let (count, n) = read_uvarint(bytes)?;
    let mut cursor = &bytes[n..];
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (value, rest) = decode_index_value(cursor)?;
        values.push(value);
        cursor = rest;
    }
    if cursor.len() < 8 {
        return Err(DbError::corruption("truncated index entry trailer"));
    }
    let rowid = i64::from_be_bytes(cursor[..8].try_into().unwrap());
    Ok((values, rowid))
}

fn decode_index_value(bytes: &[u8]) -> Result<(Value, &[u8])> {
    let (&tag, rest) = bytes.split_first().ok_or_else(|| DbError::corruption("truncated index value"))?;
    match tag {
        IDX_NULL => Ok((Value::Null, rest)),
        IDX_INT64 => {
            if rest.len() < 8 {
                return Err(DbError::corruption("truncated index int64"));
            }
            Ok((Value::Int64(i64::from_be_bytes(rest[..8].try_into().unwrap())), &rest[8..]))
        }
        IDX_FLOAT64 => {
            if rest.len() < 8 {
                return Err(DbError::corruption("truncated index float64"));
            }
            Ok((Value::Float64(f64::from_be_bytes(rest[..8].try_into().unwrap())), &rest[8..]))
        }
        IDX_BOOL => {
            let (&b, rest) = rest.split_first().ok_or_else(|| DbError::corruption("truncated index bool"))?;
            Ok((Value::Bool(b != 0), rest))
        }
        IDX_TEXT => {
            let (len, n) = read_uvarint(rest)?;
            let rest = &rest[n..];
            let len = len as usize;
            if rest.len() < len {
                return Err(DbError::corruption("truncated index text"));
            }
            let s = String::from_utf8_lossy(&rest[..len]).into_owned();
            Ok((Value::Text(s), &rest[len..]))
        }
        IDX_BLOB => {
            let (len, n) = read_uvarint(rest)?;
            let rest = &rest[n..];
            let len = len as usize;
            if rest.len() < len {
                return Err(DbError::corruption("truncated index blob"));
            }
            Ok((Value::Blob(rest[..len].to_vec()), &rest[len..]))
        }
        IDX_DECIMAL => {
            if rest.len() < 9 {
                return Err(DbError::corruption("truncated index decimal"));
            }
            let unscaled = i64::from_be_bytes(rest[..8].try_into().unwrap());
            let scale = rest[8];
            Ok((Value::Decimal { unscaled, scale }, &rest[9..]))
        }
        IDX_UUID => {
            if rest.len() < 16 {
                return Err(DbError::corruption("truncated index uuid"));
            }
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&rest[..16]);
            Ok((Value::Uuid(bytes), &rest[16..]))
        }
        other => Err(DbError::corruption(format!("unknown index value tag {other}"))),
    }
}

// ---------------------------------------------------------------------
// Trigram postings (§4.6 "Trigram delta buffer", §6.2 getTrigramPostingsWithDeltasUpTo)
// ---------------------------------------------------------------------

/// Extracts the set of lowercased, byte-packed trigrams from `text` (§3.1:
/// a trigram is three consecutive bytes; DecentDB indexes are case
/// insensitive for trigram search).
pub fn extract_trigrams(text: &str) -> BTreeSet<u32> {
    let bytes = text.to_ascii_lowercase().into_bytes();
    let mut set = BTreeSet::new();
    if bytes.len() < 3 {
        return set;
    }
    for w in bytes.windows(3) {
        set.insert(((w[0] as u32) << 16) | ((w[1] as u32) << 8) | w[2] as u32);
    }
    set
}

/// Chunked postings key: `(trigram << 32) | chunk_id` (§4.6's
/// `(trigram<<16)|chunk_id` widened to a 64-bit key with a full `u32`
/// chunk id). A trigram present in a large table can split across far more
/// than 256 chunks at `POSTINGS_CHUNK_BYTES` granularity; a one-byte chunk
/// id would wrap and corrupt chunk 0 or silently drop postings past chunk
/// 255, so the chunk id gets the low 32 bits and is never capped.
fn postings_key(trigram: u32, chunk: u32) -> Vec<u8> {
    btree::key_from_u64(((trigram as u64) << 32) | chunk as u64)
}

/// Legacy single-key layout from before chunking: read-only compatibility
/// path (§9, "must read both").
fn legacy_postings_key(trigram: u32) -> Vec<u8> {
    btree::key_from_u32(trigram)
}

/// Keeps each encoded chunk at or under this many bytes before starting a
/// new one (§2 [EXPANDED], "chunked at <=400B per B+Tree value").
const POSTINGS_CHUNK_BYTES: usize = 400;

fn encode_postings_chunk(rowids: &[i64]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev = 0i64;
    for &rowid in rowids {
        write_uvarint(zigzag_encode(rowid - prev), &mut out);
        prev = rowid;
    }
    out
}

fn decode_postings_chunk(bytes: &[u8]) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    let mut prev = 0i64;
    let mut cursor = bytes;
    while !cursor.is_empty() {
        let (z, n) = read_uvarint(cursor)?;
        prev += zigzag_decode(z);
        out.push(prev);
        cursor = &cursor[n..];
    }
    Ok(out)
}

fn read_postings<V: Vfs>(txn: &PageTxn<V>, root: PageId, trigram: u32) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    let mut chunk: u32 = 0;
    loop {
        match btree::find(txn, root, &postings_key(trigram, chunk))? {
            Some(bytes) => {
                out.extend(decode_postings_chunk(&bytes)?);
                chunk += 1;
            }
            None => break,
        }
    }
    if out.is_empty() {
        if let Some(bytes) = btree::find(txn, root, &legacy_postings_key(trigram))? {
            out.extend(decode_postings_chunk(&bytes)?);
        }
    }
    Ok(out)
}

/// Rewrites every chunk for `trigram` from scratch with `rowids` (already
/// deduplicated and sorted), deleting whatever was there before (including
/// a stale legacy-format entry).
fn write_postings<V: Vfs>(txn: &mut PageTxn<V>, root: PageId, trigram: u32, rowids: &[i64]) -> Result<PageId> {
    let mut chunk: u32 = 0;
    loop {
        if !btree::delete(txn, root, &postings_key(trigram, chunk))? {
            break;
        }
        chunk += 1;
    }
    btree::delete(txn, root, &legacy_postings_key(trigram))?;

    let mut root = root;
    let mut chunk_id: u32 = 0;
    let mut batch: Vec<i64> = Vec::new();
    for &rowid in rowids {
        let mut candidate = batch.clone();
        candidate.push(rowid);
        if !batch.is_empty() && encode_postings_chunk(&candidate).len() > POSTINGS_CHUNK_BYTES {
            let encoded = encode_postings_chunk(&batch);
            root = btree::insert(txn, root, postings_key(trigram, chunk_id), &encoded, false)?;
            chunk_id += 1;
            batch = vec![rowid];
        } else {
            batch = candidate;
        }
    }
    if !batch.is_empty() {
        let encoded = encode_postings_chunk(&batch);
        root = btree::insert(txn, root, postings_key(trigram, chunk_id), &encoded, false)?;
    }
    Ok(root)
}

#[derive(Default)]
struct TrigramEntry {
    added: BTreeSet<i64>,
    removed: BTreeSet<i64>,
}

/// In-memory pending trigram postings changes, per index, flushed to the
/// on-disk postings B+Tree only at checkpoint (§4.6 [EXPANDED]). Lives on
/// the [`crate::db::Db`] handle, not inside any `PageTxn`, since it must
/// survive across the many small write transactions a bulk load issues
/// between checkpoints.
pub struct TrigramDeltas {
    pending: Mutex<HashMap<(String, u32), TrigramEntry>>,
}

impl Default for TrigramDeltas {
    fn default() -> Self {
        Self::new()
    }
}

impl TrigramDeltas {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_insert(&self, index: &str, rowid: i64, text: &str) {
        let mut pending = self.pending.lock().unwrap();
        for trigram in extract_trigrams(text) {
            let entry = pending.entry((index.to_string(), trigram)).or_default();
            entry.removed.remove(&rowid);
            entry.added.insert(rowid);
        }
    }

    pub fn record_delete(&self, index: &str, rowid: i64, text: &str) {
        let mut pending = self.pending.lock().unwrap();
        for trigram in extract_trigrams(text) {
            let entry = pending.entry((index.to_string(), trigram)).or_default();
            entry.added.remove(&rowid);
            entry.removed.insert(rowid);
        }
    }

    /// §6.2 `getTrigramPostingsWithDeltasUpTo`: merges on-disk postings for
    /// `trigram` with whatever this index's buffer still has pending,
    /// capping the result at `limit` and reporting whether it was truncated.
    pub fn get_postings_with_deltas<V: Vfs>(
        &self,
        txn: &PageTxn<V>,
        index: &str,
        postings_root: PageId,
        trigram: u32,
        limit: usize,
    ) -> Result<(Vec<i64>, bool)> {
        let mut rowids: BTreeSet<i64> = read_postings(txn, postings_root, trigram)?.into_iter().collect();
        {
            let pending = self.pending.lock().unwrap();
            if let Some(entry) = pending.get(&(index.to_string(), trigram)) {
                for &r in &entry.added {
                    rowids.insert(r);
                }
                for r in &entry.removed {
                    rowids.remove(r);
                }
            }
        }
        let truncated = rowids.len() > limit;
        Ok((rowids.into_iter().take(limit).collect(), truncated))
    }

    /// Flushes every pending delta for `index` into its on-disk postings
    /// tree, returning the (possibly new) postings root.
    pub fn flush<V: Vfs>(&self, txn: &mut PageTxn<V>, index: &str, postings_root: PageId) -> Result<PageId> {
        let trigrams: Vec<u32> = {
            let pending = self.pending.lock().unwrap();
            pending.keys().filter(|(i, _)| i == index).map(|(_, t)| *t).collect()
        };
        let mut root = postings_root;
        for trigram in trigrams {
            let entry = {
                let mut pending = self.pending.lock().unwrap();
                pending.remove(&(index.to_string(), trigram)).unwrap_or_default()
            };
            let mut rowids: BTreeSet<i64> = read_postings(txn, root, trigram)?.into_iter().collect();
            for r in entry.added {
                rowids.insert(r);
            }
            for r in entry.removed {
                rowids.remove(&r);
            }
            let sorted: Vec<i64> = rowids.into_iter().collect();
            root = write_postings(txn, root, trigram, &sorted)?;
        }
        Ok(root)
    }
}

/// Candidate rowids for `text` against a trigram index: intersects the
/// (deltas-merged) postings of every trigram in `text`, so a multi-trigram
/// query only returns rows containing all of them. Single-character or empty
/// queries have no trigrams and match nothing, mirroring a LIKE search that
/// is too short to narrow via the index.
pub fn get_postings_with_deltas_merged<V: Vfs>(
    txn: &PageTxn<V>,
    index: &IndexDef,
    deltas: &TrigramDeltas,
    text: &str,
    limit: usize,
) -> Result<(Vec<i64>, bool)> {
    let trigrams = extract_trigrams(text);
    if trigrams.is_empty() {
        return Ok((Vec::new(), false));
    }
    let mut truncated = false;
    let mut candidates: Option<BTreeSet<i64>> = None;
    for trigram in trigrams {
        let (rowids, this_truncated) = deltas.get_postings_with_deltas(txn, &index.name, index.root, trigram, usize::MAX)?;
        truncated |= this_truncated;
        let set: BTreeSet<i64> = rowids.into_iter().collect();
        candidates = Some(match candidates {
            None => set,
            Some(acc) => acc.intersection(&set).copied().collect(),
        });
    }
    let mut result: Vec<i64> = candidates.unwrap_or_default().into_iter().collect();
    if result.len() > limit {
        result.truncate(limit);
        truncated = true;
    }
    Ok((result, truncated))
}

// ---------------------------------------------------------------------
// Row validation and index-maintenance helpers
// ---------------------------------------------------------------------

fn validate_not_null(table: &TableDef, values: &[Value]) -> Result<()> {
    for (col, value) in table.columns.iter().zip(values) {
        if !col.nullable && matches!(value, Value::Null) {
            return Err(DbError::sql(format!("NOT NULL constraint failed: {}.{}", table.name, col.name)));
        }
    }
    Ok(())
}

fn index_columns(index: &IndexDef, table: &TableDef) -> Result<Vec<usize>> {
    match &index.key {
        IndexKey::Columns(names) => names
            .iter()
            .map(|name| {
                table
                    .column_index(name)
                    .ok_or_else(|| DbError::internal(format!("index {} references unknown column {name}", index.name)))
            })
            .collect(),
        IndexKey::Expr(expr) => Err(DbError::internal(format!(
            "index {} is an expression index ({expr}); physical maintenance requires an external evaluator",
            index.name
        ))),
    }
}

fn trigram_column(index: &IndexDef, table: &TableDef) -> Result<usize> {
    match &index.key {
        IndexKey::Columns(names) if names.len() == 1 => table
            .column_index(&names[0])
            .ok_or_else(|| DbError::internal(format!("trigram index {} references unknown column", index.name))),
        _ => Err(DbError::sql(format!("trigram index {} must key exactly one column", index.name))),
    }
}

fn should_include(index: &IndexDef, row: &[Value], table: &TableDef, evaluator: &dyn PredicateEvaluator) -> bool {
    match &index.partial_predicate {
        None => true,
        Some(sql) => evaluator.evaluate(sql, row, &table.columns),
    }
}

fn maintain_index_on_insert<V: Vfs>(
    txn: &mut PageTxn<V>,
    index: &IndexDef,
    table: &TableDef,
    row: &[Value],
    rowid: i64,
    trigram_deltas: &TrigramDeltas,
    evaluator: &dyn PredicateEvaluator,
) -> Result<PageId> {
    if !should_include(index, row, table, evaluator) {
        return Ok(index.root);
    }
    match index.kind {
        IndexKind::Trigram => {
            let col = trigram_column(index, table)?;
            if let Value::Text(text) = &row[col] {
                trigram_deltas.record_insert(&index.name, rowid, text);
            }
            Ok(index.root)
        }
        IndexKind::Btree => {
            let cols = index_columns(index, table)?;
            let Some(key) = index_key(&cols, row) else {
                return Ok(index.root);
            };
            let entry_values: Vec<Value> = cols.iter().map(|&i| row[i].clone()).collect();
            let entry_bytes = encode_index_entry(&entry_values, rowid);
            btree::insert(txn, index.root, key, &entry_bytes, index.unique)
        }
    }
}

fn maintain_index_on_update<V: Vfs>(
    txn: &mut PageTxn<V>,
    index: &IndexDef,
    table: &TableDef,
    old_row: &[Value],
    new_row: &[Value],
    rowid: i64,
    trigram_deltas: &TrigramDeltas,
    evaluator: &dyn PredicateEvaluator,
) -> Result<PageId> {
    let was_included = should_include(index, old_row, table, evaluator);
    let is_included = should_include(index, new_row, table, evaluator);
    match index.kind {
        IndexKind::Trigram => {
            let col = trigram_column(index, table)?;
            if was_included {
                if let Value::Text(text) = &old_row[col] {
                    trigram_deltas.record_delete(&index.name, rowid, text);
                }
            }
            if is_included {
                if let Value::Text(text) = &new_row[col] {
                    trigram_deltas.record_insert(&index.name, rowid, text);
                }
            }
            Ok(index.root)
        }
        IndexKind::Btree => {
            let cols = index_columns(index, table)?;
            let mut root = index.root;
            if was_included {
                if let Some(old_key) = index_key(&cols, old_row) {
                    let old_values: Vec<Value> = cols.iter().map(|&i| old_row[i].clone()).collect();
                    let old_bytes = encode_index_entry(&old_values, rowid);
                    btree::delete_key_value(txn, root, &old_key, &old_bytes)?;
                }
            }
            if is_included {
                if let Some(new_key) = index_key(&cols, new_row) {
                    let new_values: Vec<Value> = cols.iter().map(|&i| new_row[i].clone()).collect();
                    let new_bytes = encode_index_entry(&new_values, rowid);
                    root = btree::insert(txn, root, new_key, &new_bytes, index.unique)?;
                }
            }
            Ok(root)
        }
    }
}

fn maintain_index_on_delete<V: Vfs>(
    txn: &mut PageTxn<V>,
    index: &IndexDef,
    table: &TableDef,
    row: &[Value],
    rowid: i64,
    trigram_deltas: &TrigramDeltas,
    evaluator: &dyn PredicateEvaluator,
) -> Result<PageId> {
    if !should_include(index, row, table, evaluator) {
        return Ok(index.root);
    }
    match index.kind {
        IndexKind::Trigram => {
            let col = trigram_column(index, table)?;
            if let Value::Text(text) = &row[col] {
                trigram_deltas.record_delete(&index.name, rowid, text);
            }
            Ok(index.root)
        }
        IndexKind::Btree => {
            let cols = index_columns(index, table)?;
            if let Some(key) = index_key(&cols, row) {
                let values: Vec<Value> = cols.iter().map(|&i| row[i].clone()).collect();
                let bytes = encode_index_entry(&values, rowid);
                btree::delete_key_value(txn, index.root, &key, &bytes)?;
            }
            Ok(index.root)
        }
    }
}

fn lookup_table_or_err<V: Vfs>(txn: &PageTxn<V>, catalog_root: PageId, table_name: &str) -> Result<TableDef> {
    catalog::lookup_table(txn, catalog_root, table_name)?
        .ok_or_else(|| DbError::sql(format!("no such table: {table_name}")))
}

// ---------------------------------------------------------------------
// Row CRUD (§4.7 insertRow / updateRow / deleteRow)
// ---------------------------------------------------------------------

/// Inserts one row, maintaining every secondary index, and returns the
/// (possibly new) catalog root plus the assigned rowid.
pub fn insert_row<V: Vfs>(
    txn: &mut PageTxn<V>,
    catalog_root: PageId,
    table_name: &str,
    mut values: Vec<Value>,
    trigram_deltas: &TrigramDeltas,
    evaluator: &dyn PredicateEvaluator,
) -> Result<(PageId, i64)> {
    let mut table = lookup_table_or_err(txn, catalog_root, table_name)?;
    if values.len() != table.columns.len() {
        return Err(DbError::sql(format!(
            "table {table_name} expects {} columns, got {}",
            table.columns.len(),
            values.len()
        )));
    }
    validate_not_null(&table, &values)?;

    let rowid = match table.rowid_column() {
        Some(i) => match values[i] {
            Value::Null => {
                let assigned = table.next_row_id;
                values[i] = Value::Int64(assigned);
                assigned
            }
            Value::Int64(explicit) => explicit,
            _ => return Err(DbError::sql("INTEGER PRIMARY KEY column must hold an Int64 or be left NULL")),
        },
        None => table.next_row_id,
    };
    if rowid >= table.next_row_id {
        table.next_row_id = rowid + 1;
    }

    let record_bytes = record::encode_record(txn, &values)?;
    table.root = btree::insert(txn, table.root, btree::key_from_rowid(rowid), &record_bytes, true)?;

    let mut new_catalog_root = catalog_root;
    for mut index in catalog::list_indexes_for_table(txn, catalog_root, table_name)? {
        index.root = maintain_index_on_insert(txn, &index, &table, &values, rowid, trigram_deltas, evaluator)?;
        new_catalog_root = catalog::put_index(txn, new_catalog_root, &index)?;
    }
    new_catalog_root = catalog::put_table(txn, new_catalog_root, &table)?;
    Ok((new_catalog_root, rowid))
}

/// Inserts one row without touching any secondary index, for bulk loads that
/// defer index maintenance to a single rebuild at the end (§6.2 `bulkLoad`
/// `disableIndexes`). Table-level bookkeeping (rowid assignment, NOT NULL,
/// `next_row_id`) is identical to [`insert_row`].
pub fn insert_row_only<V: Vfs>(
    txn: &mut PageTxn<V>,
    catalog_root: PageId,
    table_name: &str,
    mut values: Vec<Value>,
) -> Result<(PageId, i64)> {
    let mut table = lookup_table_or_err(txn, catalog_root, table_name)?;
    if values.len() != table.columns.len() {
        return Err(DbError::sql(format!(
            "table {table_name} expects {} columns, got {}",
            table.columns.len(),
            values.len()
        )));
    }
    validate_not_null(&table, &values)?;

    let rowid = match table.rowid_column() {
        Some(i) => match values[i] {
            Value::Null => {
                let assigned = table.next_row_id;
                values[i] = Value::Int64(assigned);
                assigned
            }
            Value::Int64(explicit) => explicit,
            _ => return Err(DbError::sql("INTEGER PRIMARY KEY column must hold an Int64 or be left NULL")),
        },
        None => table.next_row_id,
    };
    if rowid >= table.next_row_id {
        table.next_row_id = rowid + 1;
    }

    let record_bytes = record::encode_record(txn, &values)?;
    table.root = btree::insert(txn, table.root, btree::key_from_rowid(rowid), &record_bytes, true)?;
    let new_catalog_root = catalog::put_table(txn, catalog_root, &table)?;
    Ok((new_catalog_root, rowid))
}

/// Updates an existing row. A changed INTEGER PRIMARY KEY value is handled
/// as `deleteRow` + `insertRow` at the new rowid (§4.7).
pub fn update_row<V: Vfs>(
    txn: &mut PageTxn<V>,
    catalog_root: PageId,
    table_name: &str,
    rowid: i64,
    mut values: Vec<Value>,
    trigram_deltas: &TrigramDeltas,
    evaluator: &dyn PredicateEvaluator,
) -> Result<PageId> {
    let mut table = lookup_table_or_err(txn, catalog_root, table_name)?;
    if values.len() != table.columns.len() {
        return Err(DbError::sql(format!(
            "table {table_name} expects {} columns, got {}",
            table.columns.len(),
            values.len()
        )));
    }
    validate_not_null(&table, &values)?;

    if let Some(i) = table.rowid_column() {
        match values[i] {
            Value::Int64(new_pk) if new_pk != rowid => {
                let catalog_root = delete_row(txn, catalog_root, table_name, rowid, trigram_deltas, evaluator)?;
                let (catalog_root, _) = insert_row(txn, catalog_root, table_name, values, trigram_deltas, evaluator)?;
                return Ok(catalog_root);
            }
            Value::Null => values[i] = Value::Int64(rowid),
            _ => {}
        }
    }

    let key = btree::key_from_rowid(rowid);
    let old_bytes = btree::find(txn, table.root, &key)?
        .ok_or_else(|| DbError::sql(format!("no such row: {table_name} rowid {rowid}")))?;
    let old_values = record::decode_record_with_overflow(txn, &old_bytes)?;

    let new_bytes = record::encode_record(txn, &values)?;
    table.root = btree::update(txn, table.root, &key, &new_bytes)?;

    let mut new_catalog_root = catalog_root;
    for mut index in catalog::list_indexes_for_table(txn, catalog_root, table_name)? {
        index.root = maintain_index_on_update(txn, &index, &table, &old_values, &values, rowid, trigram_deltas, evaluator)?;
        new_catalog_root = catalog::put_index(txn, new_catalog_root, &index)?;
    }
    new_catalog_root = catalog::put_table(txn, new_catalog_root, &table)?;
    Ok(new_catalog_root)
}

/// Removes a row and every secondary-index entry pointing at it. A rowid
/// with no matching row is a no-op (mirrors `DELETE ... WHERE` matching zero
/// rows at the SQL layer).
pub fn delete_row<V: Vfs>(
    txn: &mut PageTxn<V>,
    catalog_root: PageId,
    table_name: &str,
    rowid: i64,
    trigram_deltas: &TrigramDeltas,
    evaluator: &dyn PredicateEvaluator,
) -> Result<PageId> {
    let mut table = lookup_table_or_err(txn, catalog_root, table_name)?;
    let key = btree::key_from_rowid(rowid);
    let Some(bytes) = btree::find(txn, table.root, &key)? else {
        return Ok(catalog_root);
    };
    let row = record::decode_record_with_overflow(txn, &bytes)?;

    let mut new_catalog_root = catalog_root;
    for mut index in catalog::list_indexes_for_table(txn, catalog_root, table_name)? {
        index.root = maintain_index_on_delete(txn, &index, &table, &row, rowid, trigram_deltas, evaluator)?;
        new_catalog_root = catalog::put_index(txn, new_catalog_root, &index)?;
    }

    btree::delete(txn, table.root, &key)?;
    new_catalog_root = catalog::put_table(txn, new_catalog_root, &table)?;
    Ok(new_catalog_root)
}

/// Reads a single row by rowid, or `None` if absent.
pub fn read_row_at<V: Vfs>(txn: &PageTxn<V>, catalog_root: PageId, table_name: &str, rowid: i64) -> Result<Option<Vec<Value>>> {
    let table = lookup_table_or_err(txn, catalog_root, table_name)?;
    match btree::find(txn, table.root, &btree::key_from_rowid(rowid))? {
        Some(bytes) => Ok(Some(record::decode_record_with_overflow(txn, &bytes)?)),
        None => Ok(None),
    }
}

/// A forward-only scan over a table's rows in rowid order.
pub struct TableScan<'t, V: Vfs> {
    txn: &'t PageTxn<'t, V>,
    cursor: btree::cursor::Cursor<'t, V>,
}

impl<'t, V: Vfs> TableScan<'t, V> {
    pub fn next(&mut self) -> Result<Option<(i64, Vec<Value>)>> {
        match self.cursor.next()? {
            Some((key, bytes)) => {
                let rowid = btree::rowid_from_key(&key);
                let values = record::decode_record_with_overflow(self.txn, &bytes)?;
                Ok(Some((rowid, values)))
            }
            None => Ok(None),
        }
    }
}

pub fn scan_table<'t, V: Vfs>(txn: &'t PageTxn<'t, V>, catalog_root: PageId, table_name: &str) -> Result<TableScan<'t, V>> {
    let table = lookup_table_or_err(txn, catalog_root, table_name)?;
    Ok(TableScan {
        txn,
        cursor: btree::cursor::Cursor::open(txn, table.root)?,
    })
}

/// Mirrors the truncation `encode_index_value`/`decode_index_value` apply to
/// Text/Blob payloads longer than `INDEX_VALUE_CAP`, so a point lookup on a
/// long value compares against the same prefix the index entry actually
/// stores rather than the full value it can never equal.
fn truncated_for_index_compare(value: &Value) -> Value {
    match value {
        Value::Text(s) => {
            let cut = s.len().min(INDEX_VALUE_CAP);
            Value::Text(String::from_utf8_lossy(&s.as_bytes()[..cut]).into_owned())
        }
        Value::Blob(b) => Value::Blob(b[..b.len().min(INDEX_VALUE_CAP)].to_vec()),
        other => other.clone(),
    }
}

/// Point lookup on a single-column index: every rowid whose indexed column
/// equals `target`, disambiguating any key collision by comparing the
/// embedded value (§6.2 `indexSeek`). The embedded value is truncated to
/// `INDEX_VALUE_CAP` for long Text/Blob columns, so a match there only
/// proves the row's value shares that prefix with `target`; such candidates
/// are confirmed by reading the row back before being returned.
pub fn index_seek<V: Vfs>(txn: &PageTxn<V>, catalog_root: PageId, table_name: &str, index_name: &str, target: &Value) -> Result<Vec<i64>> {
    let table = lookup_table_or_err(txn, catalog_root, table_name)?;
    let index = catalog::lookup_index(txn, catalog_root, index_name)?
        .ok_or_else(|| DbError::sql(format!("no such index: {index_name}")))?;
    let cols = index_columns(&index, &table)?;
    if cols.len() != 1 {
        return Err(DbError::sql("index_seek only supports single-column indexes"));
    }
    let col_idx = cols[0];
    let needs_verify = match target {
        Value::Text(s) => s.len() > INDEX_VALUE_CAP,
        Value::Blob(b) => b.len() > INDEX_VALUE_CAP,
        _ => false,
    };
    let compare_target = truncated_for_index_compare(target);
    let key = column_key_bytes(target);
    let mut out = Vec::new();
    let mut cursor = btree::cursor::Cursor::open_at(txn, index.root, Some(&key))?;
    while let Some((k, value_bytes)) = cursor.next()? {
        if k != key {
            break;
        }
        let (values, rowid) = decode_index_entry(&value_bytes)?;
        if values.first() != Some(&compare_target) {
            continue;
        }
        if needs_verify {
            let row = read_row_at(txn, catalog_root, table_name, rowid)?;
            if row.as_ref().and_then(|r| r.get(col_idx)) != Some(target) {
                continue;
            }
        }
        out.push(rowid);
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Index build / rebuild (§4.7 "Index build")
// ---------------------------------------------------------------------

/// Frees every page reachable from `root` (leaves, internal nodes, and any
/// overflow chains their cells point at), used to reclaim an old index tree
/// before rebuilding it (§4.7 `rebuildIndex`: "frees all non-root pages of
/// the old index" — here the root itself is also freed since a rebuild
/// always replaces it with a freshly bulk-built tree).
pub fn free_tree<V: Vfs>(txn: &mut PageTxn<V>, root: PageId) -> Result<()> {
    if root == 0 {
        return Ok(());
    }
    let data = txn.page(root)?;
    match btree::page::page_type(&data)? {
        btree::page::PAGE_TYPE_LEAF => {
            let (cells, _) = btree::page::decode_leaf_page(&data)?;
            for cell in &cells {
                if let btree::page::LeafValue::Overflow { head } = cell.value {
                    btree::overflow::free_chain(txn, head)?;
                }
            }
            txn.free_page(root)
        }
        btree::page::PAGE_TYPE_INTERNAL => {
            let (cells, rightmost) = btree::page::decode_internal_page(&data)?;
            for cell in &cells {
                free_tree(txn, cell.child)?;
            }
            free_tree(txn, rightmost)?;
            txn.free_page(root)
        }
        other => Err(DbError::corruption(format!("unexpected page type {other} while freeing a tree"))),
    }
}

fn scan_table_rows<V: Vfs>(txn: &PageTxn<V>, table_root: PageId) -> Result<Vec<(i64, Vec<Value>)>> {
    let mut cursor = btree::cursor::Cursor::open(txn, table_root)?;
    let mut rows = Vec::new();
    while let Some((key, bytes)) = cursor.next()? {
        let rowid = btree::rowid_from_key(&key);
        rows.push((rowid, record::decode_record_with_overflow(txn, &bytes)?));
    }
    Ok(rows)
}

/// Scans `table_name` and bulk-builds a fresh B+Tree for a single/composite
/// column `Btree` index, setting `index.root` (§4.7 `buildIndexForColumn[s]`).
pub fn build_index_for_columns<V: Vfs>(
    txn: &mut PageTxn<V>,
    catalog_root: PageId,
    table_name: &str,
    index: &mut IndexDef,
    evaluator: &dyn PredicateEvaluator,
) -> Result<()> {
    let table = lookup_table_or_err(txn, catalog_root, table_name)?;
    let cols = index_columns(index, &table)?;
    let rows = scan_table_rows(txn, table.root)?;

    let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    for (rowid, row) in &rows {
        if !should_include(index, row, &table, evaluator) {
            continue;
        }
        if let Some(key) = index_key(&cols, row) {
            let values: Vec<Value> = cols.iter().map(|&i| row[i].clone()).collect();
            pairs.push((key, encode_index_entry(&values, *rowid)));
        }
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    index.root = btree::bulk_build_from_sorted(txn, pairs)?;
    Ok(())
}

/// Scans `table_name` and rebuilds a trigram index's postings from scratch
/// (§4.7 `buildTrigramIndexForColumn`): aggregate postings per trigram in a
/// hash map, then write each trigram's sorted rowid list.
pub fn build_trigram_index_for_column<V: Vfs>(
    txn: &mut PageTxn<V>,
    catalog_root: PageId,
    table_name: &str,
    index: &mut IndexDef,
    evaluator: &dyn PredicateEvaluator,
) -> Result<()> {
    let table = lookup_table_or_err(txn, catalog_root, table_name)?;
    let col = trigram_column(index, &table)?;
    let rows = scan_table_rows(txn, table.root)?;

    let mut postings: HashMap<u32, Vec<i64>> = HashMap::new();
    for (rowid, row) in &rows {
        if !should_include(index, row, &table, evaluator) {
            continue;
        }
        if let Value::Text(text) = &row[col] {
            for trigram in extract_trigrams(text) {
                postings.entry(trigram).or_default().push(*rowid);
            }
        }
    }

    let mut trigrams: Vec<u32> = postings.keys().copied().collect();
    trigrams.sort_unstable();
    let mut root: PageId = 0;
    for trigram in trigrams {
        let mut rowids = postings.remove(&trigram).unwrap();
        rowids.sort_unstable();
        root = write_postings(txn, root, trigram, &rowids)?;
    }
    index.root = root;
    Ok(())
}

/// Frees the old index tree, rebuilds it from the table's current contents,
/// and atomically swaps the catalog's root pointer for it (§4.7
/// `rebuildIndex`).
pub fn rebuild_index<V: Vfs>(
    txn: &mut PageTxn<V>,
    catalog_root: PageId,
    index_name: &str,
    evaluator: &dyn PredicateEvaluator,
) -> Result<PageId> {
    let mut index = catalog::lookup_index(txn, catalog_root, index_name)?
        .ok_or_else(|| DbError::sql(format!("no such index: {index_name}")))?;
    let old_root = index.root;

    match index.kind {
        IndexKind::Btree => build_index_for_columns(txn, catalog_root, &index.table, &mut index, evaluator)?,
        IndexKind::Trigram => build_trigram_index_for_column(txn, catalog_root, &index.table, &mut index, evaluator)?,
    }
    free_tree(txn, old_root)?;
    catalog::put_index(txn, catalog_root, &index)
}

// ---------------------------------------------------------------------
// ALTER TABLE (§4.7)
// ---------------------------------------------------------------------

pub enum AlterAction {
    AddColumn(ColumnDef),
    DropColumn(String),
    RenameColumn { from: String, to: String },
    AlterColumnType { name: String, new_type: ColumnType },
}

struct ColumnPlan {
    origin: Option<usize>,
    def: ColumnDef,
    cast_from: Option<ColumnType>,
}

/// CAST matrix for `ALTER COLUMN TYPE` among Int64/Float64/Text/Bool (§4.7);
/// any other pairing (Blob, Decimal, Uuid) is rejected. `Null` always casts
/// to `Null`.
fn cast_value(value: Value, to: ColumnType) -> Result<Value> {
    if matches!(value, Value::Null) {
        return Ok(Value::Null);
    }
    match (&value, to) {
        (Value::Int64(i), ColumnType::Float64) => Ok(Value::Float64(*i as f64)),
        (Value::Int64(i), ColumnType::Text) => Ok(Value::Text(i.to_string())),
        (Value::Int64(i), ColumnType::Bool) => Ok(Value::Bool(*i != 0)),
        (Value::Int64(_), ColumnType::Int64) => Ok(value),
        (Value::Float64(f), ColumnType::Int64) => Ok(Value::Int64(*f as i64)),
        (Value::Float64(f), ColumnType::Text) => Ok(Value::Text(f.to_string())),
        (Value::Float64(_), ColumnType::Float64) => Ok(value),
        (Value::Text(s), ColumnType::Int64) => s
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|_| DbError::sql(format!("cannot cast '{s}' to INT64"))),
        (Value::Text(s), ColumnType::Float64) => s
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|_| DbError::sql(format!("cannot cast '{s}' to FLOAT64"))),
        (Value::Text(s), ColumnType::Bool) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(DbError::sql(format!("cannot cast '{s}' to BOOL"))),
        },
        (Value::Text(_), ColumnType::Text) => Ok(value),
        (Value::Bool(b), ColumnType::Int64) => Ok(Value::Int64(*b as i64)),
        (Value::Bool(b), ColumnType::Float64) => Ok(Value::Float64(if *b { 1.0 } else { 0.0 })),
        (Value::Bool(b), ColumnType::Text) => Ok(Value::Text(b.to_string())),
        (Value::Bool(_), ColumnType::Bool) => Ok(value),
        (from, to) => Err(DbError::sql(format!("unsupported ALTER COLUMN TYPE cast from {from:?} to {to:?}"))),
    }
}

/// Applies a sequence of ALTER TABLE actions as a full table rewrite into a
/// fresh B+Tree, then drops or rebuilds dependent indexes and persists the
/// new `TableDef`/`IndexDef`s (§4.7). Bumping `schema_cookie` on the DB
/// header is the caller's responsibility (it lives outside the catalog
/// B+Tree, in [`crate::header::DbHeader`]).
pub fn alter_table<V: Vfs>(
    txn: &mut PageTxn<V>,
    catalog_root: PageId,
    table_name: &str,
    actions: &[AlterAction],
    evaluator: &dyn PredicateEvaluator,
) -> Result<PageId> {
    let mut table = lookup_table_or_err(txn, catalog_root, table_name)?;

    let mut plan: Vec<ColumnPlan> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| ColumnPlan {
            origin: Some(i),
            def: c.clone(),
            cast_from: None,
        })
        .collect();

    let mut dropped_names: Vec<String> = Vec::new();
    let mut renames: Vec<(String, String)> = Vec::new();

    for action in actions {
        match action {
            AlterAction::AddColumn(col) => plan.push(ColumnPlan {
                origin: None,
                def: col.clone(),
                cast_from: None,
            }),
            AlterAction::DropColumn(name) => {
                plan.retain(|p| &p.def.name != name);
                dropped_names.push(name.clone());
            }
            AlterAction::RenameColumn { from, to } => {
                if let Some(p) = plan.iter_mut().find(|p| &p.def.name == from) {
                    p.def.name = to.clone();
                }
                renames.push((from.clone(), to.clone()));
            }
            AlterAction::AlterColumnType { name, new_type } => {
                if let Some(p) = plan.iter_mut().find(|p| &p.def.name == *name) {
                    p.cast_from = Some(p.def.ty);
                    p.def.ty = *new_type;
                }
            }
        }
    }

    let old_rows = scan_table_rows(txn, table.root)?;
    let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(old_rows.len());
    for (rowid, old_row) in &old_rows {
        let mut new_row = Vec::with_capacity(plan.len());
        for p in &plan {
            let value = match p.origin {
                Some(i) => {
                    let v = old_row[i].clone();
                    match p.cast_from {
                        Some(_) => cast_value(v, p.def.ty)?,
                        None => v,
                    }
                }
                None => Value::Null,
            };
            new_row.push(value);
        }
        let bytes = record::encode_record(txn, &new_row)?;
        pairs.push((btree::key_from_rowid(*rowid), bytes));
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let new_root = btree::bulk_build_from_sorted(txn, pairs)?;

    let old_table_root = table.root;
    table.root = new_root;
    table.columns = plan.into_iter().map(|p| p.def).collect();

    let mut new_catalog_root = catalog::put_table(txn, catalog_root, &table)?;
    free_tree(txn, old_table_root)?;

    for mut index in catalog::list_indexes_for_table(txn, catalog_root, table_name)? {
        let old_index_root = index.root;
        match &mut index.key {
            IndexKey::Columns(cols) if cols.iter().any(|c| dropped_names.contains(c)) => {
                new_catalog_root = catalog::drop_index(txn, new_catalog_root, &index.name)?;
                free_tree(txn, old_index_root)?;
                continue;
            }
            IndexKey::Columns(cols) => {
                for (from, to) in &renames {
                    for c in cols.iter_mut() {
                        if c == from {
                            *c = to.clone();
                        }
                    }
                }
            }
            IndexKey::Expr(_) => {
                // Expression indexes are opaque to this crate; left as-is
                // for the external SQL layer to rebuild if it needs to.
                new_catalog_root = catalog::put_index(txn, new_catalog_root, &index)?;
                continue;
            }
        }

        match index.kind {
            IndexKind::Btree => build_index_for_columns(txn, new_catalog_root, table_name, &mut index, evaluator)?,
            IndexKind::Trigram => build_trigram_index_for_column(txn, new_catalog_root, table_name, &mut index, evaluator)?,
        }
        free_tree(txn, old_index_root)?;
        new_catalog_root = catalog::put_index(txn, new_catalog_root, &index)?;
    }

    Ok(new_catalog_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, IndexDef, IndexKey, IndexKind, TableDef};
    use crate::pager::Pager;
    use crate::vfs::{OsVfs, Vfs as _};

    fn new_pager(page_size: usize) -> Pager<OsVfs> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.db");
        std::mem::forget(dir);
        let file = OsVfs.open(&path, true).unwrap();
        Pager::new(file, page_size, 64)
    }

    fn widgets_table() -> TableDef {
        TableDef::new(
            "widgets",
            vec![
                ColumnDef::new("id", ColumnType::Int64).primary_key(),
                ColumnDef::new("name", ColumnType::Text).not_null(),
            ],
        )
    }

    #[test]
    fn insert_row_assigns_auto_increment_rowid() {
        let pager = new_pager(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let deltas = TrigramDeltas::new();
        let mut root = catalog::put_table(&mut txn, 0, &widgets_table()).unwrap();

        for name in ["a", "b", "c"] {
            let (new_root, rowid) = insert_row(
                &mut txn,
                root,
                "widgets",
                vec![Value::Null, Value::Text(name.to_string())],
                &deltas,
                &AlwaysTrue,
            )
            .unwrap();
            root = new_root;
            assert!(rowid >= 1);
        }

        let table = catalog::lookup_table(&txn, root, "widgets").unwrap().unwrap();
        let rows = scan_table_rows(&txn, table.root).unwrap();
        let rowids: Vec<i64> = rows.iter().map(|(r, _)| *r).collect();
        assert_eq!(rowids, vec![1, 2, 3]);
    }

    #[test]
    fn insert_row_rejects_not_null_violation() {
        let pager = new_pager(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let deltas = TrigramDeltas::new();
        let root = catalog::put_table(&mut txn, 0, &widgets_table()).unwrap();

        let err = insert_row(&mut txn, root, "widgets", vec![Value::Null, Value::Null], &deltas, &AlwaysTrue).unwrap_err();
        assert!(err.to_string().contains("NOT NULL"));
    }

    #[test]
    fn secondary_index_seek_finds_inserted_row() {
        let pager = new_pager(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let deltas = TrigramDeltas::new();
        let mut root = catalog::put_table(&mut txn, 0, &widgets_table()).unwrap();
        let index = IndexDef {
            name: "idx_name".into(),
            table: "widgets".into(),
            kind: IndexKind::Btree,
            unique: false,
            key: IndexKey::Columns(vec!["name".into()]),
            partial_predicate: None,
            root: 0,
        };
        root = catalog::put_index(&mut txn, root, &index).unwrap();

        let (root, rowid) = insert_row(
            &mut txn,
            root,
            "widgets",
            vec![Value::Null, Value::Text("bolt".into())],
            &deltas,
            &AlwaysTrue,
        )
        .unwrap();

        let found = index_seek(&txn, root, "widgets", "idx_name", &Value::Text("bolt".into())).unwrap();
        assert_eq!(found, vec![rowid]);
    }

    #[test]
    fn update_row_changing_primary_key_relocates_row() {
        let pager = new_pager(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let deltas = TrigramDeltas::new();
        let root = catalog::put_table(&mut txn, 0, &widgets_table()).unwrap();
        let (root, rowid) = insert_row(
            &mut txn,
            root,
            "widgets",
            vec![Value::Int64(1), Value::Text("bolt".into())],
            &deltas,
            &AlwaysTrue,
        )
        .unwrap();
        assert_eq!(rowid, 1);

        let root = update_row(
            &mut txn,
            root,
            "widgets",
            1,
            vec![Value::Int64(99), Value::Text("bolt".into())],
            &deltas,
            &AlwaysTrue,
        )
        .unwrap();

        assert!(read_row_at(&txn, root, "widgets", 1).unwrap().is_none());
        assert!(read_row_at(&txn, root, "widgets", 99).unwrap().is_some());
    }

    #[test]
    fn delete_row_removes_row_and_index_entry() {
        let pager = new_pager(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let deltas = TrigramDeltas::new();
        let mut root = catalog::put_table(&mut txn, 0, &widgets_table()).unwrap();
        let index = IndexDef {
            name: "idx_name".into(),
            table: "widgets".into(),
            kind: IndexKind::Btree,
            unique: true,
            key: IndexKey::Columns(vec!["name".into()]),
            partial_predicate: None,
            root: 0,
        };
        root = catalog::put_index(&mut txn, root, &index).unwrap();
        let (root, rowid) = insert_row(
            &mut txn,
            root,
            "widgets",
            vec![Value::Null, Value::Text("bolt".into())],
            &deltas,
            &AlwaysTrue,
        )
        .unwrap();

        let root = delete_row(&mut txn, root, "widgets", rowid, &deltas, &AlwaysTrue).unwrap();
        assert!(read_row_at(&txn, root, "widgets", rowid).unwrap().is_none());
        assert!(index_seek(&txn, root, "widgets", "idx_name", &Value::Text("bolt".into())).unwrap().is_empty());
    }

    #[test]
    fn trigram_deltas_merge_with_on_disk_postings() {
        let pager = new_pager(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let deltas = TrigramDeltas::new();

        let trigram = extract_trigrams("abcdef").into_iter().next().unwrap();
        let root = write_postings(&mut txn, 0, trigram, &[1, 2, 3]).unwrap();

        deltas.record_insert("idx", 4, "abcdef");
        deltas.record_delete("idx", 2, "abcdef");

        let (rowids, truncated) = deltas.get_postings_with_deltas(&txn, "idx", root, trigram, 10).unwrap();
        assert!(!truncated);
        assert_eq!(rowids, vec![1, 3, 4]);
    }

    #[test]
    fn rebuild_index_reflects_current_table_contents() {
        let pager = new_pager(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let deltas = TrigramDeltas::new();
        let mut root = catalog::put_table(&mut txn, 0, &widgets_table()).unwrap();
        let index = IndexDef {
            name: "idx_name".into(),
            table: "widgets".into(),
            kind: IndexKind::Btree,
            unique: false,
            key: IndexKey::Columns(vec!["name".into()]),
            partial_predicate: None,
            root: 0,
        };
        root = catalog::put_index(&mut txn, root, &index).unwrap();
        for name in ["a", "b"] {
            let (new_root, _) = insert_row(
                &mut txn,
                root,
                "widgets",
                vec![Value::Null, Value::Text(name.to_string())],
                &deltas,
                &AlwaysTrue,
            )
            .unwrap();
            root = new_root;
        }

        root = rebuild_index(&mut txn, root, "idx_name", &AlwaysTrue).unwrap();
        let found_a = index_seek(&txn, root, "widgets", "idx_name", &Value::Text("a".into())).unwrap();
        let found_b = index_seek(&txn, root, "widgets", "idx_name", &Value::Text("b".into())).unwrap();
        assert_eq!(found_a.len(), 1);
        assert_eq!(found_b.len(), 1);
    }

    #[test]
    fn alter_table_add_column_backfills_null_and_bumps_metadata() {
        let pager = new_pager(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let deltas = TrigramDeltas::new();
        let mut root = catalog::put_table(&mut txn, 0, &widgets_table()).unwrap();
        let (new_root, rowid) = insert_row(
            &mut txn,
            root,
            "widgets",
            vec![Value::Null, Value::Text("bolt".into())],
            &deltas,
            &AlwaysTrue,
        )
        .unwrap();
        root = new_root;

        root = alter_table(
            &mut txn,
            root,
            "widgets",
            &[AlterAction::AddColumn(ColumnDef::new("weight", ColumnType::Float64))],
            &AlwaysTrue,
        )
        .unwrap();

        let row = read_row_at(&txn, root, "widgets", rowid).unwrap().unwrap();
        assert_eq!(row.len(), 3);
        assert_eq!(row[2], Value::Null);
    }

    #[test]
    fn alter_column_type_casts_existing_values() {
        let pager = new_pager(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let deltas = TrigramDeltas::new();
        let table = TableDef::new(
            "t",
            vec![
                ColumnDef::new("id", ColumnType::Int64).primary_key(),
                ColumnDef::new("n", ColumnType::Int64),
            ],
        );
        let mut root = catalog::put_table(&mut txn, 0, &table).unwrap();
        let (new_root, rowid) = insert_row(&mut txn, root, "t", vec![Value::Null, Value::Int64(42)], &deltas, &AlwaysTrue).unwrap();
        root = new_root;

        root = alter_table(
            &mut txn,
            root,
            "t",
            &[AlterAction::AlterColumnType {
                name: "n".into(),
                new_type: ColumnType::Text,
            }],
            &AlwaysTrue,
        )
        .unwrap();

        let row = read_row_at(&txn, root, "t", rowid).unwrap().unwrap();
        assert_eq!(row[1], Value::Text("42".to_string()));
    }

    #[test]
    fn alter_table_drop_column_also_drops_dependent_index() {
        let pager = new_pager(4096);
        let mut txn = PageTxn::new(&pager, 0, 0, 0);
        let deltas = TrigramDeltas::new();
        let mut root = catalog::put_table(&mut txn, 0, &widgets_table()).unwrap();
        let index = IndexDef {
            name: "idx_name".into(),
            table: "widgets".into(),
            kind: IndexKind::Btree,
            unique: false,
            key: IndexKey::Columns(vec!["name".into()]),
            partial_predicate: None,
            root: 0,
        };
        root = catalog::put_index(&mut txn, root, &index).unwrap();
        let (new_root, _) = insert_row(
            &mut txn,
            root,
            "widgets",
            vec![Value::Null, Value::Text("bolt".into())],
            &deltas,
            &AlwaysTrue,
        )
        .unwrap();
        root = new_root;

        root = alter_table(&mut txn, root, "widgets", &[AlterAction::DropColumn("name".into())], &AlwaysTrue).unwrap();

        assert!(catalog::lookup_index(&txn, root, "idx_name").unwrap().is_none());
        let table = catalog::lookup_table(&txn, root, "widgets").unwrap().unwrap();
        assert_eq!(table.columns.len(), 1);
    }
}
