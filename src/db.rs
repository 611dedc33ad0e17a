//! The top-level handle tying Pager, WAL, catalog, and storage together
//! behind the public API (§6.2). Grounded in `squeak::physical::db::DB`'s
//! shape (a struct wrapping the file state behind a lock, with `open` doing
//! header bootstrap) but generalized from a read-only reader into a
//! single-writer/multi-reader transactional engine: where `DB` holds one
//! `Mutex<DBState>`, `Db` holds the `Pager`'s own sharded cache and the
//! `Wal`'s own write lock, each already serializing the concern it owns, so
//! the only extra state `Db` itself guards is the small header scalar.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::catalog::{self, IndexDef, IndexKind, TableDef, TriggerDef, ViewDef};
use crate::error::{DbError, Result};
use crate::header::{DbHeader, HEADER_SIZE};
use crate::pager::txn::PageTxn;
use crate::pager::{PageId, Pager};
use crate::record::Value;
use crate::storage::{self, AlterAction, AlwaysTrue, PredicateEvaluator, TrigramDeltas};
use crate::vfs::faulty::FailpointOutcome;
use crate::vfs::{Vfs, VfsFile};
use crate::wal::{CheckpointStats, Lsn, ReadTxn, Wal, WalOptions, WalSyncMode, WalWriter};

const HEADER_PAGE: PageId = 1;

/// How thoroughly a bulk load fsyncs as it goes (§6.2 `bulkLoad.durability`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkLoadDurability {
    /// Every batch commits (and fsyncs) normally.
    Full,
    /// Batches commit without an fsync; a single fsync happens at the end.
    Deferred,
    /// No fsync at all during the load; only safe for throwaway/staging data.
    None,
}

#[derive(Debug, Clone)]
pub struct BulkLoadOptions {
    pub batch_size: usize,
    pub sync_interval: usize,
    pub disable_indexes: bool,
    pub durability: BulkLoadDurability,
    pub checkpoint_on_complete: bool,
}

impl Default for BulkLoadOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            sync_interval: 10,
            disable_indexes: false,
            durability: BulkLoadDurability::Full,
            checkpoint_on_complete: true,
        }
    }
}

/// Every tunable in §6.2, with `Default` providing the listed defaults.
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub cache_pages: usize,
    /// Only honored the first time a database file is created.
    pub page_size: u32,
    pub checkpoint_every_bytes: u64,
    pub checkpoint_every_ms: u64,
    pub checkpoint_memory_threshold: usize,
    pub reader_warn_ms: u64,
    pub reader_timeout_ms: u64,
    pub max_wal_bytes_per_reader: u64,
    pub reader_check_interval_ms: u64,
    pub wal_sync_mode: WalSyncMode,
    pub bulk_load: BulkLoadOptions,
}

impl Default for DbOptions {
    fn default() -> Self {
        let wal_defaults = WalOptions::default();
        Self {
            cache_pages: 1024,
            page_size: crate::header::DEFAULT_PAGE_SIZE,
            checkpoint_every_bytes: wal_defaults.checkpoint_every_bytes,
            checkpoint_every_ms: wal_defaults.checkpoint_every_ms,
            checkpoint_memory_threshold: wal_defaults.checkpoint_memory_threshold,
            reader_warn_ms: wal_defaults.reader_warn_ms,
            reader_timeout_ms: wal_defaults.reader_timeout_ms,
            max_wal_bytes_per_reader: wal_defaults.max_wal_bytes_per_reader,
            reader_check_interval_ms: wal_defaults.checkpoint_check_interval,
            wal_sync_mode: WalSyncMode::Full,
            bulk_load: BulkLoadOptions::default(),
        }
    }
}

impl DbOptions {
    fn wal_options(&self) -> WalOptions {
        WalOptions {
            reader_warn_ms: self.reader_warn_ms,
            reader_timeout_ms: self.reader_timeout_ms,
            max_wal_bytes_per_reader: self.max_wal_bytes_per_reader,
            checkpoint_every_bytes: self.checkpoint_every_bytes,
            checkpoint_every_ms: self.checkpoint_every_ms,
            checkpoint_memory_threshold: self.checkpoint_memory_threshold,
            checkpoint_check_interval: self.reader_check_interval_ms.max(1),
            wal_sync_mode: self.wal_sync_mode,
        }
    }
}

/// A snapshot of the database's header plus catalog/table/index counts, for
/// operational tooling (§6.2 `dbInfo`).
#[derive(Debug, Clone)]
pub struct DbInfo {
    pub page_size: u32,
    pub schema_cookie: u32,
    pub catalog_root: PageId,
    pub freelist_count: u32,
    pub database_size_pages: u32,
    pub wal_end: Lsn,
    pub last_checkpoint_lsn: Lsn,
    pub table_count: usize,
    pub index_count: usize,
}

/// Ties a [`Pager`] and a [`Wal`] to one on-disk database, plus the small
/// amount of extra state (§6.2) neither owns on its own: the header scalar
/// fields (catalog root, freelist head/count, schema cookie), the logical
/// page count, the trigram delta buffers, and the predicate evaluator hook
/// secondary indexes need for partial/expression clauses (§1, Non-goals —
/// expression evaluation itself lives outside this crate; `Db` only needs
/// somewhere to plug a caller-supplied one in).
pub struct Db<V: Vfs> {
    pager: Pager<V>,
    wal: Wal<V>,
    header: Mutex<DbHeader>,
    logical_size: AtomicU32,
    trigram_deltas: TrigramDeltas,
    evaluator: Box<dyn PredicateEvaluator>,
    options: DbOptions,
}

fn pad_to_page(bytes: [u8; HEADER_SIZE], page_size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; page_size];
    buf[..HEADER_SIZE].copy_from_slice(&bytes);
    buf
}

impl<V: Vfs> Db<V> {
    /// Opens (creating if absent) the database file at `path` and its
    /// companion `<path>-wal`, bootstrapping a fresh header on first open and
    /// otherwise validating and recovering through the existing one (§4.3
    /// "Recovery", §8.1 header-integrity invariant).
    pub fn open(vfs: &V, path: &Path, options: DbOptions) -> Result<Self> {
        let mut probe = vfs.open(path, true)?;
        let existing_size = probe.size()?;

        let header = if existing_size >= HEADER_SIZE as u64 {
            let mut bytes = [0u8; HEADER_SIZE];
            probe.read_at(0, &mut bytes)?;
            let header = DbHeader::parse(&bytes)?;
            header.validate()?;
            header
        } else {
            DbHeader::new(options.page_size)
        };
        let page_size = header.page_size() as usize;

        let db_file = vfs.open(path, true)?;
        let pager = Pager::new(db_file, page_size, options.cache_pages);

        if existing_size < HEADER_SIZE as u64 {
            let buf = pad_to_page(header.to_bytes(), page_size);
            pager.write_page_to_file(HEADER_PAGE, &buf)?;
            pager.fsync()?;
        }

        let wal_path = wal_path_for(path);
        let wal_file = vfs.open(&wal_path, true)?;
        let wal = Wal::open(wal_file, page_size, options.wal_options())?;

        let file_pages = (pager.file_size()?.max(page_size as u64) / page_size as u64) as u32;
        let logical_size = file_pages.max(wal.max_indexed_page() + 1).max(1);

        // Recovery may have replayed page-1 frames more recent than what is
        // on disk (a crash or close before the next checkpoint); re-read the
        // header through the WAL's own snapshot overlay so the in-memory
        // copy this `Db` hands out to writers reflects the true latest
        // committed state, not a stale on-disk page (§4.3 "Recovery").
        let boot_txn = PageTxn::new(&pager, logical_size, header.freelist_head(), header.freelist_count())
            .with_wal_snapshot(&wal, wal.wal_end());
        let header = match boot_txn.page(HEADER_PAGE) {
            Ok(bytes) => DbHeader::parse(&bytes[..HEADER_SIZE])?,
            Err(_) => header,
        };

        Ok(Self {
            pager,
            wal,
            header: Mutex::new(header),
            logical_size: AtomicU32::new(logical_size),
            trigram_deltas: TrigramDeltas::new(),
            evaluator: Box::new(AlwaysTrue),
            options,
        })
    }

    /// Installs an evaluator used to decide partial-index inclusion; the
    /// default `AlwaysTrue` treats every row as included, which is correct
    /// for every index that has no `partial_predicate`.
    pub fn set_evaluator(&mut self, evaluator: Box<dyn PredicateEvaluator>) {
        self.evaluator = evaluator;
    }

    pub fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    fn persist_header_immediate(&self, header: &DbHeader) -> Result<()> {
        let buf = pad_to_page(header.to_bytes(), self.page_size());
        self.pager.write_page_to_file(HEADER_PAGE, &buf)?;
        if let Some(outcome) = self.check_header_failpoint() {
            outcome?;
        }
        self.pager.fsync()
    }

    fn check_header_failpoint(&self) -> Option<Result<()>> {
        self.pager
            .with_file(|file| {
                Ok(match file.failpoint("header_write") {
                    FailpointOutcome::Pass => None,
                    FailpointOutcome::Fail => Some(Err(DbError::io("header_write failpoint fired"))),
                    FailpointOutcome::Partial(_) => Some(Ok(())),
                })
            })
            .unwrap_or(None)
    }

    pub fn begin_transaction(&self) -> WriteTxn<'_, V> {
        let header = self.header.lock().unwrap().clone();
        let wal_writer = self.wal.begin_write();
        let database_size = self.logical_size.load(Ordering::SeqCst);
        let snapshot = self.wal.wal_end();
        let page_txn = PageTxn::new(&self.pager, database_size, header.freelist_head(), header.freelist_count())
            .with_wal_snapshot(&self.wal, snapshot);
        let catalog_root = header.catalog_root();
        WriteTxn {
            db: self,
            wal_writer,
            page_txn,
            header,
            catalog_root,
            schema_changed: false,
        }
    }

    pub fn begin_read(&self) -> Result<ReadSession<'_, V>> {
        let read = self.wal.begin_read();
        let snapshot = read.snapshot();
        let database_size = self.logical_size.load(Ordering::SeqCst);
        let page_txn = PageTxn::new(&self.pager, database_size, 0, 0).with_wal_snapshot(&self.wal, snapshot);
        let header_bytes = page_txn.page(HEADER_PAGE)?;
        let header = DbHeader::parse(&header_bytes[..HEADER_SIZE])?;
        Ok(ReadSession {
            read,
            page_txn,
            catalog_root: header.catalog_root(),
        })
    }

    /// Runs the three-phase checkpoint protocol (§4.3) and persists the
    /// resulting `lastCheckpointLsn` directly to the header.
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        let mut header = self.header.lock().unwrap().clone();
        let stats = self.wal.checkpoint(&self.pager, &mut header)?;
        self.persist_header_immediate(&header)?;
        *self.header.lock().unwrap() = header;
        Ok(stats)
    }

    pub fn db_info(&self) -> Result<DbInfo> {
        let session = self.begin_read()?;
        let header = self.header.lock().unwrap().clone();
        let tables = catalog::list_tables(&session.page_txn, session.catalog_root)?;
        let indexes = catalog::list_indexes(&session.page_txn, session.catalog_root)?;
        Ok(DbInfo {
            page_size: header.page_size(),
            schema_cookie: header.schema_cookie(),
            catalog_root: session.catalog_root,
            freelist_count: header.freelist_count(),
            database_size_pages: self.logical_size.load(Ordering::SeqCst),
            wal_end: self.wal.wal_end(),
            last_checkpoint_lsn: header.last_checkpoint_lsn(),
            table_count: tables.len(),
            index_count: indexes.len(),
        })
    }

    // Auto-commit convenience wrappers: each opens its own single-statement
    // transaction, per §6.2's free-function row/DDL operations (explicit
    // `beginTransaction`/`commitTransaction` is for multi-statement spans).

    pub fn insert_row(&self, table: &str, values: Vec<Value>) -> Result<i64> {
        let mut txn = self.begin_transaction();
        let rowid = txn.insert_row(table, values)?;
        txn.commit()?;
        Ok(rowid)
    }

    pub fn update_row(&self, table: &str, rowid: i64, values: Vec<Value>) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.update_row(table, rowid, values)?;
        txn.commit()?;
        Ok(())
    }

    pub fn delete_row(&self, table: &str, rowid: i64) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.delete_row(table, rowid)?;
        txn.commit()?;
        Ok(())
    }

    pub fn read_row_at(&self, table: &str, rowid: i64) -> Result<Option<Vec<Value>>> {
        self.begin_read()?.read_row_at(table, rowid)
    }

    pub fn scan_table_collect(&self, table: &str) -> Result<Vec<(i64, Vec<Value>)>> {
        let session = self.begin_read()?;
        let mut cursor = session.scan_table(table)?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next()? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn index_seek(&self, table: &str, index: &str, target: &Value) -> Result<Vec<i64>> {
        self.begin_read()?.index_seek(table, index, target)
    }

    pub fn create_table(&self, table: TableDef) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.create_table(table)?;
        txn.commit()?;
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.drop_table(name)?;
        txn.commit()?;
        Ok(())
    }

    pub fn create_index(&self, index: IndexDef) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.create_index(index)?;
        txn.commit()?;
        Ok(())
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.drop_index(name)?;
        txn.commit()?;
        Ok(())
    }

    pub fn alter_table(&self, table: &str, actions: &[AlterAction]) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.alter_table(table, actions)?;
        txn.commit()?;
        Ok(())
    }

    pub fn create_view(&self, view: ViewDef) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.create_view(view)?;
        txn.commit()?;
        Ok(())
    }

    pub fn drop_view(&self, name: &str) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.drop_view(name)?;
        txn.commit()?;
        Ok(())
    }

    pub fn rename_view(&self, old: &str, new: &str) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.rename_view(old, new)?;
        txn.commit()?;
        Ok(())
    }

    pub fn rebuild_index(&self, name: &str) -> Result<()> {
        let mut txn = self.begin_transaction();
        txn.rebuild_index(name)?;
        txn.commit()?;
        Ok(())
    }

    /// Returns up to `limit` rowids matching `text`'s trigrams, merging
    /// on-disk postings with any not-yet-checkpointed deltas (§4.6 [EXPANDED]
    /// `getTrigramPostingsWithDeltasUpTo`).
    pub fn trigram_search(&self, index_name: &str, text: &str, limit: usize) -> Result<(Vec<i64>, bool)> {
        let session = self.begin_read()?;
        let index = catalog::lookup_index(&session.page_txn, session.catalog_root, index_name)?
            .ok_or_else(|| DbError::sql(format!("no such index: {index_name}")))?;
        if index.kind != IndexKind::Trigram {
            return Err(DbError::sql(format!("index {index_name} is not a trigram index")));
        }
        storage::get_postings_with_deltas_merged(&session.page_txn, &index, &self.trigram_deltas, text, limit)
    }

    /// Batched bulk load per §6.2 `bulkLoad`: groups rows into transactions
    /// of `batch_size`, optionally skipping secondary-index maintenance until
    /// a single rebuild at the end, and honoring the requested durability
    /// tier by choosing whether intermediate batches fsync.
    pub fn bulk_load(&self, table: &str, rows: impl IntoIterator<Item = Vec<Value>>, options: &BulkLoadOptions) -> Result<usize> {
        let indexes = if options.disable_indexes {
            let session = self.begin_read()?;
            catalog::list_indexes_for_table(&session.page_txn, session.catalog_root, table)?
        } else {
            Vec::new()
        };

        let mut inserted = 0usize;
        let mut batch: Vec<Vec<Value>> = Vec::with_capacity(options.batch_size);
        let mut batches_since_sync = 0usize;

        let mut flush = |batch: &mut Vec<Vec<Value>>, batches_since_sync: &mut usize| -> Result<()> {
            if batch.is_empty() {
                return Ok(());
            }
            let mut txn = self.begin_transaction();
            for values in batch.drain(..) {
                if options.disable_indexes {
                    txn.insert_row_no_index_maintenance(table, values)?;
                } else {
                    txn.insert_row(table, values)?;
                }
            }
            *batches_since_sync += 1;
            let fsync_this_batch = match options.durability {
                BulkLoadDurability::Full => true,
                BulkLoadDurability::Deferred => *batches_since_sync >= options.sync_interval.max(1),
                BulkLoadDurability::None => false,
            };
            if fsync_this_batch {
                *batches_since_sync = 0;
                txn.commit()?;
            } else {
                txn.commit_without_fsync()?;
            }
            Ok(())
        };

        for values in rows {
            batch.push(values);
            inserted += 1;
            if batch.len() >= options.batch_size {
                flush(&mut batch, &mut batches_since_sync)?;
            }
        }
        flush(&mut batch, &mut batches_since_sync)?;

        if options.disable_indexes {
            for index in indexes {
                self.rebuild_index(&index.name)?;
            }
        }
        if options.checkpoint_on_complete {
            self.checkpoint()?;
        }
        Ok(inserted)
    }
}

fn wal_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push("-wal");
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => std::path::PathBuf::from(name),
    }
}

/// A single logical write transaction (§6.2 `beginTransaction` /
/// `commitTransaction` / `rollbackTransaction`). Holds the WAL's write lock
/// for its whole lifetime, which is exactly the single-writer serialization
/// §5 describes — a second `begin_transaction` call blocks until this one
/// commits or rolls back.
pub struct WriteTxn<'db, V: Vfs> {
    db: &'db Db<V>,
    wal_writer: WalWriter<'db, V>,
    page_txn: PageTxn<'db, V>,
    header: DbHeader,
    catalog_root: PageId,
    schema_changed: bool,
}

impl<'db, V: Vfs> WriteTxn<'db, V> {
    pub fn insert_row(&mut self, table: &str, values: Vec<Value>) -> Result<i64> {
        let (root, rowid) = storage::insert_row(
            &mut self.page_txn,
            self.catalog_root,
            table,
            values,
            &self.db.trigram_deltas,
            self.db.evaluator.as_ref(),
        )?;
        self.catalog_root = root;
        Ok(rowid)
    }

    /// Inserts without maintaining secondary indexes, for bulk loads with
    /// `disableIndexes` set; the caller is responsible for rebuilding every
    /// affected index afterwards (§6.2 `bulkLoad`).
    pub fn insert_row_no_index_maintenance(&mut self, table: &str, values: Vec<Value>) -> Result<i64> {
        storage::insert_row_only(&mut self.page_txn, self.catalog_root, table, values).map(|(root, rowid)| {
            self.catalog_root = root;
            rowid
        })
    }

    pub fn update_row(&mut self, table: &str, rowid: i64, values: Vec<Value>) -> Result<()> {
        self.catalog_root = storage::update_row(
            &mut self.page_txn,
            self.catalog_root,
            table,
            rowid,
            values,
            &self.db.trigram_deltas,
            self.db.evaluator.as_ref(),
        )?;
        Ok(())
    }

    pub fn delete_row(&mut self, table: &str, rowid: i64) -> Result<()> {
        self.catalog_root = storage::delete_row(
            &mut self.page_txn,
            self.catalog_root,
            table,
            rowid,
            &self.db.trigram_deltas,
            self.db.evaluator.as_ref(),
        )?;
        Ok(())
    }

    pub fn read_row_at(&self, table: &str, rowid: i64) -> Result<Option<Vec<Value>>> {
        storage::read_row_at(&self.page_txn, self.catalog_root, table, rowid)
    }

    pub fn create_table(&mut self, table: TableDef) -> Result<()> {
        if catalog::lookup_table(&self.page_txn, self.catalog_root, &table.name)?.is_some() {
            return Err(DbError::sql(format!("table {} already exists", table.name)));
        }
        self.catalog_root = catalog::put_table(&mut self.page_txn, self.catalog_root, &table)?;
        self.schema_changed = true;
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        let table = catalog::lookup_table(&self.page_txn, self.catalog_root, name)?
            .ok_or_else(|| DbError::sql(format!("no such table: {name}")))?;
        for index in catalog::list_indexes_for_table(&self.page_txn, self.catalog_root, name)? {
            storage::free_tree(&mut self.page_txn, index.root)?;
            self.catalog_root = catalog::drop_index(&mut self.page_txn, self.catalog_root, &index.name)?;
        }
        storage::free_tree(&mut self.page_txn, table.root)?;
        self.catalog_root = catalog::drop_table(&mut self.page_txn, self.catalog_root, name)?;
        self.schema_changed = true;
        Ok(())
    }

    pub fn create_index(&mut self, mut index: IndexDef) -> Result<()> {
        if catalog::lookup_index(&self.page_txn, self.catalog_root, &index.name)?.is_some() {
            return Err(DbError::sql(format!("index {} already exists", index.name)));
        }
        match index.kind {
            IndexKind::Btree => storage::build_index_for_columns(
                &mut self.page_txn,
                self.catalog_root,
                &index.table,
                &mut index,
                self.db.evaluator.as_ref(),
            )?,
            IndexKind::Trigram => storage::build_trigram_index_for_column(
                &mut self.page_txn,
                self.catalog_root,
                &index.table,
                &mut index,
                self.db.evaluator.as_ref(),
            )?,
        }
        self.catalog_root = catalog::put_index(&mut self.page_txn, self.catalog_root, &index)?;
        self.schema_changed = true;
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        let index = catalog::lookup_index(&self.page_txn, self.catalog_root, name)?
            .ok_or_else(|| DbError::sql(format!("no such index: {name}")))?;
        storage::free_tree(&mut self.page_txn, index.root)?;
        self.catalog_root = catalog::drop_index(&mut self.page_txn, self.catalog_root, name)?;
        self.schema_changed = true;
        Ok(())
    }

    pub fn alter_table(&mut self, table: &str, actions: &[AlterAction]) -> Result<()> {
        self.catalog_root = storage::alter_table(&mut self.page_txn, self.catalog_root, table, actions, self.db.evaluator.as_ref())?;
        self.schema_changed = true;
        Ok(())
    }

    pub fn create_view(&mut self, view: ViewDef) -> Result<()> {
        if catalog::lookup_view(&self.page_txn, self.catalog_root, &view.name)?.is_some() {
            return Err(DbError::sql(format!("view {} already exists", view.name)));
        }
        self.catalog_root = catalog::put_view(&mut self.page_txn, self.catalog_root, &view)?;
        self.schema_changed = true;
        Ok(())
    }

    pub fn drop_view(&mut self, name: &str) -> Result<()> {
        self.catalog_root = catalog::drop_view(&mut self.page_txn, self.catalog_root, name)?;
        self.schema_changed = true;
        Ok(())
    }

    pub fn rename_view(&mut self, old: &str, new: &str) -> Result<()> {
        let mut view = catalog::lookup_view(&self.page_txn, self.catalog_root, old)?
            .ok_or_else(|| DbError::sql(format!("no such view: {old}")))?;
        self.catalog_root = catalog::drop_view(&mut self.page_txn, self.catalog_root, old)?;
        view.name = new.to_string();
        self.catalog_root = catalog::put_view(&mut self.page_txn, self.catalog_root, &view)?;
        self.schema_changed = true;
        Ok(())
    }

    pub fn create_trigger(&mut self, trigger: TriggerDef) -> Result<()> {
        self.catalog_root = catalog::put_trigger(&mut self.page_txn, self.catalog_root, &trigger)?;
        self.schema_changed = true;
        Ok(())
    }

    pub fn drop_trigger(&mut self, name: &str) -> Result<()> {
        self.catalog_root = catalog::drop_trigger(&mut self.page_txn, self.catalog_root, name)?;
        self.schema_changed = true;
        Ok(())
    }

    pub fn rebuild_index(&mut self, name: &str) -> Result<()> {
        self.catalog_root = storage::rebuild_index(&mut self.page_txn, self.catalog_root, name, self.db.evaluator.as_ref())?;
        Ok(())
    }

    fn finish_commit(mut self) -> Result<(Lsn, bool)> {
        self.header.set_freelist_head(self.page_txn.freelist_head);
        self.header.set_freelist_count(self.page_txn.freelist_count);
        self.header.set_catalog_root(self.catalog_root);
        if self.schema_changed {
            self.header.bump_schema_cookie();
        }
        let header_bytes = pad_to_page(self.header.to_bytes(), self.page_txn.page_size());
        {
            let page1 = self.page_txn.page_mut(HEADER_PAGE)?;
            page1.copy_from_slice(&header_bytes);
        }

        let (dirty_pages, database_size, _, _) = self.page_txn.into_parts();
        for (page_id, bytes) in &dirty_pages {
            self.wal_writer.write_page(*page_id, bytes);
        }
        let lsn = self.wal_writer.commit()?;
        self.db.logical_size.store(database_size.max(1), Ordering::SeqCst);
        *self.db.header.lock().unwrap() = self.header.clone();

        let schema_changed = self.schema_changed;
        if schema_changed {
            self.db.persist_header_immediate(&self.header)?;
        }
        Ok((lsn, schema_changed))
    }

    /// Commits, fsyncing the WAL (subject to `DbOptions::wal_sync_mode`) and,
    /// if this transaction touched the schema, immediately rewriting and
    /// fsyncing the header a second time (§6.2: "All DDL bumps schemaCookie
    /// and fsyncs the header").
    pub fn commit(self) -> Result<Lsn> {
        let db = self.db;
        let (lsn, _) = self.finish_commit()?;
        if db.wal.should_checkpoint() {
            db.checkpoint()?;
        }
        Ok(lsn)
    }

    /// Commits like [`Self::commit`] but skips the auto-checkpoint check;
    /// used by `bulk_load`'s deferred/none durability tiers, which checkpoint
    /// once at the end instead of after every batch.
    pub fn commit_without_fsync(self) -> Result<Lsn> {
        self.finish_commit().map(|(lsn, _)| lsn)
    }

    /// Discards every uncommitted change. Nothing durable has happened for
    /// this transaction, so this is just dropping the dirty overlay and the
    /// WAL write lock; held under the rollback lock in read mode as a nod to
    /// §4.2's "RW-lock held in write mode during rollback cache scrubbing" —
    /// here there is no shared-cache scrubbing to do, since dirty pages never
    /// touch the shared Pager cache before commit.
    pub fn rollback(self) {
        let _guard = self.db.pager.rollback_lock().read().unwrap();
        self.wal_writer.rollback();
    }
}

/// A read-only view pinned to one WAL snapshot (§4.3 "Snapshot overlay",
/// §5). Every call sees exactly the rows committed as of `begin_read()`,
/// regardless of what the writer commits afterwards, until the session is
/// dropped (which releases the reader's pin on the WAL per §4.2's
/// long-reader policy).
pub struct ReadSession<'db, V: Vfs> {
    read: ReadTxn<'db, V>,
    page_txn: PageTxn<'db, V>,
    catalog_root: PageId,
}

impl<'db, V: Vfs> ReadSession<'db, V> {
    pub fn snapshot(&self) -> Lsn {
        self.read.snapshot()
    }

    pub fn read_row_at(&self, table: &str, rowid: i64) -> Result<Option<Vec<Value>>> {
        self.read.check_aborted()?;
        storage::read_row_at(&self.page_txn, self.catalog_root, table, rowid)
    }

    pub fn scan_table(&self, table: &str) -> Result<storage::TableScan<'_, V>> {
        self.read.check_aborted()?;
        storage::scan_table(&self.page_txn, self.catalog_root, table)
    }

    pub fn index_seek(&self, table: &str, index: &str, target: &Value) -> Result<Vec<i64>> {
        self.read.check_aborted()?;
        storage::index_seek(&self.page_txn, self.catalog_root, table, index, target)
    }

    pub fn list_tables(&self) -> Result<Vec<TableDef>> {
        catalog::list_tables(&self.page_txn, self.catalog_root)
    }

    pub fn list_indexes(&self) -> Result<Vec<IndexDef>> {
        catalog::list_indexes(&self.page_txn, self.catalog_root)
    }

    pub fn list_views(&self) -> Result<Vec<ViewDef>> {
        catalog::list_views(&self.page_txn, self.catalog_root)
    }
}
