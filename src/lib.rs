//! DecentDB: an embedded, single-file relational database storage and
//! transaction core. Owns the on-disk page format, the write-ahead log,
//! the B+Tree, the record codec, and catalog/row/index storage; a SQL
//! parser, planner, or expression evaluator is expected to sit on top of
//! this crate, not inside it (§1, Non-goals).
//!
//! The [`Db`] handle is the entry point: [`Db::open`] a file, then either
//! drive row/DDL operations through its auto-commit convenience methods or
//! hold an explicit [`db::WriteTxn`]/[`db::ReadSession`] across several
//! operations.

pub mod btree;
pub mod catalog;
pub mod codec;
pub mod db;
pub mod error;
pub mod header;
pub mod pager;
pub mod record;
pub mod storage;
pub mod vfs;
pub mod wal;

pub use catalog::{ColumnDef, ColumnType, IndexDef, IndexKey, IndexKind, TableDef, ViewDef};
pub use db::{BulkLoadDurability, BulkLoadOptions, Db, DbInfo, DbOptions, ReadSession, WriteTxn};
pub use error::{DbError, ErrorCode, Result};
pub use record::Value;
pub use storage::AlterAction;
pub use vfs::{OsVfs, Vfs};
pub use wal::WalSyncMode;
