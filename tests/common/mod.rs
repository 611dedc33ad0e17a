//! Shared fixtures for the scenario tests: a small `widgets` table def and
//! a couple of `Db::open` wrappers over a real `tempfile` directory.

use std::path::PathBuf;

use decentdb::catalog::{ColumnDef, ColumnType, TableDef};
use decentdb::vfs::faulty::FaultyVfs;
use decentdb::{Db, DbOptions, OsVfs, Result};

#[allow(dead_code)]
pub fn widgets_table() -> TableDef {
    TableDef::new(
        "widgets",
        vec![
            ColumnDef::new("id", ColumnType::Int64).primary_key(),
            ColumnDef::new("name", ColumnType::Text).not_null(),
            ColumnDef::new("weight", ColumnType::Float64),
        ],
    )
}

#[allow(dead_code)]
pub fn open_plain(dir: &tempfile::TempDir, file_name: &str) -> (OsVfs, PathBuf) {
    (OsVfs, dir.path().join(file_name))
}

#[allow(dead_code)]
pub fn open_db_plain(dir: &tempfile::TempDir, file_name: &str, options: DbOptions) -> Result<Db<OsVfs>> {
    Db::open(&OsVfs, &dir.path().join(file_name), options)
}

#[allow(dead_code)]
pub fn open_db_faulty(dir: &tempfile::TempDir, file_name: &str, options: DbOptions) -> Result<(FaultyVfs<OsVfs>, Db<FaultyVfs<OsVfs>>)> {
    let vfs = FaultyVfs::new(OsVfs);
    let path = dir.path().join(file_name);
    let db = Db::open(&vfs, &path, options)?;
    Ok((vfs, db))
}
