//! A commit that fails after its frames are written but before the WAL
//! header's end-offset is advanced must look, on the next open, exactly
//! like it never happened: the dangling frames sit past the last recorded
//! end-offset and recovery never indexes them.

mod common;

use decentdb::vfs::faulty::FailMode;
use decentdb::{DbOptions, Value};

#[test]
fn failed_commit_is_invisible_after_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (vfs, db) = common::open_db_faulty(&dir, "torn.db", DbOptions::default()).unwrap();
        db.create_table(common::widgets_table()).unwrap();
        db.insert_row(
            "widgets",
            vec![Value::Int64(1), Value::Text("first".to_string()), Value::Float64(1.5)],
        )
        .unwrap();

        vfs.set_failpoint("wal_fsync", FailMode::Error, 1);
        let result = db.insert_row(
            "widgets",
            vec![Value::Int64(2), Value::Text("second".to_string()), Value::Float64(2.5)],
        );
        assert!(result.is_err(), "commit should fail when wal_fsync is faulted");
    }

    // Reopen as if after a crash: only the first, fully committed row
    // should be visible.
    let (_vfs, db) = common::open_db_faulty(&dir, "torn.db", DbOptions::default()).unwrap();
    let rows = db.scan_table_collect("widgets").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, 1);
}
