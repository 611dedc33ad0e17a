//! A reader's view is pinned to the WAL offset at `begin_read()` time: rows
//! committed by a writer afterwards must stay invisible to it, while a new
//! reader started after the commit sees them.

mod common;

use decentdb::{DbOptions, Value};

#[test]
fn reader_does_not_see_writes_committed_after_its_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let db = common::open_db_plain(&dir, "snap.db", DbOptions::default()).unwrap();
    db.create_table(common::widgets_table()).unwrap();
    db.insert_row("widgets", vec![Value::Int64(1), Value::Text("a".to_string()), Value::Float64(1.0)])
        .unwrap();

    let old_session = db.begin_read().unwrap();
    let old_snapshot = old_session.snapshot();

    db.insert_row("widgets", vec![Value::Int64(2), Value::Text("b".to_string()), Value::Float64(2.0)])
        .unwrap();

    let mut old_cursor = old_session.scan_table("widgets").unwrap();
    let mut old_rows = Vec::new();
    while let Some(row) = old_cursor.next().unwrap() {
        old_rows.push(row);
    }
    assert_eq!(old_rows.len(), 1, "pre-commit snapshot must not see the second row");
    assert_eq!(old_rows[0].0, 1);

    let new_session = db.begin_read().unwrap();
    assert!(new_session.snapshot() > old_snapshot);
    let mut new_cursor = new_session.scan_table("widgets").unwrap();
    let mut new_rows = Vec::new();
    while let Some(row) = new_cursor.next().unwrap() {
        new_rows.push(row);
    }
    assert_eq!(new_rows.len(), 2, "a fresh session must see both rows");
}
