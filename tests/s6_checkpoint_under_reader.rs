//! A checkpoint running while a reader holds an old snapshot must not
//! disturb that reader: the reader keeps seeing its own pinned view, and
//! once it drops, a fresh reader sees the checkpointed state correctly.

mod common;

use decentdb::{DbOptions, Value};

#[test]
fn checkpoint_does_not_disturb_a_concurrent_reader_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let db = common::open_db_plain(&dir, "ckpt.db", DbOptions::default()).unwrap();
    db.create_table(common::widgets_table()).unwrap();
    db.insert_row("widgets", vec![Value::Int64(1), Value::Text("a".to_string()), Value::Float64(1.0)])
        .unwrap();

    let reader = db.begin_read().unwrap();

    db.insert_row("widgets", vec![Value::Int64(2), Value::Text("b".to_string()), Value::Float64(2.0)])
        .unwrap();
    db.checkpoint().unwrap();

    // The pinned reader was opened before the second insert, so it must
    // still only see the first row even after checkpointing moves those
    // frames into the main file.
    let mut cursor = reader.scan_table("widgets").unwrap();
    let mut rows = Vec::new();
    while let Some(row) = cursor.next().unwrap() {
        rows.push(row);
    }
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, 1);

    drop(reader);

    let fresh = db.begin_read().unwrap();
    let mut fresh_cursor = fresh.scan_table("widgets").unwrap();
    let mut fresh_rows = Vec::new();
    while let Some(row) = fresh_cursor.next().unwrap() {
        fresh_rows.push(row);
    }
    assert_eq!(fresh_rows.len(), 2);
}
