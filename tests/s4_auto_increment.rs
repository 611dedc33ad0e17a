//! A single-column `INTEGER PRIMARY KEY` reuses the rowid: leaving it NULL
//! assigns the next auto-increment value, an explicit value is honored and
//! bumps the counter past it, and gaps left by deletes are never reused.

mod common;

use decentdb::{DbOptions, Value};

#[test]
fn null_primary_key_assigns_increasing_rowids() {
    let dir = tempfile::tempdir().unwrap();
    let db = common::open_db_plain(&dir, "auto.db", DbOptions::default()).unwrap();
    db.create_table(common::widgets_table()).unwrap();

    let first = db
        .insert_row("widgets", vec![Value::Null, Value::Text("a".to_string()), Value::Float64(1.0)])
        .unwrap();
    let second = db
        .insert_row("widgets", vec![Value::Null, Value::Text("b".to_string()), Value::Float64(2.0)])
        .unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 2);
}

#[test]
fn explicit_primary_key_bumps_next_row_id_past_it() {
    let dir = tempfile::tempdir().unwrap();
    let db = common::open_db_plain(&dir, "auto_explicit.db", DbOptions::default()).unwrap();
    db.create_table(common::widgets_table()).unwrap();

    let explicit = db
        .insert_row("widgets", vec![Value::Int64(100), Value::Text("a".to_string()), Value::Float64(1.0)])
        .unwrap();
    assert_eq!(explicit, 100);

    let next = db
        .insert_row("widgets", vec![Value::Null, Value::Text("b".to_string()), Value::Float64(2.0)])
        .unwrap();
    assert_eq!(next, 101);
}

#[test]
fn deleted_rowids_are_not_reused() {
    let dir = tempfile::tempdir().unwrap();
    let db = common::open_db_plain(&dir, "auto_delete.db", DbOptions::default()).unwrap();
    db.create_table(common::widgets_table()).unwrap();

    let first = db
        .insert_row("widgets", vec![Value::Null, Value::Text("a".to_string()), Value::Float64(1.0)])
        .unwrap();
    db.delete_row("widgets", first).unwrap();

    let second = db
        .insert_row("widgets", vec![Value::Null, Value::Text("b".to_string()), Value::Float64(2.0)])
        .unwrap();
    assert_eq!(second, first + 1, "a fresh rowid must never reuse a deleted one");
}
