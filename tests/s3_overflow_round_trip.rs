//! A TEXT value too large to fit inline spills into an overflow chain; it
//! must read back byte-for-byte identical to what was written.

mod common;

use decentdb::catalog::{ColumnDef, ColumnType, TableDef};
use decentdb::{DbOptions, Value};

#[test]
fn oversized_text_value_round_trips_through_overflow_pages() {
    let dir = tempfile::tempdir().unwrap();
    let db = common::open_db_plain(&dir, "overflow.db", DbOptions::default()).unwrap();

    let table = TableDef::new(
        "documents",
        vec![
            ColumnDef::new("id", ColumnType::Int64).primary_key(),
            ColumnDef::new("body", ColumnType::Text).not_null(),
        ],
    );
    db.create_table(table).unwrap();

    // Comfortably past pageSize - OVERFLOW_RESERVE (4096 - 128) for the
    // default page size, so this value must take the overflow path.
    let body: String = "lorem ipsum dolor sit amet ".repeat(400);
    assert!(body.len() > 8000);

    db.insert_row("documents", vec![Value::Int64(1), Value::Text(body.clone())]).unwrap();

    let row = db.read_row_at("documents", 1).unwrap().expect("row must exist");
    match &row[1] {
        Value::Text(read_back) => assert_eq!(read_back, &body),
        other => panic!("expected Text, got {other:?}"),
    }

    // Round-trips through a checkpoint too: overflow chains must survive
    // the copy from WAL frames into the main file.
    db.checkpoint().unwrap();
    let row_after_checkpoint = db.read_row_at("documents", 1).unwrap().expect("row must still exist");
    match &row_after_checkpoint[1] {
        Value::Text(read_back) => assert_eq!(read_back, &body),
        other => panic!("expected Text, got {other:?}"),
    }
}
