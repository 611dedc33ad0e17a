//! Trigram search narrows correctly on a multi-trigram query: a search
//! string only matches rows containing every one of its trigrams, not just
//! its first. Run at a small scale here rather than the full corpus size.

mod common;

use decentdb::catalog::{ColumnDef, ColumnType, IndexDef, IndexKey, IndexKind, TableDef};
use decentdb::{DbOptions, Value};

#[test]
fn multi_trigram_query_intersects_postings() {
    let dir = tempfile::tempdir().unwrap();
    let db = common::open_db_plain(&dir, "trigram.db", DbOptions::default()).unwrap();

    let table = TableDef::new(
        "notes",
        vec![
            ColumnDef::new("id", ColumnType::Int64).primary_key(),
            ColumnDef::new("body", ColumnType::Text).not_null(),
        ],
    );
    db.create_table(table).unwrap();

    let bodies = [
        "the quick brown fox",
        "the slow brown dog",
        "a quick red fox",
        "nothing related at all",
    ];
    for (i, body) in bodies.iter().enumerate() {
        db.insert_row("notes", vec![Value::Int64(i as i64 + 1), Value::Text(body.to_string())])
            .unwrap();
    }

    db.create_index(IndexDef {
        name: "notes_body_trigram".to_string(),
        table: "notes".to_string(),
        kind: IndexKind::Trigram,
        unique: false,
        key: IndexKey::Columns(vec!["body".to_string()]),
        partial_predicate: None,
        root: 0,
    })
    .unwrap();

    let (matches, truncated) = db.trigram_search("notes_body_trigram", "quick brown fox", 10).unwrap();
    assert!(!truncated);
    assert_eq!(matches, vec![1], "only row 1 contains all three words' trigrams");

    let (matches, _) = db.trigram_search("notes_body_trigram", "brown", 10).unwrap();
    let mut sorted = matches.clone();
    sorted.sort();
    assert_eq!(sorted, vec![1, 2], "rows 1 and 2 both contain \"brown\"");
}
