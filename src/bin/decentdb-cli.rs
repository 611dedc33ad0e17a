//! A thin CLI over the raw storage API (§6.2), for poking at a database file
//! without a SQL layer: create a table, put/get/scan rows by rowid, force a
//! checkpoint, or print `dbInfo`. Modeled on `squeak`'s `main.rs` — a path
//! argument, an open call, and a handful of dbg!-style prints — generalized
//! from a read-only inspector into something that can also write.

use std::path::PathBuf;
use std::process::ExitCode;

use decentdb::catalog::{ColumnDef, ColumnType, TableDef};
use decentdb::{Db, DbOptions, OsVfs, Value};

fn usage() -> &'static str {
    "usage: decentdb-cli --db=<path> <command> [args...]\n\
     commands:\n\
     \x20 create-table-raw <name> <col:type>[,<col:type>...]   (type: int64|float64|bool|text|blob)\n\
     \x20 put <table> <rowid-or-null> <value>[,<value>...]\n\
     \x20 get <table> <rowid>\n\
     \x20 scan <table>\n\
     \x20 checkpoint\n\
     \x20 db-info"
}

fn parse_column_type(token: &str) -> Option<ColumnType> {
    match token {
        "int64" => Some(ColumnType::Int64),
        "float64" => Some(ColumnType::Float64),
        "bool" => Some(ColumnType::Bool),
        "text" => Some(ColumnType::Text),
        "blob" => Some(ColumnType::Blob),
        _ => None,
    }
}

fn parse_value(token: &str) -> Value {
    if token.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(i) = token.parse::<i64>() {
        return Value::Int64(i);
    }
    if let Ok(f) = token.parse::<f64>() {
        return Value::Float64(f);
    }
    if token.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if token.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::Text(token.to_string())
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Int64(i) => i.to_string(),
        Value::Float64(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<blob {} bytes>", b.len()),
        Value::Decimal { unscaled, scale } => format!("{unscaled}e-{scale}"),
        Value::Uuid(u) => format!("{u:?}"),
    }
}

fn run() -> decentdb::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let mut db_path: Option<PathBuf> = None;
    let mut rest: Vec<String> = Vec::new();
    for arg in args.by_ref() {
        if let Some(path) = arg.strip_prefix("--db=") {
            db_path = Some(PathBuf::from(path));
        } else {
            rest.push(arg);
        }
    }

    let Some(db_path) = db_path else {
        eprintln!("{}", usage());
        return Err(decentdb::DbError::sql("missing --db=<path>"));
    };
    let Some(command) = rest.first().cloned() else {
        eprintln!("{}", usage());
        return Err(decentdb::DbError::sql("missing command"));
    };

    let vfs = OsVfs;
    let db = Db::open(&vfs, &db_path, DbOptions::default())?;

    match command.as_str() {
        "create-table-raw" => {
            let name = rest.get(1).ok_or_else(|| decentdb::DbError::sql("missing table name"))?;
            let col_spec = rest.get(2).ok_or_else(|| decentdb::DbError::sql("missing column spec"))?;
            let mut columns = Vec::new();
            for field in col_spec.split(',') {
                let (col_name, ty) = field
                    .split_once(':')
                    .ok_or_else(|| decentdb::DbError::sql(format!("bad column spec: {field}")))?;
                let ty = parse_column_type(ty).ok_or_else(|| decentdb::DbError::sql(format!("unknown column type: {ty}")))?;
                columns.push(ColumnDef::new(col_name, ty));
            }
            db.create_table(TableDef::new(name.as_str(), columns))?;
            println!("created table {name}");
        }
        "put" => {
            let table = rest.get(1).ok_or_else(|| decentdb::DbError::sql("missing table name"))?;
            let rowid_token = rest.get(2).ok_or_else(|| decentdb::DbError::sql("missing rowid"))?;
            let value_spec = rest.get(3).ok_or_else(|| decentdb::DbError::sql("missing values"))?;
            let values: Vec<Value> = value_spec.split(',').map(parse_value).collect();

            if rowid_token.eq_ignore_ascii_case("null") {
                let rowid = db.insert_row(table, values)?;
                println!("inserted rowid {rowid}");
            } else {
                let rowid: i64 = rowid_token
                    .parse()
                    .map_err(|_| decentdb::DbError::sql(format!("bad rowid: {rowid_token}")))?;
                if db.read_row_at(table, rowid)?.is_some() {
                    db.update_row(table, rowid, values)?;
                    println!("updated rowid {rowid}");
                } else {
                    db.insert_row(table, values)?;
                    println!("inserted rowid {rowid}");
                }
            }
        }
        "get" => {
            let table = rest.get(1).ok_or_else(|| decentdb::DbError::sql("missing table name"))?;
            let rowid: i64 = rest
                .get(2)
                .ok_or_else(|| decentdb::DbError::sql("missing rowid"))?
                .parse()
                .map_err(|_| decentdb::DbError::sql("bad rowid"))?;
            match db.read_row_at(table, rowid)? {
                Some(values) => {
                    let rendered: Vec<String> = values.iter().map(format_value).collect();
                    println!("{}", rendered.join(","));
                }
                None => println!("(not found)"),
            }
        }
        "scan" => {
            let table = rest.get(1).ok_or_else(|| decentdb::DbError::sql("missing table name"))?;
            for (rowid, values) in db.scan_table_collect(table)? {
                let rendered: Vec<String> = values.iter().map(format_value).collect();
                println!("{rowid}: {}", rendered.join(","));
            }
        }
        "checkpoint" => {
            let stats = db.checkpoint()?;
            println!(
                "checkpoint: {} pages written, safe_lsn={}, truncated={}",
                stats.pages_written, stats.safe_lsn, stats.truncated
            );
        }
        "db-info" => {
            let info = db.db_info()?;
            println!("page_size: {}", info.page_size);
            println!("schema_cookie: {}", info.schema_cookie);
            println!("catalog_root: {}", info.catalog_root);
            println!("freelist_count: {}", info.freelist_count);
            println!("database_size_pages: {}", info.database_size_pages);
            println!("wal_end: {}", info.wal_end);
            println!("last_checkpoint_lsn: {}", info.last_checkpoint_lsn);
            println!("table_count: {}", info.table_count);
            println!("index_count: {}", info.index_count);
        }
        other => {
            eprintln!("{}", usage());
            return Err(decentdb::DbError::sql(format!("unknown command: {other}")));
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
