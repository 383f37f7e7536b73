//! Importer for test results collected into a SQLite database.
//!
//! Import and `mark_exported` form a two-phase protocol: rows are selected
//! while `exported != 'yes'`, and only marked after the caller verified the
//! submission. The `older_than` bound keeps the update from touching rows
//! appended by concurrent writers after the import ran.

use std::path::Path;

use chrono::NaiveDateTime;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;

use crate::domain::model::{ImportedData, Record};
use crate::utils::error::{DumpError, Result};

pub const SQLITE_EXT: &[&str] = &["sqlite", "sqlite3", "db", "db3"];

fn open_db(db_file: &Path) -> Result<Connection> {
    // no SQLITE_OPEN_CREATE: a missing file is an error, not a fresh db
    Connection::open_with_flags(
        db_file,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| DumpError::SourceUnreadable {
        location: db_file.display().to_string(),
        details: err.to_string(),
    })
}

fn sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// `sqltime` is stored as text, so the bound must use the matching format
/// for the lexical comparison to behave like a time comparison.
fn format_bound(bound: NaiveDateTime) -> String {
    bound.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Testrun id saved from the original CSV file, if the side table exists.
fn get_testrun(conn: &Connection) -> Option<String> {
    conn.query_row("SELECT testrun FROM testrun", [], |row| row.get(0))
        .ok()
}

/// Reads not-yet-exported rows from the `testcases` table.
pub fn import_sqlite(db_file: &Path, older_than: Option<NaiveDateTime>) -> Result<ImportedData> {
    let location = db_file.display().to_string();
    let conn = open_db(db_file)?;

    let select = "SELECT * FROM testcases WHERE exported != 'yes'";
    let mut stmt = match older_than {
        Some(_) => conn.prepare(&format!("{select} AND sqltime < ?1"))?,
        None => conn.prepare(select)?,
    };
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = match older_than {
        Some(bound) => stmt.query([format_bound(bound)])?,
        None => stmt.query([])?,
    };

    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (index, column) in columns.iter().enumerate() {
            record.insert(column.clone(), sql_value(row.get_ref(index)?));
        }
        results.push(record);
    }
    drop(rows);
    drop(stmt);

    if results.is_empty() {
        return Err(DumpError::NoResults { location });
    }

    let testrun = get_testrun(&conn);
    Ok(ImportedData { results, testrun })
}

/// Marks rows with a verdict as exported, in a single transaction.
pub fn mark_exported_sqlite(db_file: &Path, older_than: Option<NaiveDateTime>) -> Result<()> {
    tracing::debug!("Marking rows in database as exported");
    let mut conn = open_db(db_file)?;
    let tx = conn.transaction()?;

    let update = "UPDATE testcases SET exported = 'yes' \
                  WHERE verdict IS NOT null AND verdict != ''";
    match older_than {
        Some(bound) => tx.execute(&format!("{update} AND sqltime < ?1"), [format_bound(bound)])?,
        None => tx.execute(update, [])?,
    };

    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::get_str;
    use chrono::NaiveDate;

    fn make_db(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE testcases (
                 id TEXT, title TEXT, verdict TEXT, comment TEXT,
                 exported TEXT DEFAULT 'no', sqltime TIMESTAMP
             );
             CREATE TABLE testrun (testrun TEXT);
             INSERT INTO testrun VALUES ('5_8_0_17');",
        )
        .unwrap();
        conn
    }

    fn insert_row(conn: &Connection, id: &str, verdict: &str, exported: &str, sqltime: &str) {
        conn.execute(
            "INSERT INTO testcases (id, title, verdict, comment, exported, sqltime)
             VALUES (?1, ?2, ?3, '', ?4, ?5)",
            rusqlite::params![id, format!("Test {id}"), verdict, exported, sqltime],
        )
        .unwrap();
    }

    fn bound(date: &str) -> NaiveDateTime {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_import_skips_exported_rows_and_reads_testrun() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("results.sqlite3");
        let conn = make_db(&db);
        insert_row(&conn, "1", "passed", "no", "2026-01-01 10:00:00");
        insert_row(&conn, "2", "failed", "yes", "2026-01-01 10:00:01");
        drop(conn);

        let data = import_sqlite(&db, None).unwrap();
        assert_eq!(data.testrun.as_deref(), Some("5_8_0_17"));
        assert_eq!(data.results.len(), 1);
        assert_eq!(get_str(&data.results[0], "id"), Some("1"));
    }

    #[test]
    fn test_older_than_bound_restricts_import() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("results.db");
        let conn = make_db(&db);
        insert_row(&conn, "old", "passed", "no", "2026-01-01 10:00:00");
        insert_row(&conn, "new", "passed", "no", "2026-01-03 10:00:00");
        drop(conn);

        let data = import_sqlite(&db, Some(bound("2026-01-02"))).unwrap();
        assert_eq!(data.results.len(), 1);
        assert_eq!(get_str(&data.results[0], "id"), Some("old"));
    }

    #[test]
    fn test_mark_exported_does_not_touch_concurrently_inserted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("results.db3");
        let conn = make_db(&db);
        insert_row(&conn, "old", "passed", "no", "2026-01-01 10:00:00");
        // simulates a row appended between import and mark_exported
        insert_row(&conn, "racer", "passed", "no", "2026-01-03 10:00:00");
        drop(conn);

        mark_exported_sqlite(&db, Some(bound("2026-01-02"))).unwrap();

        let data = import_sqlite(&db, None).unwrap();
        assert_eq!(data.results.len(), 1);
        assert_eq!(get_str(&data.results[0], "id"), Some("racer"));
    }

    #[test]
    fn test_mark_exported_skips_rows_without_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("results.sqlite");
        let conn = make_db(&db);
        insert_row(&conn, "done", "passed", "no", "2026-01-01 10:00:00");
        insert_row(&conn, "pending", "", "no", "2026-01-01 10:00:00");
        drop(conn);

        mark_exported_sqlite(&db, None).unwrap();

        let data = import_sqlite(&db, None).unwrap();
        assert_eq!(data.results.len(), 1);
        assert_eq!(get_str(&data.results[0], "id"), Some("pending"));
    }

    #[test]
    fn test_missing_file_is_source_unreadable() {
        let err = import_sqlite(Path::new("/nonexistent/results.db"), None).unwrap_err();
        assert!(matches!(err, DumpError::SourceUnreadable { .. }));
    }
}
