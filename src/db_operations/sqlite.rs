use super::backend::{ColumnInfo, RelationalBackend, SqlRow, SqlValue};
use crate::error::{PodError, PodResult};
use crate::log_database_debug;
use async_trait::async_trait;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Embedded-file relational backend built on SQLite.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> PodResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref()).map_err(map_sqlite_error)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> PodResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> PodResult<Self> {
        register_regexp(&conn).map_err(map_sqlite_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> PodResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| PodError::Database("SQLite connection mutex poisoned".to_string()))?;
            f(&guard).map_err(map_sqlite_error)
        })
        .await
        .map_err(|e| PodError::Database(format!("SQLite worker failed: {}", e)))?
    }
}

/// `regexp(pattern, text)` backed by the `regex` crate, so SQL and in-memory
/// regex evaluation share one engine. NULL text yields NULL.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: String = ctx.get(0)?;
            let text: Option<String> = ctx.get(1)?;
            let Some(text) = text else {
                return Ok(None);
            };
            let re = Regex::new(&pattern)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(Some(re.is_match(&text)))
        },
    )
}

fn map_sqlite_error(err: rusqlite::Error) -> PodError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            PodError::Constraint(err.to_string())
        }
        _ => PodError::Database(err.to_string()),
    }
}

fn to_sqlite(values: Vec<SqlValue>) -> Vec<Value> {
    values
        .into_iter()
        .map(|v| match v {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::Integer(i),
            SqlValue::Real(f) => Value::Real(f),
            SqlValue::Text(s) => Value::Text(s),
            SqlValue::Blob(b) => Value::Blob(b),
        })
        .collect()
}

fn from_sqlite(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(i),
        Value::Real(f) => SqlValue::Real(f),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(b) => SqlValue::Blob(b),
    }
}

#[async_trait]
impl RelationalBackend for SqliteBackend {
    async fn execute(&self, statement: &str, params: Vec<SqlValue>) -> PodResult<usize> {
        log_database_debug!("execute: {}", statement);
        let statement = statement.to_string();
        let params = to_sqlite(params);
        self.with_conn(move |conn| conn.execute(&statement, params_from_iter(params.iter())))
            .await
    }

    async fn query(&self, statement: &str, params: Vec<SqlValue>) -> PodResult<Vec<SqlRow>> {
        log_database_debug!("query: {}", statement);
        let statement = statement.to_string();
        let params = to_sqlite(params);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&statement)?;
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();
            let width = columns.len();
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    let value: Value = row.get(i)?;
                    values.push(from_sqlite(value));
                }
                out.push(SqlRow::new(columns.clone(), values));
            }
            Ok(out)
        })
        .await
    }

    async fn list_columns(&self, table: &str) -> PodResult<Vec<ColumnInfo>> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
            let rows = stmt.query_map([table], |row| {
                let name: String = row.get(0)?;
                let decl_type: String = row.get(1)?;
                Ok(ColumnInfo {
                    name,
                    decl_type: decl_type.to_uppercase(),
                })
            })?;
            rows.collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_and_query() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (a INTEGER, b TEXT)", vec![])
            .await
            .unwrap();
        let inserted = db
            .execute(
                "INSERT INTO t (a, b) VALUES (?1, ?2)",
                vec![SqlValue::Integer(7), SqlValue::from("seven")],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = db
            .query("SELECT a, b FROM t WHERE a = ?1", vec![SqlValue::Integer(7)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("b").and_then(SqlValue::as_str), Some("seven"));
    }

    #[tokio::test]
    async fn test_list_columns() {
        let db = SqliteBackend::open_in_memory().unwrap();
        assert!(db.list_columns("missing").await.unwrap().is_empty());
        db.execute("CREATE TABLE t (a integer, b TEXT)", vec![])
            .await
            .unwrap();
        let columns = db.list_columns("t").await.unwrap();
        assert_eq!(
            columns,
            vec![
                ColumnInfo {
                    name: "a".to_string(),
                    decl_type: "INTEGER".to_string()
                },
                ColumnInfo {
                    name: "b".to_string(),
                    decl_type: "TEXT".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_regexp_function() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let rows = db
            .query(
                "SELECT regexp(?1, ?2) AS m, regexp(?1, NULL) AS n",
                vec![SqlValue::from("^ab+c$"), SqlValue::from("abbbc")],
            )
            .await
            .unwrap();
        assert_eq!(rows[0].get("m"), Some(&SqlValue::Integer(1)));
        assert_eq!(rows[0].get("n"), Some(&SqlValue::Null));
    }

    #[tokio::test]
    async fn test_constraint_violation_mapped() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (a TEXT UNIQUE)", vec![])
            .await
            .unwrap();
        db.execute("INSERT INTO t (a) VALUES ('x')", vec![])
            .await
            .unwrap();
        let err = db
            .execute("INSERT INTO t (a) VALUES ('x')", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, PodError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pod.db");
        {
            let db = SqliteBackend::open(&path).unwrap();
            db.execute("CREATE TABLE t (a INTEGER)", vec![]).await.unwrap();
            db.execute("INSERT INTO t (a) VALUES (1)", vec![]).await.unwrap();
        }
        let db = SqliteBackend::open(&path).unwrap();
        let rows = db.query("SELECT a FROM t", vec![]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
