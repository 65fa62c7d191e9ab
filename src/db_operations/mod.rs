// Relational storage collaborator: the narrow statement interface and its SQLite implementation
pub mod backend;
pub mod sqlite;

pub use backend::{ColumnInfo, RelationalBackend, SqlRow, SqlValue};
pub use sqlite::SqliteBackend;

/// Quote an identifier for use in a statement.
///
/// Identifiers reaching this point have already passed schema validation;
/// embedded quotes are doubled regardless.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
