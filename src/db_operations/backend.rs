use crate::error::PodResult;
use async_trait::async_trait;

/// A value crossing the relational storage boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One result row, with column names in select order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Column description returned by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type, upper-cased
    pub decl_type: String,
}

/// Narrow parameterized-statement interface the table engine is written against.
///
/// Every call is a single atomic statement; the engine never holds a
/// transaction open across calls.
#[async_trait]
pub trait RelationalBackend: Send + Sync {
    /// Run a statement that does not return rows; yields the affected row count
    async fn execute(&self, statement: &str, params: Vec<SqlValue>) -> PodResult<usize>;

    /// Run a statement that returns rows
    async fn query(&self, statement: &str, params: Vec<SqlValue>) -> PodResult<Vec<SqlRow>>;

    /// Columns of an existing relation; empty when the relation does not exist
    async fn list_columns(&self, table: &str) -> PodResult<Vec<ColumnInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_by_name() {
        let row = SqlRow::new(
            vec!["a".to_string(), "b".to_string()],
            vec![SqlValue::Integer(1), SqlValue::Text("x".to_string())],
        );
        assert_eq!(row.get("b").and_then(SqlValue::as_str), Some("x"));
        assert_eq!(row.get("a").and_then(SqlValue::as_i64), Some(1));
        assert!(row.get("c").is_none());
        assert_eq!(row.iter().count(), 2);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(2.5)), SqlValue::Real(2.5));
    }
}
