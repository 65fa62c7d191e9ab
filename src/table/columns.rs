//! Column reconciliation and the value codec between JSON rows and columns.

use super::{OriginKind, RowMetadata, StorageKind};
use crate::constants::{
    COL_CURSOR, COL_EXPIRES, COL_ORIGIN_CLASS, COL_ORIGIN_ID, COL_ORIGIN_ID_TYPE, COL_SEQ,
};
use crate::db_operations::{quote_ident, RelationalBackend, SqlRow, SqlValue};
use crate::error::{PodError, PodResult};
use crate::filter::{datetime_to_epoch, epoch_to_datetime, format_datetime, parse_datetime};
use crate::log_store_info;
use crate::schema::{DataClass, FieldType};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

/// Metadata columns besides `_seq` and `_cursor`, which are created with the table.
pub fn metadata_columns(kind: StorageKind) -> Vec<(&'static str, &'static str)> {
    let mut columns = vec![(COL_ORIGIN_ID, "TEXT"), (COL_ORIGIN_ID_TYPE, "TEXT")];
    if kind == StorageKind::Cached {
        columns.push((COL_EXPIRES, "REAL"));
        columns.push((COL_ORIGIN_CLASS, "TEXT"));
    }
    columns
}

/// Create the relation if absent and add any declared column it lacks.
///
/// Existing columns are never dropped or retyped; a column whose declared
/// type differs from the schema fails with [`PodError::SchemaMismatch`].
pub async fn reconcile(
    backend: &dyn RelationalBackend,
    table: &str,
    class: &DataClass,
    kind: StorageKind,
    enforce_unique_cursor: bool,
) -> PodResult<()> {
    let quoted = quote_ident(table);
    let mut expected: Vec<(String, &'static str)> = metadata_columns(kind)
        .into_iter()
        .map(|(name, ty)| (name.to_string(), ty))
        .collect();
    expected.extend(
        class
            .fields
            .iter()
            .map(|(name, ty)| (name.clone(), ty.sql_type())),
    );

    let mut definitions = vec![
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(COL_SEQ)),
        format!("{} TEXT NOT NULL", quote_ident(COL_CURSOR)),
    ];
    definitions.extend(
        expected
            .iter()
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty)),
    );
    backend
        .execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quoted,
                definitions.join(", ")
            ),
            vec![],
        )
        .await?;

    let existing = backend.list_columns(table).await?;
    for (name, ty) in &expected {
        match existing.iter().find(|c| &c.name == name) {
            Some(column) if column.decl_type != *ty => {
                return Err(PodError::SchemaMismatch {
                    table: table.to_string(),
                    column: name.clone(),
                    expected: ty.to_string(),
                    found: column.decl_type.clone(),
                });
            }
            Some(_) => {}
            None => {
                log_store_info!("Adding column {}.{} ({})", table, name, ty);
                backend
                    .execute(
                        &format!(
                            "ALTER TABLE {} ADD COLUMN {} {}",
                            quoted,
                            quote_ident(name),
                            ty
                        ),
                        vec![],
                    )
                    .await?;
            }
        }
    }

    let cursor_index = if enforce_unique_cursor {
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("{}_cursor_uidx", table)),
            quoted,
            quote_ident(COL_CURSOR)
        )
    } else {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("{}_cursor_idx", table)),
            quoted,
            quote_ident(COL_CURSOR)
        )
    };
    backend.execute(&cursor_index, vec![]).await?;

    if kind == StorageKind::Cached {
        for column in [COL_EXPIRES, COL_ORIGIN_CLASS] {
            backend
                .execute(
                    &format!(
                        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                        quote_ident(&format!("{}{}_idx", table, column)),
                        quoted,
                        quote_ident(column)
                    ),
                    vec![],
                )
                .await?;
        }
    }
    Ok(())
}

fn type_error(class: &DataClass, field: &str, field_type: FieldType, value: &Value) -> PodError {
    PodError::validation(format!(
        "Field '{}' on class '{}' expects {:?}, got {}",
        field, class.name, field_type, value
    ))
}

/// Encode one JSON value for its declared column type
pub fn encode_value(
    class: &DataClass,
    field: &str,
    field_type: FieldType,
    value: &Value,
) -> PodResult<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    let err = || type_error(class, field, field_type, value);
    let encoded = match field_type {
        FieldType::String => SqlValue::Text(value.as_str().ok_or_else(err)?.to_string()),
        FieldType::Integer => SqlValue::Integer(value.as_i64().ok_or_else(err)?),
        FieldType::Number => SqlValue::Real(value.as_f64().ok_or_else(err)?),
        FieldType::Boolean => SqlValue::Integer(i64::from(value.as_bool().ok_or_else(err)?)),
        FieldType::Uuid => {
            let id = value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(err)?;
            SqlValue::Text(id.hyphenated().to_string())
        }
        FieldType::Datetime => SqlValue::Real(datetime_to_epoch(&parse_datetime(value).ok_or_else(err)?)),
        FieldType::Array => {
            if !value.is_array() {
                return Err(err());
            }
            SqlValue::Text(serde_json::to_string(value)?)
        }
        FieldType::Object => {
            if !value.is_object() {
                return Err(err());
            }
            SqlValue::Text(serde_json::to_string(value)?)
        }
    };
    Ok(encoded)
}

/// Encode a full row: unknown fields are rejected, required fields must be present.
pub fn encode_row(class: &DataClass, data: &Map<String, Value>) -> PodResult<Vec<(String, SqlValue)>> {
    for field in data.keys() {
        class.require_field(field)?;
    }
    for required in &class.required {
        if data.get(required).map_or(true, Value::is_null) {
            return Err(PodError::validation(format!(
                "Missing required field '{}' for class '{}'",
                required, class.name
            )));
        }
    }
    data.iter()
        .map(|(field, value)| {
            let field_type = class.require_field(field)?;
            Ok((field.clone(), encode_value(class, field, field_type, value)?))
        })
        .collect()
}

/// Decode one column back into JSON; `None` for NULL
pub fn decode_value(field_type: FieldType, value: &SqlValue) -> PodResult<Option<Value>> {
    if value.is_null() {
        return Ok(None);
    }
    let decoded = match field_type {
        FieldType::String | FieldType::Uuid => value.as_str().map(|s| Value::String(s.to_string())),
        FieldType::Integer => value.as_i64().map(Value::from),
        FieldType::Number => value.as_f64().and_then(Number::from_f64).map(Value::Number),
        FieldType::Boolean => value.as_i64().map(|i| Value::Bool(i != 0)),
        FieldType::Datetime => value
            .as_f64()
            .and_then(epoch_to_datetime)
            .map(|dt| Value::String(format_datetime(&dt))),
        FieldType::Array | FieldType::Object => match value.as_str() {
            Some(text) => Some(serde_json::from_str(text)?),
            None => None,
        },
    };
    decoded.map(Some).ok_or_else(|| {
        PodError::Database(format!(
            "Stored value {:?} cannot be read as {:?}",
            value, field_type
        ))
    })
}

/// Split a result row into field data and metadata
pub fn decode_row(class: &DataClass, row: &SqlRow) -> PodResult<(Map<String, Value>, RowMetadata)> {
    let mut data = Map::new();
    for (column, value) in row.iter() {
        if let Some(field_type) = class.field_type(column) {
            if let Some(decoded) = decode_value(field_type, value)? {
                data.insert(column.to_string(), decoded);
            }
        }
    }

    let text = |column: &str| {
        row.get(column)
            .and_then(SqlValue::as_str)
            .map(str::to_string)
    };
    let meta = RowMetadata {
        seq: row.get(COL_SEQ).and_then(SqlValue::as_i64).unwrap_or_default(),
        cursor: text(COL_CURSOR).unwrap_or_default(),
        origin_id: text(COL_ORIGIN_ID),
        origin_id_type: text(COL_ORIGIN_ID_TYPE).and_then(|s| s.parse::<OriginKind>().ok()),
        origin_class_name: text(COL_ORIGIN_CLASS),
        expires_at: row.get(COL_EXPIRES).and_then(SqlValue::as_f64),
    };
    Ok((data, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_operations::SqliteBackend;
    use serde_json::json;

    fn class() -> DataClass {
        DataClass::array("posts")
            .with_required("id", FieldType::Uuid)
            .with_field("age", FieldType::Integer)
            .with_field("created", FieldType::Datetime)
            .with_field("tags", FieldType::Array)
            .with_field("flag", FieldType::Boolean)
    }

    #[test]
    fn test_codec_normalizes_values() {
        let data = json!({
            "id": "6F1C2F2E-8A6B-4C55-9A52-1C1F0B7C4D11",
            "age": 4,
            "created": "2024-05-01T12:00:00+02:00",
            "tags": ["a", "b"],
            "flag": true
        });
        let encoded = encode_row(&class(), data.as_object().unwrap()).unwrap();
        let columns: Vec<String> = encoded.iter().map(|(c, _)| c.clone()).collect();
        let values: Vec<SqlValue> = encoded.into_iter().map(|(_, v)| v).collect();
        let row = SqlRow::new(columns, values);
        let (decoded, _) = decode_row(&class(), &row).unwrap();
        assert_eq!(decoded["id"], json!("6f1c2f2e-8a6b-4c55-9a52-1c1f0b7c4d11"));
        assert_eq!(decoded["created"], json!("2024-05-01T10:00:00Z"));
        assert_eq!(decoded["tags"], json!(["a", "b"]));
        assert_eq!(decoded["flag"], json!(true));
    }

    #[test]
    fn test_codec_rejects_bad_rows() {
        let unknown = json!({"id": "6f1c2f2e-8a6b-4c55-9a52-1c1f0b7c4d11", "color": "red"});
        assert!(encode_row(&class(), unknown.as_object().unwrap()).is_err());
        let missing = json!({"age": 3});
        assert!(encode_row(&class(), missing.as_object().unwrap()).is_err());
        let wrong = json!({"id": "6f1c2f2e-8a6b-4c55-9a52-1c1f0b7c4d11", "age": "x"});
        assert!(encode_row(&class(), wrong.as_object().unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_reconcile_adds_missing_columns() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let v1 = DataClass::array("posts").with_field("body", FieldType::String);
        reconcile(&db, "t", &v1, StorageKind::Durable, false).await.unwrap();

        let v2 = v1.clone().with_field("likes", FieldType::Integer);
        reconcile(&db, "t", &v2, StorageKind::Cached, false).await.unwrap();
        let names: Vec<String> = db
            .list_columns("t")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        for expected in ["_seq", "_cursor", "body", "likes", "_expires", "_origin_class"] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_reconcile_reports_type_mismatch() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let v1 = DataClass::array("posts").with_field("likes", FieldType::String);
        reconcile(&db, "t", &v1, StorageKind::Durable, false).await.unwrap();
        let v2 = DataClass::array("posts").with_field("likes", FieldType::Integer);
        let err = reconcile(&db, "t", &v2, StorageKind::Durable, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PodError::SchemaMismatch { .. }));
    }
}
