//! Content-addressed row cursors.
//!
//! A cursor is a truncated SHA-256 over the row's required-field values and
//! the id of the node that supplied it. Two appends of the same logical row
//! from the same origin therefore share a cursor.

use crate::constants::CURSOR_LEN;
use crate::error::{PodError, PodResult};
use crate::filter::{FilterValue, NumberValue};
use crate::schema::DataClass;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Canonical text for one keyed value, so equal values hash equally
/// regardless of how the caller spelled them.
fn canonical(value: &FilterValue) -> String {
    match value {
        FilterValue::Text(s) => s.clone(),
        FilterValue::Number(NumberValue::Int(i)) => i.to_string(),
        FilterValue::Number(NumberValue::Float(f)) => f.to_string(),
        FilterValue::Identifier(id) => id.hyphenated().to_string(),
        FilterValue::Temporal(dt) => dt.timestamp_micros().to_string(),
    }
}

pub fn compute_cursor(class: &DataClass, data: &Map<String, Value>, origin_id: &str) -> PodResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(class.name.as_bytes());
    hasher.update([0u8]);

    if class.required.is_empty() {
        // Without key fields the whole row is the identity.
        hasher.update(serde_json::to_vec(data)?);
    } else {
        for field in &class.required {
            let field_type = class.require_field(field)?;
            let value = data.get(field).filter(|v| !v.is_null()).ok_or_else(|| {
                PodError::validation(format!(
                    "Missing required field '{}' for class '{}'",
                    field, class.name
                ))
            })?;
            let value = FilterValue::from_typed(value, field_type)?;
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            hasher.update(canonical(&value).as_bytes());
            hasher.update([0x1f]);
        }
    }

    hasher.update(origin_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    Ok(digest[..CURSOR_LEN].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;

    fn class() -> DataClass {
        DataClass::array("posts")
            .with_required("id", FieldType::Uuid)
            .with_field("body", FieldType::String)
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_cursor_ignores_non_key_fields() {
        let a = compute_cursor(
            &class(),
            &map(json!({"id": "6f1c2f2e-8a6b-4c55-9a52-1c1f0b7c4d11", "body": "a"})),
            "node-1",
        )
        .unwrap();
        let b = compute_cursor(
            &class(),
            &map(json!({"id": "6F1C2F2E-8A6B-4C55-9A52-1C1F0B7C4D11", "body": "b"})),
            "node-1",
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), CURSOR_LEN);
    }

    #[test]
    fn test_cursor_depends_on_origin() {
        let data = map(json!({"id": "6f1c2f2e-8a6b-4c55-9a52-1c1f0b7c4d11"}));
        assert_ne!(
            compute_cursor(&class(), &data, "node-1").unwrap(),
            compute_cursor(&class(), &data, "node-2").unwrap()
        );
    }

    #[test]
    fn test_missing_key_field_rejected() {
        assert!(matches!(
            compute_cursor(&class(), &map(json!({"body": "x"})), "node-1"),
            Err(PodError::Validation(_))
        ));
    }

    #[test]
    fn test_keyless_class_hashes_whole_row() {
        let class = DataClass::array("notes").with_field("body", FieldType::String);
        let a = compute_cursor(&class, &map(json!({"body": "a"})), "n").unwrap();
        let b = compute_cursor(&class, &map(json!({"body": "b"})), "n").unwrap();
        assert_ne!(a, b);
    }
}
