use super::types::ServiceSchema;
use super::validator::SchemaValidator;
use crate::error::PodResult;
use std::fs;
use std::path::Path;

/// Parses and validates a service schema from its JSON form.
///
/// Class names are taken from the keys of the `classes` map.
pub fn load_schema_from_str(content: &str) -> PodResult<ServiceSchema> {
    let schema: ServiceSchema = serde_json::from_str(content)?;
    let schema = schema.finalize();
    SchemaValidator::validate(&schema)?;
    Ok(schema)
}

/// Loads a service schema from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid JSON, or
/// describes a schema that fails validation.
pub fn load_schema_from_file<P: AsRef<Path>>(path: P) -> PodResult<ServiceSchema> {
    let content = fs::read_to_string(path.as_ref())?;
    load_schema_from_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{ClassShape, FieldType};
    use std::io::Write;

    const SCHEMA: &str = r#"{
        "service_id": "social",
        "version": 3,
        "classes": {
            "network_links": {
                "shape": "array",
                "fields": { "peer_id": "uuid", "relation": "string", "annotations": "array" },
                "required": ["peer_id", "relation"]
            },
            "posts": {
                "shape": "array",
                "fields": { "id": "uuid", "body": "string", "created": "datetime" },
                "required": ["id"]
            },
            "inbox": {
                "shape": "array",
                "fields": { "id": "uuid", "body": "string", "created": "datetime" },
                "required": ["id"],
                "cache": { "ttl_secs": 86400 }
            }
        },
        "listen": [
            { "source_class": "posts", "relations": ["friend"], "destination_class": "inbox" }
        ]
    }"#;

    #[test]
    fn test_load_from_str() {
        let schema = load_schema_from_str(SCHEMA).unwrap();
        assert_eq!(schema.version, 3);
        assert_eq!(schema.links_class, "network_links");
        let inbox = schema.class("inbox").unwrap();
        assert_eq!(inbox.name, "inbox");
        assert_eq!(inbox.shape, ClassShape::Array);
        assert_eq!(inbox.field_type("created"), Some(FieldType::Datetime));
        assert_eq!(inbox.cache.map(|c| c.ttl_secs), Some(86400));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCHEMA.as_bytes()).unwrap();
        let schema = load_schema_from_file(file.path()).unwrap();
        assert_eq!(schema.service_id, "social");
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(load_schema_from_str("{ not json").is_err());
    }
}
