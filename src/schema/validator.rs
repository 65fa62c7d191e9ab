use super::types::{ClassShape, FieldType, ServiceSchema};
use crate::constants::{LINK_PEER_FIELD, LINK_RELATION_FIELD};
use crate::error::{PodError, PodResult};

/// Validates schemas before any table is derived from them.
pub struct SchemaValidator;

impl SchemaValidator {
    /// Identifiers become table and column names, so they are restricted to
    /// ASCII alphanumerics and underscores. A leading underscore is reserved
    /// for metadata columns.
    pub fn is_safe_identifier(name: &str) -> bool {
        !name.is_empty()
            && !name.starts_with('_')
            && !name.starts_with(|c: char| c.is_ascii_digit())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    pub fn validate(schema: &ServiceSchema) -> PodResult<()> {
        if schema.service_id.trim().is_empty() {
            return Err(PodError::validation("Schema service_id must not be empty"));
        }

        for (name, class) in &schema.classes {
            if !Self::is_safe_identifier(name) {
                return Err(PodError::validation(format!(
                    "Invalid class name '{}'",
                    name
                )));
            }
            for field in class.fields.keys() {
                if !Self::is_safe_identifier(field) {
                    return Err(PodError::validation(format!(
                        "Invalid field name '{}' on class '{}'",
                        field, name
                    )));
                }
            }
            for required in &class.required {
                match class.fields.get(required) {
                    None => {
                        return Err(PodError::validation(format!(
                            "Required field '{}' is not declared on class '{}'",
                            required, name
                        )))
                    }
                    // Required fields key cursors and refresh lookups, so they must be filterable.
                    Some(FieldType::Boolean | FieldType::Array | FieldType::Object) => {
                        return Err(PodError::validation(format!(
                            "Required field '{}' on class '{}' must be a scalar filterable type",
                            required, name
                        )))
                    }
                    Some(_) => {}
                }
            }
            if let Some(policy) = class.cache {
                if policy.ttl_secs == 0 {
                    return Err(PodError::validation(format!(
                        "Cache-only class '{}' must have a positive ttl",
                        name
                    )));
                }
            }
        }

        Self::validate_links_class(schema)?;

        for rule in &schema.listen {
            schema.class(&rule.source_class).map_err(|_| {
                PodError::validation(format!(
                    "Listen relation source class '{}' is not declared",
                    rule.source_class
                ))
            })?;
            let destination = schema.class(&rule.destination_class).map_err(|_| {
                PodError::validation(format!(
                    "Listen relation destination class '{}' is not declared",
                    rule.destination_class
                ))
            })?;
            if destination.shape != ClassShape::Array || !destination.is_cache_only() {
                return Err(PodError::validation(format!(
                    "Destination class '{}' must be a cache-only array",
                    rule.destination_class
                )));
            }
            if let Some(feed) = &rule.feed_class {
                let feed_class = schema.class(feed).map_err(|_| {
                    PodError::validation(format!("Feed class '{}' is not declared", feed))
                })?;
                if feed_class.shape != ClassShape::Array {
                    return Err(PodError::validation(format!(
                        "Feed class '{}' must be an array",
                        feed
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_links_class(schema: &ServiceSchema) -> PodResult<()> {
        // Schemas without listen rules do not replicate and need no links class.
        if schema.listen.is_empty() && !schema.classes.contains_key(&schema.links_class) {
            return Ok(());
        }
        let links = schema.class(&schema.links_class).map_err(|_| {
            PodError::validation(format!(
                "Links class '{}' is not declared",
                schema.links_class
            ))
        })?;
        if links.shape != ClassShape::Array || links.is_cache_only() {
            return Err(PodError::validation(format!(
                "Links class '{}' must be a durable array",
                schema.links_class
            )));
        }
        if links.field_type(LINK_PEER_FIELD) != Some(FieldType::Uuid) {
            return Err(PodError::validation(format!(
                "Links class must declare '{}' as uuid",
                LINK_PEER_FIELD
            )));
        }
        if links.field_type(LINK_RELATION_FIELD) != Some(FieldType::String) {
            return Err(PodError::validation(format!(
                "Links class must declare '{}' as string",
                LINK_RELATION_FIELD
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{DataClass, ListenRelation};

    fn links() -> DataClass {
        DataClass::array("network_links")
            .with_required("peer_id", FieldType::Uuid)
            .with_required("relation", FieldType::String)
    }

    #[test]
    fn test_identifiers() {
        assert!(SchemaValidator::is_safe_identifier("posts_v2"));
        assert!(!SchemaValidator::is_safe_identifier("_seq"));
        assert!(!SchemaValidator::is_safe_identifier("2posts"));
        assert!(!SchemaValidator::is_safe_identifier("posts; DROP"));
        assert!(!SchemaValidator::is_safe_identifier(""));
    }

    #[test]
    fn test_valid_schema() {
        let schema = ServiceSchema::new("social")
            .with_class(links())
            .with_class(DataClass::array("posts").with_required("id", FieldType::Uuid))
            .with_class(
                DataClass::array("inbox")
                    .with_required("id", FieldType::Uuid)
                    .with_cache_ttl(60),
            )
            .with_listen(ListenRelation::new("posts", "inbox"));
        assert!(SchemaValidator::validate(&schema).is_ok());
    }

    #[test]
    fn test_required_must_be_declared() {
        let mut class = DataClass::array("posts");
        class.required.push("id".to_string());
        let schema = ServiceSchema::new("social").with_class(class);
        assert!(matches!(
            SchemaValidator::validate(&schema),
            Err(PodError::Validation(_))
        ));
    }

    #[test]
    fn test_destination_must_be_cache_only() {
        let schema = ServiceSchema::new("social")
            .with_class(links())
            .with_class(DataClass::array("posts").with_required("id", FieldType::Uuid))
            .with_class(DataClass::array("inbox").with_required("id", FieldType::Uuid))
            .with_listen(ListenRelation::new("posts", "inbox"));
        assert!(SchemaValidator::validate(&schema).is_err());
    }

    #[test]
    fn test_listen_requires_links_class() {
        let schema = ServiceSchema::new("social")
            .with_class(DataClass::array("posts"))
            .with_class(DataClass::array("inbox").with_cache_ttl(60))
            .with_listen(ListenRelation::new("posts", "inbox"));
        assert!(SchemaValidator::validate(&schema).is_err());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let schema =
            ServiceSchema::new("social").with_class(DataClass::array("inbox").with_cache_ttl(0));
        assert!(SchemaValidator::validate(&schema).is_err());
    }
}
