use crate::constants::{ANY_RELATION, DEFAULT_LINKS_CLASS};
use crate::error::{PodError, PodResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Uuid,
    Datetime,
    Array,
    Object,
}

impl FieldType {
    /// Column type used for the field in relational storage
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::String | FieldType::Uuid => "TEXT",
            FieldType::Integer | FieldType::Boolean => "INTEGER",
            FieldType::Number | FieldType::Datetime => "REAL",
            FieldType::Array | FieldType::Object => "TEXT",
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, FieldType::Array | FieldType::Object)
    }
}

/// Shape of a top-level collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassShape {
    /// At most one row per member
    Object,
    /// Many rows, ordered by insertion
    Array,
}

/// Cache policy of a cache-only class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub ttl_secs: u64,
}

/// A schema-declared collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataClass {
    /// Filled from the key of the `classes` map when the schema is loaded
    #[serde(default, skip_serializing)]
    pub name: String,
    pub shape: ClassShape,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub cache: Option<CachePolicy>,
    /// Type definitions referenced by other classes; never materialized
    #[serde(default)]
    pub defined: bool,
}

impl DataClass {
    pub fn new(name: &str, shape: ClassShape) -> Self {
        Self {
            name: name.to_string(),
            shape,
            fields: BTreeMap::new(),
            required: Vec::new(),
            cache: None,
            defined: false,
        }
    }

    pub fn array(name: &str) -> Self {
        Self::new(name, ClassShape::Array)
    }

    pub fn object(name: &str) -> Self {
        Self::new(name, ClassShape::Object)
    }

    pub fn with_field(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.insert(name.to_string(), field_type);
        self
    }

    /// Declare a field and mark it required
    pub fn with_required(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.insert(name.to_string(), field_type);
        if !self.required.iter().any(|r| r == name) {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn with_cache_ttl(mut self, ttl_secs: u64) -> Self {
        self.cache = Some(CachePolicy { ttl_secs });
        self
    }

    pub fn is_cache_only(&self) -> bool {
        self.cache.is_some()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.cache.map(|c| Duration::from_secs(c.ttl_secs))
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.fields.get(field).copied()
    }

    /// Look up a field, failing with a validation error when undeclared
    pub fn require_field(&self, field: &str) -> PodResult<FieldType> {
        self.field_type(field).ok_or_else(|| {
            PodError::validation(format!(
                "Field '{}' is not declared on class '{}'",
                field, self.name
            ))
        })
    }
}

/// Rule describing which remote class to subscribe to when a trust link appears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenRelation {
    pub source_class: String,
    /// Accepted relations; empty or `"*"` accepts any relation
    #[serde(default)]
    pub relations: Vec<String>,
    pub destination_class: String,
    #[serde(default)]
    pub feed_class: Option<String>,
    /// Annotations a link must carry for its items to be promoted to the feed
    #[serde(default)]
    pub annotations: Vec<String>,
}

impl ListenRelation {
    pub fn new(source_class: &str, destination_class: &str) -> Self {
        Self {
            source_class: source_class.to_string(),
            relations: Vec::new(),
            destination_class: destination_class.to_string(),
            feed_class: None,
            annotations: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: &str) -> Self {
        self.relations.push(relation.to_string());
        self
    }

    pub fn with_feed(mut self, feed_class: &str) -> Self {
        self.feed_class = Some(feed_class.to_string());
        self
    }

    pub fn with_annotation(mut self, annotation: &str) -> Self {
        self.annotations.push(annotation.to_string());
        self
    }

    pub fn accepts_any(&self) -> bool {
        self.relations.is_empty() || self.relations.iter().any(|r| r == ANY_RELATION)
    }

    pub fn accepts_relation(&self, relation: &str) -> bool {
        self.accepts_any() || self.relations.iter().any(|r| r == relation)
    }
}

fn default_links_class() -> String {
    DEFAULT_LINKS_CLASS.to_string()
}

/// Schema of one service version, as supplied by the schema collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSchema {
    pub service_id: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default = "default_links_class")]
    pub links_class: String,
    pub classes: BTreeMap<String, DataClass>,
    #[serde(default)]
    pub listen: Vec<ListenRelation>,
}

impl ServiceSchema {
    pub fn new(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            version: 1,
            links_class: default_links_class(),
            classes: BTreeMap::new(),
            listen: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: DataClass) -> Self {
        self.classes.insert(class.name.clone(), class);
        self
    }

    pub fn with_listen(mut self, relation: ListenRelation) -> Self {
        self.listen.push(relation);
        self
    }

    /// Copy map keys into each class's `name`
    pub fn finalize(mut self) -> Self {
        for (name, class) in self.classes.iter_mut() {
            class.name = name.clone();
        }
        self
    }

    pub fn class(&self, name: &str) -> PodResult<&DataClass> {
        self.classes
            .get(name)
            .ok_or_else(|| PodError::not_found(format!("Data class '{}'", name)))
    }

    /// Classes materialized by the durable data store
    pub fn durable_classes(&self) -> impl Iterator<Item = &DataClass> {
        self.classes
            .values()
            .filter(|c| !c.defined && !c.is_cache_only())
    }

    /// Classes materialized by the cache store
    pub fn cache_classes(&self) -> impl Iterator<Item = &DataClass> {
        self.classes
            .values()
            .filter(|c| !c.defined && c.is_cache_only())
    }

    /// Whether mutations of the class are published on the local bus
    pub fn is_replicable(&self, class_name: &str) -> bool {
        class_name == self.links_class
            || self.listen.iter().any(|rule| {
                rule.source_class == class_name
                    || rule.destination_class == class_name
                    || rule.feed_class.as_deref() == Some(class_name)
            })
    }

    /// Whether peers may stream the class. Trust links are published locally
    /// but never leave the node.
    pub fn is_streamable(&self, class_name: &str) -> bool {
        class_name != self.links_class && self.is_replicable(class_name)
    }

    /// SHA-256 over the canonical JSON form of the schema
    pub fn fingerprint(&self) -> PodResult<String> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }
}
