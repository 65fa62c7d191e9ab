//! Table abstraction: the CRUD contract every materialized data class honours,
//! and the two relational shapes that implement it.

pub mod array_table;
pub mod columns;
pub mod core;
pub mod cursor;
pub mod object_table;

pub use array_table::ArrayTable;
pub use cursor::compute_cursor;
pub use object_table::ObjectTable;

use self::core::TableCore;
use crate::db_operations::RelationalBackend;
use crate::error::{PodError, PodResult};
use crate::filter::FilterSet;
use crate::schema::{ClassShape, DataClass};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Whether a table carries cache metadata (expiry and origin class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Durable,
    Cached,
}

/// What kind of node supplied a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    /// A member writing through its own node
    Member,
    /// A remote pod relaying a member's data
    Pod,
}

impl OriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::Member => "member",
            OriginKind::Pod => "pod",
        }
    }
}

impl FromStr for OriginKind {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(OriginKind::Member),
            "pod" => Ok(OriginKind::Pod),
            other => Err(PodError::validation(format!("Unknown origin kind '{}'", other))),
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who supplied a row, attached on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub id: String,
    pub kind: OriginKind,
    /// Class name at the origin; only stored by cache tables
    pub class_name: Option<String>,
}

impl Origin {
    pub fn member(id: Uuid) -> Self {
        Self {
            id: id.to_string(),
            kind: OriginKind::Member,
            class_name: None,
        }
    }

    pub fn remote(id: &str, kind: OriginKind, class_name: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            class_name: Some(class_name.to_string()),
        }
    }
}

/// Metadata read back alongside row data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowMetadata {
    /// Insertion sequence of the visible version
    pub seq: i64,
    pub cursor: String,
    pub origin_id: Option<String>,
    pub origin_id_type: Option<OriginKind>,
    pub origin_class_name: Option<String>,
    /// Epoch seconds; cache tables only
    pub expires_at: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub data: Map<String, Value>,
    pub meta: RowMetadata,
}

/// Row selection on metadata columns.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaFilter {
    Cursor(String),
    ExpiresAtOrBefore(f64),
    OriginId(String),
    OriginClass(String),
}

/// Field predicates plus metadata predicates, all ANDed.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub filters: FilterSet,
    pub meta: Vec<MetaFilter>,
}

impl Selector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_filters(filters: FilterSet) -> Self {
        Self {
            filters,
            meta: Vec::new(),
        }
    }

    pub fn cursor(cursor: &str) -> Self {
        Self::all().with_meta(MetaFilter::Cursor(cursor.to_string()))
    }

    pub fn with_meta(mut self, filter: MetaFilter) -> Self {
        self.meta.push(filter);
        self
    }
}

impl From<FilterSet> for Selector {
    fn from(filters: FilterSet) -> Self {
        Self::from_filters(filters)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub after_cursor: Option<String>,
    /// Fields to return; all declared fields when `None`
    pub field_mask: Option<Vec<String>>,
}

impl QueryOptions {
    pub fn page(limit: usize, after_cursor: Option<String>) -> Self {
        Self {
            limit: Some(limit),
            after_cursor,
            field_mask: None,
        }
    }
}

/// CRUD contract of a materialized data class for one member.
///
/// Every operation is a single atomic statement (or an ordered pair of them)
/// against the relational backend; nothing holds a transaction open.
#[async_trait]
pub trait Table: Send + Sync {
    fn class(&self) -> &DataClass;

    fn table_name(&self) -> &str;

    fn storage_kind(&self) -> StorageKind;

    /// Visible rows matching the selector, in insertion order
    async fn query(&self, selector: &Selector, options: &QueryOptions) -> PodResult<Vec<StoredRow>>;

    /// Number of visible rows matching the selector
    async fn count(&self, selector: &Selector) -> PodResult<usize>;

    /// Insert a row; a row already carrying `cursor` is superseded
    async fn append(
        &self,
        data: &Map<String, Value>,
        cursor: &str,
        origin: &Origin,
        expires_at: Option<f64>,
    ) -> PodResult<usize>;

    /// Replace the matching rows' data and metadata
    async fn mutate(
        &self,
        data: &Map<String, Value>,
        cursor: &str,
        selector: &Selector,
        origin: &Origin,
        expires_at: Option<f64>,
    ) -> PodResult<usize>;

    /// Remove every version of the matching rows
    async fn delete(&self, selector: &Selector) -> PodResult<usize>;

    /// Remove rows expiring at or before `before` (epoch seconds)
    async fn expire(&self, before: f64) -> PodResult<usize>;

    /// Remove the backing relation
    async fn drop_table(&self) -> PodResult<()>;
}

/// Deterministic relation name for a member's class
pub fn table_name(member_id: &Uuid, class_name: &str) -> String {
    format!("m{}_{}", member_id.simple(), class_name)
}

/// Open (creating or reconciling as needed) the table for a member's class
pub async fn open_table(
    backend: Arc<dyn RelationalBackend>,
    member_id: &Uuid,
    class: &DataClass,
    kind: StorageKind,
    enforce_unique_cursor: bool,
) -> PodResult<Arc<dyn Table>> {
    let core = TableCore::new(
        backend,
        table_name(member_id, &class.name),
        class.clone(),
        kind,
        enforce_unique_cursor,
    );
    core.setup().await?;
    let table: Arc<dyn Table> = match class.shape {
        ClassShape::Object => Arc::new(ObjectTable::new(core)),
        ClassShape::Array => Arc::new(ArrayTable::new(core)),
    };
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_is_deterministic() {
        let id = Uuid::parse_str("6f1c2f2e-8a6b-4c55-9a52-1c1f0b7c4d11").unwrap();
        assert_eq!(
            table_name(&id, "posts"),
            "m6f1c2f2e8a6b4c559a521c1f0b7c4d11_posts"
        );
    }

    #[test]
    fn test_origin_kind_round_trip() {
        assert_eq!("pod".parse::<OriginKind>().unwrap(), OriginKind::Pod);
        assert_eq!(OriginKind::Member.to_string(), "member");
        assert!("robot".parse::<OriginKind>().is_err());
    }
}
