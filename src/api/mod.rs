//! Data API surface: the request/response RPC every node fronts and calls.
//!
//! Replication pulls from remote nodes through this trait and materializes
//! received rows through its own node's implementation, so local pub/sub
//! fires for replicated data exactly as it does for member writes.

pub mod credentials;
pub mod local;

pub use credentials::{Credential, CredentialProvider, StaticCredentials};
pub use local::LocalDataApi;

use crate::error::PodResult;
use crate::table::{Origin, OriginKind, StoredRow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiAction {
    Query,
    Append,
    /// Merge the supplied fields into every matching row
    Update,
    /// Replace every matching row with the supplied data
    Mutate,
    Delete,
}

/// Origin tag carried by replicated appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginInfo {
    pub id: String,
    pub kind: OriginKind,
    pub class_name: String,
}

impl From<OriginInfo> for Origin {
    fn from(info: OriginInfo) -> Self {
        Origin::remote(&info.id, info.kind, &info.class_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub service_id: String,
    pub member_id: Uuid,
    pub class_name: String,
    pub action: ApiAction,
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub field_mask: Option<Vec<String>>,
    #[serde(default)]
    pub after_cursor: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub origin: Option<OriginInfo>,
    #[serde(skip)]
    pub credential: Option<Credential>,
}

impl ApiRequest {
    fn new(service_id: &str, member_id: Uuid, class_name: &str, action: ApiAction) -> Self {
        Self {
            service_id: service_id.to_string(),
            member_id,
            class_name: class_name.to_string(),
            action,
            filters: Map::new(),
            data: None,
            field_mask: None,
            after_cursor: None,
            page_size: None,
            origin: None,
            credential: None,
        }
    }

    pub fn query(service_id: &str, member_id: Uuid, class_name: &str) -> Self {
        Self::new(service_id, member_id, class_name, ApiAction::Query)
    }

    pub fn append(service_id: &str, member_id: Uuid, class_name: &str, data: Map<String, Value>) -> Self {
        let mut request = Self::new(service_id, member_id, class_name, ApiAction::Append);
        request.data = Some(data);
        request
    }

    pub fn update(service_id: &str, member_id: Uuid, class_name: &str, data: Map<String, Value>) -> Self {
        let mut request = Self::new(service_id, member_id, class_name, ApiAction::Update);
        request.data = Some(data);
        request
    }

    pub fn mutate(service_id: &str, member_id: Uuid, class_name: &str, data: Map<String, Value>) -> Self {
        let mut request = Self::new(service_id, member_id, class_name, ApiAction::Mutate);
        request.data = Some(data);
        request
    }

    pub fn delete(service_id: &str, member_id: Uuid, class_name: &str) -> Self {
        Self::new(service_id, member_id, class_name, ApiAction::Delete)
    }

    pub fn with_filters(mut self, filters: Map<String, Value>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_field_mask(mut self, fields: Vec<String>) -> Self {
        self.field_mask = Some(fields);
        self
    }

    pub fn after(mut self, cursor: &str) -> Self {
        self.after_cursor = Some(cursor.to_string());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_origin(mut self, origin: OriginInfo) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub node: Map<String, Value>,
    pub cursor: String,
}

impl From<StoredRow> for Edge {
    fn from(row: StoredRow) -> Self {
        Self {
            node: row.data,
            cursor: row.meta.cursor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Matching rows for queries; affected rows for writes
    pub total_count: usize,
    pub edges: Vec<Edge>,
}

impl ApiResponse {
    pub fn affected(count: usize) -> Self {
        Self {
            total_count: count,
            edges: Vec::new(),
        }
    }

    pub fn last_cursor(&self) -> Option<&str> {
        self.edges.last().map(|e| e.cursor.as_str())
    }
}

/// The request/response surface of a node.
#[async_trait]
pub trait DataApi: Send + Sync {
    async fn call(&self, request: ApiRequest) -> PodResult<ApiResponse>;
}

/// Resolves an origin id to the Data API of the node serving it.
#[async_trait]
pub trait RemoteNodes: Send + Sync {
    async fn data_api(&self, origin_id: &str) -> PodResult<Arc<dyn DataApi>>;
}
