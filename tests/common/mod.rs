//! Shared fixtures for the integration tests: a social-network schema,
//! in-memory stores, and stub origins standing in for remote pods.
#![allow(dead_code)]

use async_trait::async_trait;
use datapod::api::{ApiAction, ApiRequest, ApiResponse, DataApi, Edge, RemoteNodes};
use datapod::config::{CacheConfig, PubSubConfig};
use datapod::db_operations::SqliteBackend;
use datapod::error::{PodError, PodResult};
use datapod::pubsub::PubSub;
use datapod::schema::{DataClass, FieldType, ListenRelation, ServiceSchema};
use datapod::store::{CacheStore, DataStore, StoreRouter};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SERVICE: &str = "social";

/// Schema with a links class, a replicated `posts` class staged into the
/// cache-only `inbox`, and a `feed` fed from friends marked `close`.
pub fn social_schema() -> ServiceSchema {
    ServiceSchema::new(SERVICE)
        .with_class(
            DataClass::array("network_links")
                .with_required("peer_id", FieldType::Uuid)
                .with_required("relation", FieldType::String)
                .with_field("annotations", FieldType::Array),
        )
        .with_class(
            DataClass::array("posts")
                .with_required("id", FieldType::Integer)
                .with_field("body", FieldType::String)
                .with_field("likes", FieldType::Integer)
                .with_field("posted_at", FieldType::Datetime),
        )
        .with_class(
            DataClass::array("inbox")
                .with_required("id", FieldType::Integer)
                .with_field("body", FieldType::String)
                .with_field("likes", FieldType::Integer)
                .with_cache_ttl(3600),
        )
        .with_class(
            DataClass::array("feed")
                .with_required("id", FieldType::Integer)
                .with_field("body", FieldType::String),
        )
        .with_class(DataClass::object("profile").with_field("name", FieldType::String))
        .with_listen(
            ListenRelation::new("posts", "inbox")
                .with_relation("friend")
                .with_feed("feed")
                .with_annotation("close"),
        )
}

pub fn map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub struct Stores {
    pub router: Arc<StoreRouter>,
    pub cache: Arc<CacheStore>,
    pub pubsub: Arc<PubSub>,
}

/// Both stores over one in-memory database
pub fn in_memory_stores() -> Stores {
    let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
    let pubsub = Arc::new(PubSub::new(&PubSubConfig::default()));
    let data = Arc::new(DataStore::new(backend.clone(), pubsub.clone(), false));
    let cache = Arc::new(CacheStore::new(
        backend,
        pubsub.clone(),
        false,
        CacheConfig::default(),
    ));
    Stores {
        router: Arc::new(StoreRouter::new(data, cache.clone())),
        cache,
        pubsub,
    }
}

/// A remote pod answering queries from a fixed row set.
///
/// Filters are matched as literal equality, which is all a refresh sends.
#[derive(Default)]
pub struct StubOrigin {
    rows: Mutex<Vec<Map<String, Value>>>,
    offline: AtomicBool,
    count_only: AtomicBool,
    calls: AtomicUsize,
}

impl StubOrigin {
    pub fn with_rows(rows: Vec<Map<String, Value>>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn set_rows(&self, rows: Vec<Map<String, Value>>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Report totals but no edges, like an origin that lost the row mid-query
    pub fn set_count_only(&self, count_only: bool) {
        self.count_only.store(count_only, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataApi for StubOrigin {
    async fn call(&self, request: ApiRequest) -> PodResult<ApiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(PodError::Transport("stub origin offline".to_string()));
        }
        if request.action != ApiAction::Query {
            return Err(PodError::validation("stub origin only answers queries"));
        }
        assert!(request.credential.is_some(), "origin calls carry a credential");
        let matching: Vec<Map<String, Value>> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| {
                request
                    .filters
                    .iter()
                    .all(|(field, value)| row.get(field) == Some(value))
            })
            .cloned()
            .collect();
        let page = if self.count_only.load(Ordering::SeqCst) {
            0
        } else {
            request.page_size.unwrap_or(matching.len())
        };
        Ok(ApiResponse {
            total_count: matching.len(),
            edges: matching
                .into_iter()
                .take(page)
                .enumerate()
                .map(|(i, node)| Edge {
                    node,
                    cursor: format!("stub{}", i),
                })
                .collect(),
        })
    }
}

/// Resolves origin ids to stub origins
#[derive(Default)]
pub struct StubRemotes {
    origins: Mutex<HashMap<String, Arc<StubOrigin>>>,
}

impl StubRemotes {
    pub fn with_origin(self, origin_id: &str, origin: Arc<StubOrigin>) -> Self {
        self.origins
            .lock()
            .unwrap()
            .insert(origin_id.to_string(), origin);
        self
    }
}

#[async_trait]
impl RemoteNodes for StubRemotes {
    async fn data_api(&self, origin_id: &str) -> PodResult<Arc<dyn DataApi>> {
        self.origins
            .lock()
            .unwrap()
            .get(origin_id)
            .cloned()
            .map(|o| o as Arc<dyn DataApi>)
            .ok_or_else(|| PodError::origin_unavailable(origin_id, "unknown origin"))
    }
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// In-memory stores with one member joined to [`social_schema`]
pub async fn joined_member() -> (Stores, uuid::Uuid) {
    let stores = in_memory_stores();
    let member = uuid::Uuid::new_v4();
    stores
        .router
        .setup_member(member, Arc::new(social_schema()))
        .await
        .unwrap();
    (stores, member)
}
