use super::namespace::{NamespaceStore, WriteOutcome};
use crate::db_operations::RelationalBackend;
use crate::error::PodResult;
use crate::pubsub::PubSub;
use crate::schema::ServiceSchema;
use crate::table::{Origin, QueryOptions, Selector, StorageKind, StoredRow};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Durable, member-owned data: every non-cache class of a member's schema.
pub struct DataStore {
    inner: NamespaceStore,
}

impl DataStore {
    pub fn new(backend: Arc<dyn RelationalBackend>, pubsub: Arc<PubSub>, enforce_unique_cursor: bool) -> Self {
        Self {
            inner: NamespaceStore::new(backend, StorageKind::Durable, enforce_unique_cursor, pubsub),
        }
    }

    pub async fn setup_member_namespace(&self, member_id: Uuid, schema: Arc<ServiceSchema>) -> PodResult<Vec<String>> {
        self.inner.setup(member_id, schema).await
    }

    pub async fn teardown_member_namespace(&self, member_id: &Uuid) -> PodResult<()> {
        self.inner.teardown(member_id).await
    }

    pub fn members(&self) -> Vec<Uuid> {
        self.inner.members()
    }

    pub fn classes(&self, member_id: &Uuid) -> Vec<String> {
        self.inner.classes(member_id)
    }

    pub async fn query(
        &self,
        member_id: &Uuid,
        class_name: &str,
        selector: &Selector,
        options: &QueryOptions,
    ) -> PodResult<Vec<StoredRow>> {
        self.inner.query(member_id, class_name, selector, options).await
    }

    pub async fn count(&self, member_id: &Uuid, class_name: &str, selector: &Selector) -> PodResult<usize> {
        self.inner.count(member_id, class_name, selector).await
    }

    pub async fn append(
        &self,
        member_id: &Uuid,
        class_name: &str,
        data: &Map<String, Value>,
        origin: &Origin,
    ) -> PodResult<WriteOutcome> {
        self.inner
            .append(member_id, class_name, data, origin, None)
            .await
    }

    pub async fn mutate(
        &self,
        member_id: &Uuid,
        class_name: &str,
        data: &Map<String, Value>,
        selector: &Selector,
        origin: &Origin,
    ) -> PodResult<WriteOutcome> {
        self.inner
            .mutate(member_id, class_name, data, selector, origin, None)
            .await
    }

    pub async fn delete(&self, member_id: &Uuid, class_name: &str, selector: &Selector) -> PodResult<usize> {
        self.inner.delete(member_id, class_name, selector).await
    }
}
