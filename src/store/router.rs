use super::cache_store::CacheStore;
use super::data_store::DataStore;
use super::namespace::WriteOutcome;
use crate::error::{PodError, PodResult};
use crate::log_store_info;
use crate::schema::{DataClass, ServiceSchema};
use crate::table::{Origin, QueryOptions, Selector, StoredRow};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Dispatches (member, class) to the durable or the cache store by the
/// class's cache policy.
pub struct StoreRouter {
    data: Arc<DataStore>,
    cache: Arc<CacheStore>,
    schemas: RwLock<HashMap<Uuid, Arc<ServiceSchema>>>,
}

impl StoreRouter {
    pub fn new(data: Arc<DataStore>, cache: Arc<CacheStore>) -> Self {
        Self {
            data,
            cache,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_store(&self) -> &Arc<DataStore> {
        &self.data
    }

    pub fn cache_store(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Set up both namespaces of a member
    pub async fn setup_member(&self, member_id: Uuid, schema: Arc<ServiceSchema>) -> PodResult<()> {
        self.data
            .setup_member_namespace(member_id, Arc::clone(&schema))
            .await?;
        self.cache
            .setup_member_namespace(member_id, Arc::clone(&schema))
            .await?;
        self.schemas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(member_id, schema);
        Ok(())
    }

    /// Drop both namespaces of a member
    pub async fn teardown_member(&self, member_id: &Uuid) -> PodResult<()> {
        self.schemas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(member_id);
        self.data.teardown_member_namespace(member_id).await?;
        self.cache.teardown_member_namespace(member_id).await?;
        log_store_info!("Member {} removed", member_id);
        Ok(())
    }

    pub fn members(&self) -> Vec<Uuid> {
        self.schemas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect()
    }

    pub fn schema(&self, member_id: &Uuid) -> PodResult<Arc<ServiceSchema>> {
        self.schemas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(member_id)
            .cloned()
            .ok_or_else(|| PodError::not_found(format!("Member {}", member_id)))
    }

    pub fn class(&self, member_id: &Uuid, class_name: &str) -> PodResult<DataClass> {
        let schema = self.schema(member_id)?;
        let class = schema.class(class_name)?;
        if class.defined {
            return Err(PodError::validation(format!(
                "Class '{}' is a type definition and holds no rows",
                class_name
            )));
        }
        Ok(class.clone())
    }

    pub async fn query(
        &self,
        member_id: &Uuid,
        class_name: &str,
        selector: &Selector,
        options: &QueryOptions,
    ) -> PodResult<Vec<StoredRow>> {
        if self.class(member_id, class_name)?.is_cache_only() {
            self.cache.query(member_id, class_name, selector, options).await
        } else {
            self.data.query(member_id, class_name, selector, options).await
        }
    }

    pub async fn count(&self, member_id: &Uuid, class_name: &str, selector: &Selector) -> PodResult<usize> {
        if self.class(member_id, class_name)?.is_cache_only() {
            self.cache.count(member_id, class_name, selector).await
        } else {
            self.data.count(member_id, class_name, selector).await
        }
    }

    pub async fn append(
        &self,
        member_id: &Uuid,
        class_name: &str,
        data: &Map<String, Value>,
        origin: &Origin,
    ) -> PodResult<WriteOutcome> {
        if self.class(member_id, class_name)?.is_cache_only() {
            self.cache.append(member_id, class_name, data, origin).await
        } else {
            self.data.append(member_id, class_name, data, origin).await
        }
    }

    pub async fn mutate(
        &self,
        member_id: &Uuid,
        class_name: &str,
        data: &Map<String, Value>,
        selector: &Selector,
        origin: &Origin,
    ) -> PodResult<WriteOutcome> {
        if self.class(member_id, class_name)?.is_cache_only() {
            self.cache
                .mutate(member_id, class_name, data, selector, origin)
                .await
        } else {
            self.data
                .mutate(member_id, class_name, data, selector, origin)
                .await
        }
    }

    pub async fn delete(&self, member_id: &Uuid, class_name: &str, selector: &Selector) -> PodResult<usize> {
        if self.class(member_id, class_name)?.is_cache_only() {
            self.cache.delete(member_id, class_name, selector).await
        } else {
            self.data.delete(member_id, class_name, selector).await
        }
    }
}
