//! Per-member table sets and the write path shared by both store façades.

use crate::db_operations::RelationalBackend;
use crate::error::{PodError, PodResult};
use crate::pubsub::{PubSub, StoreAction, StoreEvent};
use crate::schema::ServiceSchema;
use crate::table::{
    compute_cursor, open_table, Origin, QueryOptions, RowMetadata, Selector, StorageKind,
    StoredRow, Table,
};
use crate::{log_store_debug, log_store_info};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Result of an append or mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub cursor: String,
    pub rows_affected: usize,
}

struct MemberTables {
    schema: Arc<ServiceSchema>,
    fingerprint: String,
    tables: HashMap<String, Arc<dyn Table>>,
}

/// Tables of one storage kind for every member set up on this node.
pub struct NamespaceStore {
    backend: Arc<dyn RelationalBackend>,
    kind: StorageKind,
    enforce_unique_cursor: bool,
    pubsub: Arc<PubSub>,
    members: RwLock<HashMap<Uuid, MemberTables>>,
}

impl NamespaceStore {
    pub fn new(
        backend: Arc<dyn RelationalBackend>,
        kind: StorageKind,
        enforce_unique_cursor: bool,
        pubsub: Arc<PubSub>,
    ) -> Self {
        Self {
            backend,
            kind,
            enforce_unique_cursor,
            pubsub,
            members: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, MemberTables>> {
        self.members
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, MemberTables>> {
        self.members
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// Create (idempotently) one table per class of this store's kind.
    ///
    /// Re-running with a changed schema reconciles every table again so new
    /// fields become columns.
    pub async fn setup(&self, member_id: Uuid, schema: Arc<ServiceSchema>) -> PodResult<Vec<String>> {
        let fingerprint = schema.fingerprint()?;
        if let Some(existing) = self.read().get(&member_id) {
            if existing.fingerprint == fingerprint {
                return Ok(existing.tables.keys().cloned().collect());
            }
        }

        let classes: Vec<_> = match self.kind {
            StorageKind::Durable => schema.durable_classes().cloned().collect(),
            StorageKind::Cached => schema.cache_classes().cloned().collect(),
        };
        let mut tables = HashMap::with_capacity(classes.len());
        for class in &classes {
            let table = open_table(
                Arc::clone(&self.backend),
                &member_id,
                class,
                self.kind,
                self.enforce_unique_cursor,
            )
            .await?;
            tables.insert(class.name.clone(), table);
        }
        log_store_info!(
            "Set up {} {:?} tables for member {} (schema {} v{}, {})",
            tables.len(),
            self.kind,
            member_id,
            schema.service_id,
            schema.version,
            &fingerprint[..12]
        );

        let names = tables.keys().cloned().collect();
        self.write().insert(
            member_id,
            MemberTables {
                schema,
                fingerprint,
                tables,
            },
        );
        Ok(names)
    }

    /// Forget a member and drop its tables
    pub async fn teardown(&self, member_id: &Uuid) -> PodResult<()> {
        let removed = self.write().remove(member_id);
        if let Some(member) = removed {
            for table in member.tables.values() {
                table.drop_table().await?;
            }
            log_store_info!("Tore down {:?} tables for member {}", self.kind, member_id);
        }
        Ok(())
    }

    pub fn members(&self) -> Vec<Uuid> {
        self.read().keys().copied().collect()
    }

    pub fn classes(&self, member_id: &Uuid) -> Vec<String> {
        self.read()
            .get(member_id)
            .map(|m| m.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn schema(&self, member_id: &Uuid) -> PodResult<Arc<ServiceSchema>> {
        self.read()
            .get(member_id)
            .map(|m| Arc::clone(&m.schema))
            .ok_or_else(|| PodError::not_found(format!("Member {}", member_id)))
    }

    pub fn table(&self, member_id: &Uuid, class_name: &str) -> PodResult<Arc<dyn Table>> {
        let members = self.read();
        let member = members
            .get(member_id)
            .ok_or_else(|| PodError::not_found(format!("Member {}", member_id)))?;
        member.tables.get(class_name).cloned().ok_or_else(|| {
            PodError::not_found(format!(
                "Data class '{}' for member {} in {:?} store",
                class_name, member_id, self.kind
            ))
        })
    }

    fn is_replicable(&self, member_id: &Uuid, class_name: &str) -> bool {
        self.schema(member_id)
            .map(|schema| schema.is_replicable(class_name))
            .unwrap_or(false)
    }

    fn publish(&self, action: StoreAction, member_id: Uuid, class_name: &str, data: Map<String, Value>, meta: &RowMetadata) {
        self.pubsub
            .publish(StoreEvent::new(action, member_id, class_name, data, meta));
    }

    pub async fn query(
        &self,
        member_id: &Uuid,
        class_name: &str,
        selector: &Selector,
        options: &QueryOptions,
    ) -> PodResult<Vec<StoredRow>> {
        self.table(member_id, class_name)?
            .query(selector, options)
            .await
    }

    pub async fn count(&self, member_id: &Uuid, class_name: &str, selector: &Selector) -> PodResult<usize> {
        self.table(member_id, class_name)?.count(selector).await
    }

    pub async fn append(
        &self,
        member_id: &Uuid,
        class_name: &str,
        data: &Map<String, Value>,
        origin: &Origin,
        expires_at: Option<f64>,
    ) -> PodResult<WriteOutcome> {
        let table = self.table(member_id, class_name)?;
        let cursor = compute_cursor(table.class(), data, &origin.id)?;
        let rows_affected = table.append(data, &cursor, origin, expires_at).await?;
        log_store_debug!("Appended {} to {}", cursor, table.table_name());

        if self.is_replicable(member_id, class_name) {
            let meta = self.write_meta(&cursor, origin, expires_at);
            self.publish(StoreAction::Append, *member_id, class_name, data.clone(), &meta);
        }
        Ok(WriteOutcome {
            cursor,
            rows_affected,
        })
    }

    pub async fn mutate(
        &self,
        member_id: &Uuid,
        class_name: &str,
        data: &Map<String, Value>,
        selector: &Selector,
        origin: &Origin,
        expires_at: Option<f64>,
    ) -> PodResult<WriteOutcome> {
        let table = self.table(member_id, class_name)?;
        let cursor = compute_cursor(table.class(), data, &origin.id)?;
        let rows_affected = table
            .mutate(data, &cursor, selector, origin, expires_at)
            .await?;

        if rows_affected > 0 && self.is_replicable(member_id, class_name) {
            let meta = self.write_meta(&cursor, origin, expires_at);
            self.publish(StoreAction::Append, *member_id, class_name, data.clone(), &meta);
        }
        Ok(WriteOutcome {
            cursor,
            rows_affected,
        })
    }

    pub async fn delete(&self, member_id: &Uuid, class_name: &str, selector: &Selector) -> PodResult<usize> {
        let table = self.table(member_id, class_name)?;
        if !self.is_replicable(member_id, class_name) {
            return table.delete(selector).await;
        }
        // Subscribers are told what was removed, so read the rows first.
        let doomed = table.query(selector, &QueryOptions::default()).await?;
        let removed = table.delete(selector).await?;
        for row in doomed {
            self.publish(StoreAction::Delete, *member_id, class_name, row.data, &row.meta);
        }
        Ok(removed)
    }

    pub async fn expire(&self, member_id: &Uuid, class_name: &str, before: f64) -> PodResult<usize> {
        let table = self.table(member_id, class_name)?;
        if !self.is_replicable(member_id, class_name) {
            return table.expire(before).await;
        }
        let doomed = table
            .query(
                &Selector::all().with_meta(crate::table::MetaFilter::ExpiresAtOrBefore(before)),
                &QueryOptions::default(),
            )
            .await?;
        let removed = table.expire(before).await?;
        for row in doomed {
            self.publish(StoreAction::Delete, *member_id, class_name, row.data, &row.meta);
        }
        Ok(removed)
    }

    fn write_meta(&self, cursor: &str, origin: &Origin, expires_at: Option<f64>) -> RowMetadata {
        RowMetadata {
            seq: 0,
            cursor: cursor.to_string(),
            origin_id: Some(origin.id.clone()),
            origin_id_type: Some(origin.kind),
            origin_class_name: match self.kind {
                StorageKind::Cached => origin.class_name.clone(),
                StorageKind::Durable => None,
            },
            expires_at,
        }
    }
}
