//! Cache-only data sourced from other nodes.
//!
//! Rows carry an expiry and their origin. A refresh sweep re-confirms rows
//! nearing expiry with their origin; an expire sweep deletes rows past the
//! threshold whether or not a refresh succeeded.

use super::namespace::{NamespaceStore, WriteOutcome};
use crate::api::{ApiRequest, CredentialProvider, RemoteNodes};
use crate::config::CacheConfig;
use crate::db_operations::RelationalBackend;
use crate::error::{PodError, PodResult};
use crate::filter::now_epoch;
use crate::pubsub::PubSub;
use crate::schema::{DataClass, FieldType, ServiceSchema};
use crate::table::{MetaFilter, Origin, OriginKind, QueryOptions, Selector, StorageKind, StoredRow};
use crate::{log_cache_debug, log_cache_error, log_cache_info, log_cache_warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Per-row outcomes of one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    /// Origin confirmed exactly one row; data replaced and expiry extended
    pub confirmed: usize,
    /// Origin confirmed zero or several rows; local row removed
    pub deleted: usize,
    /// Origin unreachable or the row could not be processed; retried next sweep
    pub deferred: usize,
}

impl RefreshReport {
    pub fn merge(&mut self, other: RefreshReport) {
        self.confirmed += other.confirmed;
        self.deleted += other.deleted;
        self.deferred += other.deferred;
    }

    pub fn total(&self) -> usize {
        self.confirmed + self.deleted + self.deferred
    }
}

type OriginKey = (String, Option<OriginKind>, String);

enum RowOutcome {
    Confirmed,
    Deleted,
}

pub struct CacheStore {
    inner: NamespaceStore,
    config: CacheConfig,
}

impl CacheStore {
    pub fn new(
        backend: Arc<dyn RelationalBackend>,
        pubsub: Arc<PubSub>,
        enforce_unique_cursor: bool,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: NamespaceStore::new(backend, StorageKind::Cached, enforce_unique_cursor, pubsub),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
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

    fn fresh_expiry(&self, member_id: &Uuid, class_name: &str) -> PodResult<f64> {
        let table = self.inner.table(member_id, class_name)?;
        let ttl = table.class().ttl().ok_or_else(|| {
            PodError::validation(format!("Class '{}' has no cache policy", class_name))
        })?;
        Ok(now_epoch() + ttl.as_secs_f64())
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

    /// Append with `expires_at = now + ttl`
    pub async fn append(
        &self,
        member_id: &Uuid,
        class_name: &str,
        data: &Map<String, Value>,
        origin: &Origin,
    ) -> PodResult<WriteOutcome> {
        let expires_at = self.fresh_expiry(member_id, class_name)?;
        self.inner
            .append(member_id, class_name, data, origin, Some(expires_at))
            .await
    }

    /// Append with an explicit expiry
    pub async fn append_expiring(
        &self,
        member_id: &Uuid,
        class_name: &str,
        data: &Map<String, Value>,
        origin: &Origin,
        expires_at: f64,
    ) -> PodResult<WriteOutcome> {
        self.inner
            .append(member_id, class_name, data, origin, Some(expires_at))
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
        let expires_at = self.fresh_expiry(member_id, class_name)?;
        self.inner
            .mutate(member_id, class_name, data, selector, origin, Some(expires_at))
            .await
    }

    pub async fn delete(&self, member_id: &Uuid, class_name: &str, selector: &Selector) -> PodResult<usize> {
        self.inner.delete(member_id, class_name, selector).await
    }

    /// Delete rows whose expiry is at or before `before` (default: now plus the expire horizon)
    pub async fn expire_table(&self, member_id: &Uuid, class_name: &str, before: Option<f64>) -> PodResult<usize> {
        let before = before.unwrap_or_else(|| now_epoch() + self.config.expire_horizon_secs as f64);
        let removed = self.inner.expire(member_id, class_name, before).await?;
        if removed > 0 {
            log_cache_info!(
                "Expired {} rows of '{}' for member {}",
                removed,
                class_name,
                member_id
            );
        }
        Ok(removed)
    }

    /// Re-confirm rows expiring at or before `before` (default: now plus the refresh horizon).
    ///
    /// Rows are grouped by origin so each origin is resolved once. Failures
    /// are isolated per row: an unreachable origin defers its rows to the
    /// next sweep and never aborts the pass.
    pub async fn refresh_table(
        &self,
        member_id: &Uuid,
        class_name: &str,
        before: Option<f64>,
        remotes: &dyn RemoteNodes,
        credentials: &dyn CredentialProvider,
    ) -> PodResult<RefreshReport> {
        let before = before.unwrap_or_else(|| now_epoch() + self.config.refresh_horizon_secs as f64);
        let table = self.inner.table(member_id, class_name)?;
        let class = table.class().clone();
        let service_id = self.inner.schema(member_id)?.service_id.clone();
        let rows = table
            .query(
                &Selector::all().with_meta(MetaFilter::ExpiresAtOrBefore(before)),
                &QueryOptions::default(),
            )
            .await?;

        let mut report = RefreshReport::default();
        let mut groups: BTreeMap<OriginKey, Vec<StoredRow>> = BTreeMap::new();
        for row in rows {
            let key = match (&row.meta.origin_id, &row.meta.origin_class_name) {
                (Some(id), Some(origin_class)) => {
                    Some((id.clone(), row.meta.origin_id_type, origin_class.clone()))
                }
                _ => None,
            };
            match key {
                Some(key) => groups.entry(key).or_default().push(row),
                None => {
                    log_cache_debug!("Row {} has no origin to refresh from", row.meta.cursor);
                    report.deferred += 1;
                }
            }
        }

        for ((origin_id, origin_kind, origin_class), rows) in groups {
            let api = match remotes.data_api(&origin_id).await {
                Ok(api) => api,
                Err(err) => {
                    log_cache_warn!(
                        "Origin {} unavailable, deferring {} rows: {}",
                        origin_id,
                        rows.len(),
                        err
                    );
                    report.deferred += rows.len();
                    continue;
                }
            };
            let origin_member = match Uuid::parse_str(&origin_id) {
                Ok(id) => id,
                Err(_) => {
                    log_cache_warn!("Origin id {} is not a member id; deferring", origin_id);
                    report.deferred += rows.len();
                    continue;
                }
            };
            let origin = Origin::remote(
                &origin_id,
                origin_kind.unwrap_or(OriginKind::Pod),
                &origin_class,
            );

            for row in rows {
                let request = async {
                    let credential = credentials.credential_for(&origin_id).await?;
                    let query = ApiRequest::query(&service_id, origin_member, &origin_class)
                        .with_filters(confirmation_filters(&class, &row.data))
                        .with_page_size(2)
                        .with_credential(credential);
                    api.call(query)
                        .await
                        .map_err(|err| match err {
                            PodError::Transport(reason) => PodError::origin_unavailable(&origin_id, reason),
                            other => other,
                        })
                };
                let outcome = match request.await {
                    Ok(response) => {
                        let current = response.edges.into_iter().next().map(|edge| edge.node);
                        self.apply_confirmation(
                            member_id,
                            &class,
                            &row,
                            &origin,
                            response.total_count,
                            current,
                        )
                        .await
                    }
                    Err(err) => Err(err),
                };
                match outcome {
                    Ok(RowOutcome::Confirmed) => report.confirmed += 1,
                    Ok(RowOutcome::Deleted) => report.deleted += 1,
                    Err(err) => {
                        log_cache_warn!("Refresh of row {} deferred: {}", row.meta.cursor, err);
                        report.deferred += 1;
                    }
                }
            }
        }

        if report.total() > 0 {
            log_cache_info!(
                "Refreshed '{}' for member {}: {} confirmed, {} deleted, {} deferred",
                class_name,
                member_id,
                report.confirmed,
                report.deleted,
                report.deferred
            );
        }
        Ok(report)
    }

    async fn apply_confirmation(
        &self,
        member_id: &Uuid,
        class: &DataClass,
        row: &StoredRow,
        origin: &Origin,
        confirmed: usize,
        current: Option<Map<String, Value>>,
    ) -> PodResult<RowOutcome> {
        let selector = Selector::cursor(&row.meta.cursor);
        match (confirmed, current) {
            (1, Some(current)) => {
                let data = project_to_class(class, current);
                self.mutate(member_id, &class.name, &data, &selector, origin)
                    .await?;
                return Ok(RowOutcome::Confirmed);
            }
            (1, None) => {
                log_cache_debug!(
                    "Origin counted one match for {} but returned no row; treating as a disagreement",
                    row.meta.cursor
                );
            }
            (0, _) => {
                log_cache_debug!(
                    "Origin no longer vouches for {}; removing local copy",
                    row.meta.cursor
                );
            }
            (count, _) => {
                let err = PodError::OriginDisagreement {
                    cursor: row.meta.cursor.clone(),
                    confirmed: count,
                };
                log_cache_error!("{}; removing local copy", err);
            }
        }
        self.delete(member_id, &class.name, &selector).await?;
        Ok(RowOutcome::Deleted)
    }
}

/// Equality filters identifying a cached row at its origin: the key fields,
/// or every scalar field when the class declares none.
fn confirmation_filters(class: &DataClass, data: &Map<String, Value>) -> Map<String, Value> {
    let keys: Vec<&String> = if class.required.is_empty() {
        class
            .fields
            .iter()
            .filter(|(_, ty)| {
                matches!(
                    ty,
                    FieldType::String
                        | FieldType::Integer
                        | FieldType::Number
                        | FieldType::Uuid
                        | FieldType::Datetime
                )
            })
            .map(|(name, _)| name)
            .collect()
    } else {
        class.required.iter().collect()
    };
    keys.into_iter()
        .filter_map(|key| {
            data.get(key)
                .filter(|v| !v.is_null())
                .map(|v| (key.clone(), v.clone()))
        })
        .collect()
}

/// Keep only the fields the local class declares
pub fn project_to_class(class: &DataClass, data: Map<String, Value>) -> Map<String, Value> {
    data.into_iter()
        .filter(|(field, _)| class.fields.contains_key(field))
        .collect()
}
