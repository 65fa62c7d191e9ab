use super::{ApiAction, ApiRequest, ApiResponse, DataApi, Edge};
use crate::error::{PodError, PodResult};
use crate::filter::FilterSet;
use crate::log_store_debug;
use crate::store::StoreRouter;
use crate::table::{Origin, QueryOptions, RowMetadata, Selector};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// This node's Data API, fronting the store router.
///
/// Replicated rows are written through here as well, so every write path
/// publishes on the local bus the same way.
pub struct LocalDataApi {
    service_id: String,
    router: Arc<StoreRouter>,
}

impl LocalDataApi {
    pub fn new(service_id: &str, router: Arc<StoreRouter>) -> Self {
        Self {
            service_id: service_id.to_string(),
            router,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn router(&self) -> &Arc<StoreRouter> {
        &self.router
    }

    fn require_data(request: &ApiRequest) -> PodResult<&Map<String, Value>> {
        request.data.as_ref().ok_or_else(|| {
            PodError::validation(format!("{:?} request carries no data", request.action))
        })
    }

    fn request_origin(request: &ApiRequest) -> Origin {
        request
            .origin
            .clone()
            .map(Origin::from)
            .unwrap_or_else(|| Origin::member(request.member_id))
    }

    /// The origin a stored row was written with
    fn stored_origin(member_id: Uuid, meta: &RowMetadata) -> Origin {
        match (&meta.origin_id, meta.origin_id_type) {
            (Some(id), Some(kind)) => Origin {
                id: id.clone(),
                kind,
                class_name: meta.origin_class_name.clone(),
            },
            _ => Origin::member(member_id),
        }
    }

    async fn query(&self, request: &ApiRequest, selector: Selector) -> PodResult<ApiResponse> {
        let options = QueryOptions {
            limit: request.page_size,
            after_cursor: request.after_cursor.clone(),
            field_mask: request.field_mask.clone(),
        };
        let rows = self
            .router
            .query(&request.member_id, &request.class_name, &selector, &options)
            .await?;
        let total_count = self
            .router
            .count(&request.member_id, &request.class_name, &selector)
            .await?;
        Ok(ApiResponse {
            total_count,
            edges: rows.into_iter().map(Edge::from).collect(),
        })
    }

    async fn append(&self, request: &ApiRequest) -> PodResult<ApiResponse> {
        let data = Self::require_data(request)?;
        let origin = Self::request_origin(request);
        let outcome = self
            .router
            .append(&request.member_id, &request.class_name, data, &origin)
            .await?;
        Ok(ApiResponse {
            total_count: outcome.rows_affected,
            edges: vec![Edge {
                node: data.clone(),
                cursor: outcome.cursor,
            }],
        })
    }

    async fn mutate(&self, request: &ApiRequest, selector: Selector) -> PodResult<ApiResponse> {
        let data = Self::require_data(request)?;
        let origin = Self::request_origin(request);
        let outcome = self
            .router
            .mutate(&request.member_id, &request.class_name, data, &selector, &origin)
            .await?;
        Ok(ApiResponse::affected(outcome.rows_affected))
    }

    /// Merge the supplied fields into each matching row, keeping each row's origin
    async fn update(&self, request: &ApiRequest, selector: Selector) -> PodResult<ApiResponse> {
        let patch = Self::require_data(request)?;
        let rows = self
            .router
            .query(
                &request.member_id,
                &request.class_name,
                &selector,
                &QueryOptions::default(),
            )
            .await?;
        let mut updated = 0;
        let mut edges = Vec::with_capacity(rows.len());
        for row in rows {
            let mut merged = row.data;
            for (field, value) in patch {
                merged.insert(field.clone(), value.clone());
            }
            let origin = Self::stored_origin(request.member_id, &row.meta);
            let outcome = self
                .router
                .mutate(
                    &request.member_id,
                    &request.class_name,
                    &merged,
                    &Selector::cursor(&row.meta.cursor),
                    &origin,
                )
                .await?;
            updated += outcome.rows_affected;
            edges.push(Edge {
                node: merged,
                cursor: outcome.cursor,
            });
        }
        Ok(ApiResponse {
            total_count: updated,
            edges,
        })
    }
}

#[async_trait]
impl DataApi for LocalDataApi {
    async fn call(&self, request: ApiRequest) -> PodResult<ApiResponse> {
        if request.service_id != self.service_id {
            return Err(PodError::validation(format!(
                "Request for service '{}' reached node serving '{}'",
                request.service_id, self.service_id
            )));
        }
        log_store_debug!(
            "{:?} {} for member {}",
            request.action,
            request.class_name,
            request.member_id
        );
        let class = self.router.class(&request.member_id, &request.class_name)?;
        let selector = Selector::from_filters(FilterSet::from_request(&request.filters, &class)?);

        match request.action {
            ApiAction::Query => self.query(&request, selector).await,
            ApiAction::Append => self.append(&request).await,
            ApiAction::Mutate => self.mutate(&request, selector).await,
            ApiAction::Update => self.update(&request, selector).await,
            ApiAction::Delete => {
                let removed = self
                    .router
                    .delete(&request.member_id, &request.class_name, &selector)
                    .await?;
                Ok(ApiResponse::affected(removed))
            }
        }
    }
}
