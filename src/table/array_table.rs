use super::core::TableCore;
use super::{Origin, QueryOptions, Selector, StorageKind, StoredRow, Table};
use crate::error::PodResult;
use crate::schema::DataClass;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Many rows per member, paginated by insertion sequence.
pub struct ArrayTable {
    core: TableCore,
}

impl ArrayTable {
    pub fn new(core: TableCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Table for ArrayTable {
    fn class(&self) -> &DataClass {
        self.core.class()
    }

    fn table_name(&self) -> &str {
        self.core.name()
    }

    fn storage_kind(&self) -> StorageKind {
        self.core.kind()
    }

    async fn query(&self, selector: &Selector, options: &QueryOptions) -> PodResult<Vec<StoredRow>> {
        self.core.query(selector, options).await
    }

    async fn count(&self, selector: &Selector) -> PodResult<usize> {
        self.core.count(selector).await
    }

    async fn append(
        &self,
        data: &Map<String, Value>,
        cursor: &str,
        origin: &Origin,
        expires_at: Option<f64>,
    ) -> PodResult<usize> {
        let inserted = self.core.insert(data, cursor, origin, expires_at).await?;
        self.core.prune_cursor(cursor).await?;
        Ok(inserted)
    }

    async fn mutate(
        &self,
        data: &Map<String, Value>,
        cursor: &str,
        selector: &Selector,
        origin: &Origin,
        expires_at: Option<f64>,
    ) -> PodResult<usize> {
        self.core
            .update(data, cursor, selector, origin, expires_at)
            .await
    }

    async fn delete(&self, selector: &Selector) -> PodResult<usize> {
        self.core.delete(selector).await
    }

    async fn expire(&self, before: f64) -> PodResult<usize> {
        self.core.expire(before).await
    }

    async fn drop_table(&self) -> PodResult<()> {
        self.core.drop_table().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_operations::SqliteBackend;
    use crate::error::PodError;
    use crate::filter::FilterSet;
    use crate::schema::FieldType;
    use crate::table::{compute_cursor, open_table, MetaFilter, Table};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn class() -> DataClass {
        DataClass::array("posts")
            .with_required("id", FieldType::Integer)
            .with_field("body", FieldType::String)
    }

    fn row(id: i64, body: &str) -> Map<String, Value> {
        json!({"id": id, "body": body}).as_object().cloned().unwrap()
    }

    async fn table(kind: StorageKind, unique: bool) -> Arc<dyn Table> {
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        open_table(backend, &Uuid::new_v4(), &class(), kind, unique)
            .await
            .unwrap()
    }

    async fn append(table: &Arc<dyn Table>, data: Map<String, Value>, origin: &Origin) -> String {
        let cursor = compute_cursor(table.class(), &data, &origin.id).unwrap();
        table.append(&data, &cursor, origin, None).await.unwrap();
        cursor
    }

    #[tokio::test]
    async fn test_same_cursor_supersedes() {
        let table = table(StorageKind::Durable, false).await;
        let origin = Origin::member(Uuid::new_v4());
        let first = append(&table, row(1, "a"), &origin).await;
        let second = append(&table, row(1, "b"), &origin).await;
        assert_eq!(first, second);

        let rows = table.query(&Selector::all(), &QueryOptions::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["body"], json!("b"));
        assert_eq!(rows[0].meta.cursor, first);
    }

    #[tokio::test]
    async fn test_unique_cursor_rejects_duplicate() {
        let table = table(StorageKind::Durable, true).await;
        let origin = Origin::member(Uuid::new_v4());
        let data = row(1, "a");
        let cursor = compute_cursor(table.class(), &data, &origin.id).unwrap();
        table.append(&data, &cursor, &origin, None).await.unwrap();
        let err = table.append(&data, &cursor, &origin, None).await.unwrap_err();
        assert!(matches!(err, PodError::DuplicateOrigin(_)));
    }

    #[tokio::test]
    async fn test_mutate_and_delete_by_filter() {
        let table = table(StorageKind::Durable, false).await;
        let origin = Origin::member(Uuid::new_v4());
        append(&table, row(1, "a"), &origin).await;
        append(&table, row(2, "b"), &origin).await;

        let filters = FilterSet::from_request(
            json!({"id": 2}).as_object().unwrap(),
            table.class(),
        )
        .unwrap();
        let selector = Selector::from_filters(filters);
        let replacement = row(2, "changed");
        let cursor = compute_cursor(table.class(), &replacement, &origin.id).unwrap();
        assert_eq!(
            table
                .mutate(&replacement, &cursor, &selector, &origin, None)
                .await
                .unwrap(),
            1
        );
        let rows = table.query(&selector, &QueryOptions::default()).await.unwrap();
        assert_eq!(rows[0].data["body"], json!("changed"));

        assert_eq!(table.delete(&selector).await.unwrap(), 1);
        assert_eq!(table.count(&Selector::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expire_only_on_cache_tables() {
        let durable = table(StorageKind::Durable, false).await;
        assert!(matches!(durable.expire(0.0).await, Err(PodError::Validation(_))));
        assert!(durable
            .count(&Selector::all().with_meta(MetaFilter::ExpiresAtOrBefore(0.0)))
            .await
            .is_err());

        let cached = table(StorageKind::Cached, false).await;
        let origin = Origin::remote("peer", crate::table::OriginKind::Pod, "posts");
        let data = row(1, "a");
        let cursor = compute_cursor(cached.class(), &data, &origin.id).unwrap();
        cached.append(&data, &cursor, &origin, Some(100.0)).await.unwrap();
        let rows = cached.query(&Selector::all(), &QueryOptions::default()).await.unwrap();
        assert_eq!(rows[0].meta.expires_at, Some(100.0));
        assert_eq!(rows[0].meta.origin_class_name.as_deref(), Some("posts"));
        assert_eq!(cached.expire(99.0).await.unwrap(), 0);
        assert_eq!(cached.expire(100.0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_field_mask() {
        let table = table(StorageKind::Durable, false).await;
        let origin = Origin::member(Uuid::new_v4());
        append(&table, row(1, "a"), &origin).await;
        let options = QueryOptions {
            field_mask: Some(vec!["body".to_string()]),
            ..Default::default()
        };
        let rows = table.query(&Selector::all(), &options).await.unwrap();
        assert_eq!(rows[0].data.len(), 1);
        assert!(rows[0].data.contains_key("body"));

        let bad = QueryOptions {
            field_mask: Some(vec!["missing".to_string()]),
            ..Default::default()
        };
        assert!(table.query(&Selector::all(), &bad).await.is_err());
    }
}
