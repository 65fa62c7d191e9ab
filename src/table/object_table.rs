use super::core::TableCore;
use super::{Origin, QueryOptions, Selector, StorageKind, StoredRow, Table};
use crate::error::PodResult;
use crate::schema::DataClass;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// At most one visible row per member.
///
/// Object classes have no natural update key, so `mutate` deletes the current
/// row and inserts the supplied one; callers pass the full field set.
pub struct ObjectTable {
    core: TableCore,
}

impl ObjectTable {
    pub fn new(core: TableCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Table for ObjectTable {
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
        let mut rows = self.core.query(selector, options).await?;
        // A concurrent append can leave two versions briefly visible; the newest wins.
        if rows.len() > 1 {
            rows.drain(..rows.len() - 1);
        }
        Ok(rows)
    }

    async fn count(&self, selector: &Selector) -> PodResult<usize> {
        Ok(self.core.count(selector).await?.min(1))
    }

    async fn append(
        &self,
        data: &Map<String, Value>,
        cursor: &str,
        origin: &Origin,
        expires_at: Option<f64>,
    ) -> PodResult<usize> {
        let inserted = self.core.insert(data, cursor, origin, expires_at).await?;
        self.core.prune_all_but_newest().await?;
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
        if self.core.delete(selector).await? == 0 {
            return Ok(0);
        }
        let inserted = self.core.insert(data, cursor, origin, expires_at).await?;
        self.core.prune_all_but_newest().await?;
        Ok(inserted)
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
    use crate::filter::FilterSet;
    use crate::schema::FieldType;
    use crate::table::{compute_cursor, open_table, Table};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn class() -> DataClass {
        DataClass::object("profile")
            .with_field("name", FieldType::String)
            .with_field("bio", FieldType::String)
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn table() -> Arc<dyn Table> {
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        open_table(backend, &Uuid::new_v4(), &class(), StorageKind::Durable, false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_keeps_single_row() {
        let table = table().await;
        let origin = Origin::member(Uuid::new_v4());
        for name in ["ada", "grace"] {
            let row = data(json!({"name": name}));
            let cursor = compute_cursor(table.class(), &row, &origin.id).unwrap();
            table.append(&row, &cursor, &origin, None).await.unwrap();
        }
        let rows = table.query(&Selector::all(), &QueryOptions::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["name"], json!("grace"));
    }

    #[tokio::test]
    async fn test_mutate_replaces_whole_row() {
        let table = table().await;
        let origin = Origin::member(Uuid::new_v4());
        let row = data(json!({"name": "ada", "bio": "math"}));
        let cursor = compute_cursor(table.class(), &row, &origin.id).unwrap();
        table.append(&row, &cursor, &origin, None).await.unwrap();

        let miss = Selector::from_filters(
            FilterSet::from_request(json!({"name": "bob"}).as_object().unwrap(), table.class())
                .unwrap(),
        );
        let replacement = data(json!({"name": "ada lovelace"}));
        let next = compute_cursor(table.class(), &replacement, &origin.id).unwrap();
        assert_eq!(
            table.mutate(&replacement, &next, &miss, &origin, None).await.unwrap(),
            0
        );

        assert_eq!(
            table
                .mutate(&replacement, &next, &Selector::all(), &origin, None)
                .await
                .unwrap(),
            1
        );
        let rows = table.query(&Selector::all(), &QueryOptions::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, replacement);
        assert_eq!(rows[0].meta.cursor, next);
    }
}
