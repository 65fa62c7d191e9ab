//! Shared relational engine behind both table shapes.
//!
//! Every version of a row is kept under its insertion sequence `_seq` until
//! pruned; reads only ever see the newest `_seq` per `_cursor`.

use super::columns::{decode_row, encode_row, reconcile};
use super::{MetaFilter, Origin, QueryOptions, Selector, StorageKind, StoredRow};
use crate::constants::{
    COL_CURSOR, COL_EXPIRES, COL_ORIGIN_CLASS, COL_ORIGIN_ID, COL_ORIGIN_ID_TYPE, COL_SEQ,
};
use crate::db_operations::{quote_ident, RelationalBackend, SqlValue};
use crate::error::{PodError, PodResult};
use crate::filter::PlaceholderStyle;
use crate::log_store_debug;
use crate::schema::DataClass;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct TableCore {
    backend: Arc<dyn RelationalBackend>,
    name: String,
    class: DataClass,
    kind: StorageKind,
    enforce_unique_cursor: bool,
}

impl TableCore {
    pub fn new(
        backend: Arc<dyn RelationalBackend>,
        name: String,
        class: DataClass,
        kind: StorageKind,
        enforce_unique_cursor: bool,
    ) -> Self {
        Self {
            backend,
            name,
            class,
            kind,
            enforce_unique_cursor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &DataClass {
        &self.class
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    fn quoted(&self) -> String {
        quote_ident(&self.name)
    }

    pub async fn setup(&self) -> PodResult<()> {
        reconcile(
            self.backend.as_ref(),
            &self.name,
            &self.class,
            self.kind,
            self.enforce_unique_cursor,
        )
        .await?;
        log_store_debug!("Table {} ready ({:?})", self.name, self.kind);
        Ok(())
    }

    fn select_list(&self, mask: Option<&[String]>) -> PodResult<String> {
        let mut columns = vec![COL_SEQ, COL_CURSOR, COL_ORIGIN_ID, COL_ORIGIN_ID_TYPE];
        if self.kind == StorageKind::Cached {
            columns.push(COL_EXPIRES);
            columns.push(COL_ORIGIN_CLASS);
        }
        let mut list: Vec<String> = columns.into_iter().map(quote_ident).collect();
        match mask {
            Some(fields) => {
                for field in fields {
                    self.class.require_field(field)?;
                    list.push(quote_ident(field));
                }
            }
            None => list.extend(self.class.fields.keys().map(|f| quote_ident(f))),
        }
        Ok(list.join(", "))
    }

    /// WHERE clauses selecting the visible rows that match `selector`
    fn visible_where(&self, selector: &Selector) -> PodResult<(Vec<String>, Vec<SqlValue>)> {
        selector.filters.check_fields(&self.class)?;
        let seq = quote_ident(COL_SEQ);
        let cursor = quote_ident(COL_CURSOR);
        let mut clauses = vec![format!(
            "{} IN (SELECT MAX({}) FROM {} GROUP BY {})",
            seq,
            seq,
            self.quoted(),
            cursor
        )];
        let (filter_clauses, mut params) = selector.filters.to_sql(PlaceholderStyle::Question, 1);
        clauses.extend(filter_clauses);

        for meta in &selector.meta {
            match meta {
                MetaFilter::Cursor(value) => {
                    clauses.push(format!("{} = ?", cursor));
                    params.push(SqlValue::Text(value.clone()));
                }
                MetaFilter::OriginId(value) => {
                    clauses.push(format!("{} = ?", quote_ident(COL_ORIGIN_ID)));
                    params.push(SqlValue::Text(value.clone()));
                }
                MetaFilter::ExpiresAtOrBefore(at) => {
                    self.require_cached("filter on expiry")?;
                    clauses.push(format!("{} <= ?", quote_ident(COL_EXPIRES)));
                    params.push(SqlValue::Real(*at));
                }
                MetaFilter::OriginClass(value) => {
                    self.require_cached("filter on origin class")?;
                    clauses.push(format!("{} = ?", quote_ident(COL_ORIGIN_CLASS)));
                    params.push(SqlValue::Text(value.clone()));
                }
            }
        }
        Ok((clauses, params))
    }

    fn require_cached(&self, what: &str) -> PodResult<()> {
        if self.kind != StorageKind::Cached {
            return Err(PodError::validation(format!(
                "Cannot {} on durable table {}",
                what, self.name
            )));
        }
        Ok(())
    }

    /// Sequence position of the newest version carrying `cursor`
    async fn resolve_cursor(&self, cursor: &str) -> PodResult<i64> {
        let rows = self
            .backend
            .query(
                &format!(
                    "SELECT MAX({}) AS pos FROM {} WHERE {} = ?",
                    quote_ident(COL_SEQ),
                    self.quoted(),
                    quote_ident(COL_CURSOR)
                ),
                vec![SqlValue::from(cursor)],
            )
            .await?;
        rows.first()
            .and_then(|row| row.get("pos"))
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| PodError::CursorNotFound(cursor.to_string()))
    }

    pub async fn query(&self, selector: &Selector, options: &QueryOptions) -> PodResult<Vec<StoredRow>> {
        let columns = self.select_list(options.field_mask.as_deref())?;
        let (mut clauses, mut params) = self.visible_where(selector)?;
        if let Some(after) = &options.after_cursor {
            let position = self.resolve_cursor(after).await?;
            clauses.push(format!("{} > ?", quote_ident(COL_SEQ)));
            params.push(SqlValue::Integer(position));
        }
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} ASC",
            columns,
            self.quoted(),
            clauses.join(" AND "),
            quote_ident(COL_SEQ)
        );
        if let Some(limit) = options.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(limit as i64));
        }

        let rows = self.backend.query(&sql, params).await?;
        rows.iter()
            .map(|row| {
                let (data, meta) = decode_row(&self.class, row)?;
                Ok(StoredRow { data, meta })
            })
            .collect()
    }

    pub async fn count(&self, selector: &Selector) -> PodResult<usize> {
        let (clauses, params) = self.visible_where(selector)?;
        let rows = self
            .backend
            .query(
                &format!(
                    "SELECT COUNT(*) AS n FROM {} WHERE {}",
                    self.quoted(),
                    clauses.join(" AND ")
                ),
                params,
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(SqlValue::as_i64)
            .unwrap_or(0) as usize)
    }

    /// Metadata assignments for a write, in column order
    fn meta_values(
        &self,
        cursor: &str,
        origin: &Origin,
        expires_at: Option<f64>,
    ) -> Vec<(&'static str, SqlValue)> {
        let mut values = vec![
            (COL_CURSOR, SqlValue::from(cursor)),
            (COL_ORIGIN_ID, SqlValue::from(origin.id.as_str())),
            (COL_ORIGIN_ID_TYPE, SqlValue::from(origin.kind.as_str())),
        ];
        if self.kind == StorageKind::Cached {
            values.push((COL_EXPIRES, SqlValue::from(expires_at)));
            values.push((COL_ORIGIN_CLASS, SqlValue::from(origin.class_name.clone())));
        }
        values
    }

    pub async fn insert(
        &self,
        data: &Map<String, Value>,
        cursor: &str,
        origin: &Origin,
        expires_at: Option<f64>,
    ) -> PodResult<usize> {
        let encoded = encode_row(&self.class, data)?;
        let mut columns = Vec::new();
        let mut params = Vec::new();
        for (column, value) in self.meta_values(cursor, origin, expires_at) {
            columns.push(quote_ident(column));
            params.push(value);
        }
        for (column, value) in encoded {
            columns.push(quote_ident(&column));
            params.push(value);
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted(),
            columns.join(", "),
            placeholders
        );
        self.backend
            .execute(&sql, params)
            .await
            .map_err(|err| match err {
                PodError::Constraint(_) => PodError::DuplicateOrigin(cursor.to_string()),
                other => other,
            })
    }

    /// Drop superseded versions of `cursor`, keeping the newest
    pub async fn prune_cursor(&self, cursor: &str) -> PodResult<usize> {
        let seq = quote_ident(COL_SEQ);
        let col = quote_ident(COL_CURSOR);
        self.backend
            .execute(
                &format!(
                    "DELETE FROM {t} WHERE {c} = ? AND {s} < (SELECT MAX({s}) FROM {t} WHERE {c} = ?)",
                    t = self.quoted(),
                    c = col,
                    s = seq
                ),
                vec![SqlValue::from(cursor), SqlValue::from(cursor)],
            )
            .await
    }

    /// Drop every row but the newest
    pub async fn prune_all_but_newest(&self) -> PodResult<usize> {
        let seq = quote_ident(COL_SEQ);
        self.backend
            .execute(
                &format!(
                    "DELETE FROM {t} WHERE {s} < (SELECT MAX({s}) FROM {t})",
                    t = self.quoted(),
                    s = seq
                ),
                vec![],
            )
            .await
    }

    /// The single visible row `selector` picks out, as (`_seq`, `_cursor`)
    async fn single_target(&self, selector: &Selector) -> PodResult<Option<(i64, String)>> {
        let (clauses, params) = self.visible_where(selector)?;
        let rows = self
            .backend
            .query(
                &format!(
                    "SELECT {s} AS seq, {c} AS cursor FROM {t} WHERE {w} ORDER BY {s} ASC LIMIT 2",
                    s = quote_ident(COL_SEQ),
                    c = quote_ident(COL_CURSOR),
                    t = self.quoted(),
                    w = clauses.join(" AND ")
                ),
                params,
            )
            .await?;
        if rows.len() > 1 {
            return Err(PodError::validation(format!(
                "Mutate on '{}' matches more than one row; a full replacement needs a selector naming one row",
                self.class.name
            )));
        }
        Ok(rows.first().and_then(|row| {
            let seq = row.get("seq").and_then(SqlValue::as_i64)?;
            let cursor = row.get("cursor").and_then(SqlValue::as_str)?;
            Some((seq, cursor.to_string()))
        }))
    }

    /// Overwrite the one visible row matching `selector` in place.
    ///
    /// Afterwards `cursor` names only that row: any other row holding it is
    /// superseded, and so are stale versions of the row's previous cursor.
    pub async fn update(
        &self,
        data: &Map<String, Value>,
        cursor: &str,
        selector: &Selector,
        origin: &Origin,
        expires_at: Option<f64>,
    ) -> PodResult<usize> {
        let encoded = encode_row(&self.class, data)?;
        let Some((seq, previous)) = self.single_target(selector).await? else {
            return Ok(0);
        };
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (column, value) in self.meta_values(cursor, origin, expires_at) {
            assignments.push(format!("{} = ?", quote_ident(column)));
            params.push(value);
        }
        // Declared fields absent from `data` are cleared so the row is fully replaced.
        for field in self.class.fields.keys() {
            let value = encoded
                .iter()
                .find(|(column, _)| column == field)
                .map(|(_, v)| v.clone())
                .unwrap_or(SqlValue::Null);
            assignments.push(format!("{} = ?", quote_ident(field)));
            params.push(value);
        }
        params.push(SqlValue::Integer(seq));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.quoted(),
            assignments.join(", "),
            quote_ident(COL_SEQ)
        );
        let updated = self
            .backend
            .execute(&sql, params)
            .await
            .map_err(|err| match err {
                PodError::Constraint(_) => PodError::DuplicateOrigin(cursor.to_string()),
                other => other,
            })?;

        let superseded = self
            .backend
            .execute(
                &format!(
                    "DELETE FROM {t} WHERE {c} IN (?, ?) AND {s} <> ?",
                    t = self.quoted(),
                    c = quote_ident(COL_CURSOR),
                    s = quote_ident(COL_SEQ)
                ),
                vec![
                    SqlValue::from(cursor),
                    SqlValue::from(previous),
                    SqlValue::Integer(seq),
                ],
            )
            .await?;
        if superseded > 0 {
            log_store_debug!("Mutate of {} superseded {} rows in {}", cursor, superseded, self.name);
        }
        Ok(updated)
    }

    /// Delete every version of each visible row matching `selector`
    pub async fn delete(&self, selector: &Selector) -> PodResult<usize> {
        let (clauses, params) = self.visible_where(selector)?;
        let sql = format!(
            "DELETE FROM {t} WHERE {c} IN (SELECT {c} FROM {t} WHERE {w})",
            t = self.quoted(),
            c = quote_ident(COL_CURSOR),
            w = clauses.join(" AND ")
        );
        self.backend.execute(&sql, params).await
    }

    pub async fn expire(&self, before: f64) -> PodResult<usize> {
        self.require_cached("expire rows")?;
        self.backend
            .execute(
                &format!(
                    "DELETE FROM {} WHERE {} <= ?",
                    self.quoted(),
                    quote_ident(COL_EXPIRES)
                ),
                vec![SqlValue::Real(before)],
            )
            .await
    }

    pub async fn drop_table(&self) -> PodResult<()> {
        self.backend
            .execute(&format!("DROP TABLE IF EXISTS {}", self.quoted()), vec![])
            .await?;
        log_store_debug!("Dropped table {}", self.name);
        Ok(())
    }
}
