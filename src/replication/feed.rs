//! Feed promotion: moves staged items from followed peers into the feed.

use super::discovery::{is_followed, load_links};
use super::service::remote_origin;
use crate::error::{PodError, PodResult};
use crate::pubsub::{StoreEvent, Subscription};
use crate::schema::ListenRelation;
use crate::store::{project_to_class, StoreRouter};
use crate::table::{Origin, OriginKind, QueryOptions, Selector};
use crate::{log_replication_debug, log_replication_warn};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Outcome of examining one staged item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    Promoted,
    /// Supplier not followed for this rule; left for TTL expiry
    NotFollowed,
}

/// Watches one destination class of a member and promotes items from
/// followed peers into the rule's feed class.
pub struct FeedPromoter {
    member_id: Uuid,
    rule: ListenRelation,
    feed_class: String,
    router: Arc<StoreRouter>,
}

impl FeedPromoter {
    pub fn new(member_id: Uuid, rule: ListenRelation, router: Arc<StoreRouter>) -> PodResult<Self> {
        let feed_class = rule.feed_class.clone().ok_or_else(|| {
            PodError::validation(format!(
                "Listen rule for '{}' declares no feed class",
                rule.source_class
            ))
        })?;
        Ok(Self {
            member_id,
            rule,
            feed_class,
            router,
        })
    }

    pub fn staging_class(&self) -> &str {
        &self.rule.destination_class
    }

    pub fn feed_class(&self) -> &str {
        &self.feed_class
    }

    /// Promote one staged item if its supplier is still followed
    pub async fn consider(
        &self,
        cursor: &str,
        data: Map<String, Value>,
        origin_id: &str,
        origin_class: Option<&str>,
    ) -> PodResult<Promotion> {
        let schema = self.router.schema(&self.member_id)?;
        let links = load_links(&self.router, &self.member_id, &schema).await?;
        if !is_followed(&links, origin_id, &self.rule) {
            log_replication_debug!(
                "Item {} from {} not followed for '{}'",
                cursor,
                origin_id,
                self.feed_class
            );
            return Ok(Promotion::NotFollowed);
        }

        let feed = self.router.class(&self.member_id, &self.feed_class)?;
        let origin = Origin {
            id: origin_id.to_string(),
            kind: OriginKind::Pod,
            class_name: origin_class.map(str::to_string),
        };
        self.router
            .append(&self.member_id, &self.feed_class, &project_to_class(&feed, data), &origin)
            .await?;
        self.router
            .delete(&self.member_id, &self.rule.destination_class, &Selector::cursor(cursor))
            .await?;
        Ok(Promotion::Promoted)
    }

    async fn consider_event(&self, event: StoreEvent) -> PodResult<Option<Promotion>> {
        if event.member_id != self.member_id || !event.is_append() {
            return Ok(None);
        }
        let origin_id = match (&event.origin_id, event.origin_id_type) {
            (Some(id), Some(OriginKind::Pod)) => id.clone(),
            _ => return Ok(None),
        };
        let promotion = self
            .consider(
                &event.cursor,
                event.data,
                &origin_id,
                event.origin_class_name.as_deref(),
            )
            .await?;
        Ok(Some(promotion))
    }

    /// Examine every item already staged; returns how many were promoted
    pub async fn catch_up(&self) -> PodResult<usize> {
        let staged = self
            .router
            .query(
                &self.member_id,
                &self.rule.destination_class,
                &Selector::all(),
                &QueryOptions::default(),
            )
            .await?;
        let mut promoted = 0;
        for row in staged {
            let Some(origin_id) = remote_origin(&row.meta).map(str::to_string) else {
                continue;
            };
            match self
                .consider(
                    &row.meta.cursor,
                    row.data,
                    &origin_id,
                    row.meta.origin_class_name.as_deref(),
                )
                .await
            {
                Ok(Promotion::Promoted) => promoted += 1,
                Ok(Promotion::NotFollowed) => {}
                Err(err) => log_replication_warn!("Promotion of {} failed: {}", row.meta.cursor, err),
            }
        }
        Ok(promoted)
    }

    /// Promote staged items as they arrive until `shutdown` flips to true.
    ///
    /// `subscription` must be on the staging class and opened before any
    /// catch-up pass so no staged item is missed.
    pub async fn run(&self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        loop {
            let event = tokio::select! {
                event = subscription.recv() => event,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            let Some(event) = event else {
                break;
            };
            let cursor = event.cursor.clone();
            if let Err(err) = self.consider_event(event).await {
                log_replication_warn!("Promotion of {} failed: {}", cursor, err);
            }
        }
        log_replication_debug!(
            "Feed promoter for '{}' of member {} stopped",
            self.feed_class,
            self.member_id
        );
    }
}
