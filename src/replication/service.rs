use super::transport::{EventStream, StreamEvent, StreamKey};
use crate::api::Credential;
use crate::error::{PodError, PodResult};
use crate::log_replication_debug;
use crate::pubsub::{PubSub, StoreEvent};
use crate::store::StoreRouter;
use crate::table::{OriginKind, QueryOptions, RowMetadata, Selector};
use futures::future;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use uuid::Uuid;

/// Remote-facing side of replication: streams a member's own appends to a
/// class to whoever subscribes.
///
/// A new stream first replays the rows currently stored, then follows live
/// appends, so a subscriber that reconnects after an outage catches up.
/// Rows this node itself received from elsewhere are never relayed.
pub struct ReplicationService {
    service_id: String,
    router: Arc<StoreRouter>,
    pubsub: Arc<PubSub>,
}

impl ReplicationService {
    pub fn new(service_id: &str, router: Arc<StoreRouter>, pubsub: Arc<PubSub>) -> Self {
        Self {
            service_id: service_id.to_string(),
            router,
            pubsub,
        }
    }

    fn is_own(origin_kind: Option<OriginKind>) -> bool {
        origin_kind != Some(OriginKind::Pod)
    }

    pub async fn open_stream(&self, key: &StreamKey, credential: &Credential) -> PodResult<EventStream> {
        if key.service_id != self.service_id {
            return Err(PodError::validation(format!(
                "Stream for service '{}' requested from node serving '{}'",
                key.service_id, self.service_id
            )));
        }
        if credential.token().is_empty() {
            return Err(PodError::validation("Stream request carries no credential"));
        }
        let member_id = Uuid::parse_str(&key.remote_id)
            .map_err(|e| PodError::validation(format!("Invalid member id '{}': {}", key.remote_id, e)))?;
        let schema = self.router.schema(&member_id)?;
        if !schema.is_streamable(&key.class_name) {
            return Err(PodError::validation(format!(
                "Class '{}' is not offered for replication",
                key.class_name
            )));
        }

        // Subscribe before reading current rows so nothing falls between the two
        let live = self.pubsub.subscribe(&key.class_name);
        let stored = self
            .router
            .query(&member_id, &key.class_name, &Selector::all(), &QueryOptions::default())
            .await?;
        log_replication_debug!(
            "Opening stream {} with {} stored rows",
            key,
            stored.len()
        );

        let origin_id = member_id.to_string();
        let replay: Vec<PodResult<StreamEvent>> = stored
            .into_iter()
            .filter(|row| Self::is_own(row.meta.origin_id_type))
            .map(|row| {
                Ok(StreamEvent {
                    origin_id: origin_id.clone(),
                    node: row.data,
                })
            })
            .collect();

        let follow = live.into_stream().filter_map(move |event: StoreEvent| {
            let item = (event.member_id == member_id
                && event.is_append()
                && Self::is_own(event.origin_id_type))
            .then(|| {
                Ok(StreamEvent {
                    origin_id: origin_id.clone(),
                    node: event.data,
                })
            });
            future::ready(item)
        });

        Ok(stream::iter(replay).chain(follow).boxed())
    }
}

/// Origin tag of a stored row, when it came from a remote node
pub fn remote_origin(meta: &RowMetadata) -> Option<&str> {
    match meta.origin_id_type {
        Some(OriginKind::Pod) => meta.origin_id.as_deref(),
        _ => None,
    }
}
