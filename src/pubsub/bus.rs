//! In-process broadcast of store mutations.
//!
//! One `tokio::sync::broadcast` channel exists per data class. Delivery is
//! fire-and-forget: a subscriber only sees events published while it is
//! subscribed, and a subscriber that falls behind the channel capacity loses
//! the oldest events. State that must survive missed events is re-derived
//! from the store.

use super::events::StoreEvent;
use crate::config::PubSubConfig;
use crate::{log_pubsub_debug, log_pubsub_warn};
use futures::stream::{self, BoxStream, StreamExt};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};

/// Error returned by [`Subscription::recv_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionRecvError {
    #[error("Timed out waiting for an event")]
    Timeout,
    #[error("Channel closed")]
    Closed,
}

/// Per-node event bus with one broadcast channel per data class.
pub struct PubSub {
    capacity: usize,
    dedup_window: NonZeroUsize,
    channels: Mutex<HashMap<String, broadcast::Sender<StoreEvent>>>,
}

impl PubSub {
    pub fn new(config: &PubSubConfig) -> Self {
        Self {
            capacity: config.channel_capacity.max(1),
            dedup_window: NonZeroUsize::new(config.dedup_window).unwrap_or(NonZeroUsize::MIN),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, class_name: &str) -> broadcast::Sender<StoreEvent> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(class_name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish an event on its class channel; returns how many subscribers received it
    pub fn publish(&self, event: StoreEvent) -> usize {
        let class_name = event.class_name.clone();
        match self.sender(&class_name).send(event) {
            Ok(receivers) => {
                log_pubsub_debug!("Published event on '{}' to {} subscribers", class_name, receivers);
                receivers
            }
            Err(_) => {
                log_pubsub_debug!("No subscribers on '{}'; event dropped", class_name);
                0
            }
        }
    }

    /// Subscribe to every event published on a class from now on
    pub fn subscribe(&self, class_name: &str) -> Subscription {
        Subscription {
            class_name: class_name.to_string(),
            receiver: self.sender(class_name).subscribe(),
            seen: LruCache::new(self.dedup_window),
        }
    }

    pub fn subscriber_count(&self, class_name: &str) -> usize {
        self.sender(class_name).receiver_count()
    }
}

/// A receiver on one class channel that drops repeated payloads.
pub struct Subscription {
    class_name: String,
    receiver: broadcast::Receiver<StoreEvent>,
    /// Last payload fingerprint seen per row
    seen: LruCache<String, String>,
}

impl Subscription {
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Next unseen event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    // Only a repeat of the row's most recent payload is a duplicate, so a
                    // row that is deleted and re-appended is delivered again.
                    let key = format!("{}:{}", event.member_id, event.cursor);
                    let fingerprint = event.fingerprint();
                    if self.seen.get(&key) == Some(&fingerprint) {
                        log_pubsub_debug!("Dropping duplicate event on '{}'", self.class_name);
                        continue;
                    }
                    self.seen.put(key, fingerprint);
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log_pubsub_warn!(
                        "Subscriber on '{}' lagged; {} events lost",
                        self.class_name,
                        missed
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub async fn recv_timeout(&mut self, duration: Duration) -> Result<StoreEvent, SubscriptionRecvError> {
        match timeout(duration, self.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(SubscriptionRecvError::Closed),
            Err(_) => Err(SubscriptionRecvError::Timeout),
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, StoreEvent> {
        stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|event| (event, subscription))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::StoreAction;
    use crate::table::RowMetadata;
    use serde_json::{json, Map};
    use uuid::Uuid;

    fn bus() -> PubSub {
        PubSub::new(&PubSubConfig::default())
    }

    fn event(class: &str, cursor: &str) -> StoreEvent {
        let meta = RowMetadata {
            cursor: cursor.to_string(),
            ..Default::default()
        };
        StoreEvent::new(
            StoreAction::Append,
            Uuid::nil(),
            class,
            json!({"n": cursor}).as_object().cloned().unwrap_or_else(Map::new),
            &meta,
        )
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = bus();
        let mut a = bus.subscribe("posts");
        let mut b = bus.subscribe("posts");
        assert_eq!(bus.publish(event("posts", "1")), 2);
        assert_eq!(a.recv().await.unwrap().cursor, "1");
        assert_eq!(b.recv().await.unwrap().cursor, "1");
    }

    #[tokio::test]
    async fn test_classes_are_isolated() {
        let bus = bus();
        let mut posts = bus.subscribe("posts");
        bus.publish(event("inbox", "1"));
        assert_eq!(
            posts.recv_timeout(Duration::from_millis(20)).await.unwrap_err(),
            SubscriptionRecvError::Timeout
        );
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let bus = bus();
        assert_eq!(bus.publish(event("posts", "early")), 0);
        let mut late = bus.subscribe("posts");
        bus.publish(event("posts", "late"));
        assert_eq!(late.recv().await.unwrap().cursor, "late");
    }

    #[tokio::test]
    async fn test_duplicates_are_dropped() {
        let bus = bus();
        let mut sub = bus.subscribe("posts");
        bus.publish(event("posts", "1"));
        bus.publish(event("posts", "1"));
        bus.publish(event("posts", "2"));
        assert_eq!(sub.recv().await.unwrap().cursor, "1");
        assert_eq!(sub.recv().await.unwrap().cursor, "2");
    }

    #[tokio::test]
    async fn test_reappend_after_delete_is_delivered() {
        let bus = bus();
        let mut sub = bus.subscribe("posts");
        let append = event("posts", "1");
        let mut delete = append.clone();
        delete.action = StoreAction::Delete;
        bus.publish(append.clone());
        bus.publish(delete);
        bus.publish(append);
        assert!(sub.recv().await.unwrap().is_append());
        assert!(!sub.recv().await.unwrap().is_append());
        assert!(sub.recv().await.unwrap().is_append());
    }
}
