//! Trust-link discovery: which remote classes a member should be listening to.

use super::listener::ListenerKey;
use crate::constants::{LINK_ANNOTATIONS_FIELD, LINK_PEER_FIELD, LINK_RELATION_FIELD};
use crate::error::PodResult;
use crate::log_replication_warn;
use crate::schema::{ListenRelation, ServiceSchema};
use crate::store::StoreRouter;
use crate::table::{QueryOptions, Selector};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A row of the links class: the member trusts `peer_id` under `relation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustLink {
    pub peer_id: Uuid,
    pub relation: String,
    pub annotations: Vec<String>,
}

impl TrustLink {
    pub fn new(peer_id: Uuid, relation: &str) -> Self {
        Self {
            peer_id,
            relation: relation.to_string(),
            annotations: Vec::new(),
        }
    }

    pub fn with_annotation(mut self, annotation: &str) -> Self {
        self.annotations.push(annotation.to_string());
        self
    }

    /// Parse a links-class row; `None` when the peer or relation is unusable
    pub fn from_row(row: &Map<String, Value>) -> Option<Self> {
        let peer_id = row
            .get(LINK_PEER_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())?;
        let relation = row.get(LINK_RELATION_FIELD).and_then(Value::as_str)?;
        let annotations = match row.get(LINK_ANNOTATIONS_FIELD) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(joined)) => joined
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        Some(Self {
            peer_id,
            relation: relation.to_string(),
            annotations,
        })
    }

    /// Whether the link satisfies the rule's relation and annotation set
    pub fn satisfies(&self, rule: &ListenRelation) -> bool {
        rule.accepts_relation(&self.relation)
            && rule
                .annotations
                .iter()
                .all(|wanted| self.annotations.iter().any(|a| a == wanted))
    }
}

/// Links currently stored for a member
pub async fn load_links(router: &StoreRouter, member_id: &Uuid, schema: &ServiceSchema) -> PodResult<Vec<TrustLink>> {
    let rows = router
        .query(member_id, &schema.links_class, &Selector::all(), &QueryOptions::default())
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let link = TrustLink::from_row(&row.data);
            if link.is_none() {
                log_replication_warn!("Ignoring malformed link row {}", row.meta.cursor);
            }
            link
        })
        .collect())
}

/// Listener keys (with destination classes) implied by the rules and links.
///
/// A link to the member itself never yields a listener.
pub fn desired_listeners(
    member_id: &Uuid,
    schema: &ServiceSchema,
    links: &[TrustLink],
) -> BTreeMap<ListenerKey, String> {
    let mut desired = BTreeMap::new();
    for rule in &schema.listen {
        for link in links {
            if &link.peer_id == member_id || !rule.accepts_relation(&link.relation) {
                continue;
            }
            let key = ListenerKey::new(*member_id, &link.peer_id.to_string(), &rule.source_class);
            desired
                .entry(key)
                .or_insert_with(|| rule.destination_class.clone());
        }
    }
    desired
}

/// Whether items from `origin_id` belong in the rule's feed
pub fn is_followed(links: &[TrustLink], origin_id: &str, rule: &ListenRelation) -> bool {
    links
        .iter()
        .any(|link| link.peer_id.to_string() == origin_id && link.satisfies(rule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ServiceSchema {
        ServiceSchema::new("social")
            .with_listen(ListenRelation::new("posts", "inbox").with_relation("friend").with_feed("feed"))
            .with_listen(ListenRelation::new("profile", "contacts"))
    }

    #[test]
    fn test_link_from_row() {
        let peer = Uuid::new_v4();
        let row = json!({"peer_id": peer.to_string(), "relation": "friend", "annotations": ["close"]});
        let link = TrustLink::from_row(row.as_object().unwrap()).unwrap();
        assert_eq!(link, TrustLink::new(peer, "friend").with_annotation("close"));

        let bad = json!({"peer_id": "nope", "relation": "friend"});
        assert!(TrustLink::from_row(bad.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_desired_listeners_follow_relations() {
        let member = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let colleague = Uuid::new_v4();
        let links = vec![
            TrustLink::new(friend, "friend"),
            TrustLink::new(colleague, "colleague"),
            TrustLink::new(member, "friend"),
        ];
        let desired = desired_listeners(&member, &schema(), &links);

        let friend_posts = ListenerKey::new(member, &friend.to_string(), "posts");
        let colleague_posts = ListenerKey::new(member, &colleague.to_string(), "posts");
        assert_eq!(desired.get(&friend_posts).map(String::as_str), Some("inbox"));
        assert!(!desired.contains_key(&colleague_posts));
        // the wildcard rule takes every peer but never the member itself
        assert_eq!(desired.len(), 3);
        assert!(desired.keys().all(|k| k.remote_id != member.to_string()));
    }

    #[test]
    fn test_is_followed_requires_annotations() {
        let peer = Uuid::new_v4();
        let rule = ListenRelation::new("posts", "inbox")
            .with_relation("friend")
            .with_feed("feed")
            .with_annotation("close");
        let plain = vec![TrustLink::new(peer, "friend")];
        let close = vec![TrustLink::new(peer, "friend").with_annotation("close")];
        assert!(!is_followed(&plain, &peer.to_string(), &rule));
        assert!(is_followed(&close, &peer.to_string(), &rule));
        assert!(!is_followed(&close, &Uuid::new_v4().to_string(), &rule));
    }
}
