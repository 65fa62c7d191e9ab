//! Streaming subscription seam between a listener and a remote node.
//!
//! Reconnection is the caller's concern: a connector opens one stream and
//! reports failures through it, nothing more.

use crate::api::Credential;
use crate::error::PodResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifies one remote class stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub service_id: String,
    pub class_name: String,
    /// Member id served by the remote node
    pub remote_id: String,
}

impl StreamKey {
    pub fn new(service_id: &str, class_name: &str, remote_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            class_name: class_name.to_string(),
            remote_id: remote_id.to_string(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.service_id, self.class_name, self.remote_id)
    }
}

/// One item pushed by a remote node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub origin_id: String,
    pub node: Map<String, Value>,
}

/// Items of an open stream; an `Err` item or the end of the stream means the
/// connection is gone.
pub type EventStream = BoxStream<'static, PodResult<StreamEvent>>;

#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, key: &StreamKey, credential: Credential) -> PodResult<EventStream>;
}
