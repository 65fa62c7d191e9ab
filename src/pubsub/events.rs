use crate::table::{OriginKind, RowMetadata};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreAction {
    Append,
    Delete,
}

/// A committed store mutation, as seen by local subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEvent {
    pub action: StoreAction,
    pub member_id: Uuid,
    pub class_name: String,
    pub cursor: String,
    pub data: Map<String, Value>,
    pub origin_id: Option<String>,
    pub origin_id_type: Option<OriginKind>,
    pub origin_class_name: Option<String>,
}

impl StoreEvent {
    pub fn new(
        action: StoreAction,
        member_id: Uuid,
        class_name: &str,
        data: Map<String, Value>,
        meta: &RowMetadata,
    ) -> Self {
        Self {
            action,
            member_id,
            class_name: class_name.to_string(),
            cursor: meta.cursor.clone(),
            data,
            origin_id: meta.origin_id.clone(),
            origin_id_type: meta.origin_id_type,
            origin_class_name: meta.origin_class_name.clone(),
        }
    }

    /// Digest identifying the payload, used to drop repeated deliveries
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match serde_json::to_vec(self) {
            Ok(bytes) => hasher.update(bytes),
            Err(_) => {
                hasher.update(self.member_id.as_bytes());
                hasher.update(self.class_name.as_bytes());
                hasher.update(self.cursor.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    pub fn is_append(&self) -> bool {
        self.action == StoreAction::Append
    }
}
