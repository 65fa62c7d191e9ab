use super::listener::{ListenerContext, ListenerKey, UpdateListener};
use crate::log_replication_debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Every live update listener of a node, at most one per key.
pub struct ListenerRegistry {
    ctx: Arc<ListenerContext>,
    listeners: Mutex<HashMap<ListenerKey, Arc<UpdateListener>>>,
}

impl ListenerRegistry {
    pub fn new(ctx: Arc<ListenerContext>) -> Self {
        Self {
            ctx,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ListenerKey, Arc<UpdateListener>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a listener unless one already exists for the key.
    ///
    /// Returns whether a listener was created.
    pub fn ensure(&self, key: ListenerKey, destination_class: &str) -> bool {
        let mut listeners = self.lock();
        if listeners.contains_key(&key) {
            log_replication_debug!("Listener {} already active", key);
            return false;
        }
        let listener = UpdateListener::spawn(key.clone(), destination_class, Arc::clone(&self.ctx));
        listeners.insert(key, Arc::new(listener));
        true
    }

    pub fn get(&self, key: &ListenerKey) -> Option<Arc<UpdateListener>> {
        self.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<ListenerKey> {
        let mut keys: Vec<ListenerKey> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn member_keys(&self, member_id: &Uuid) -> Vec<ListenerKey> {
        self.keys()
            .into_iter()
            .filter(|key| &key.member_id == member_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and forget the listener for `key`; false when none existed
    pub async fn revoke(&self, key: &ListenerKey) -> bool {
        let removed = self.lock().remove(key);
        match removed {
            Some(listener) => {
                listener.revoke().await;
                true
            }
            None => false,
        }
    }

    /// Stop every listener of a member
    pub async fn revoke_member(&self, member_id: &Uuid) -> usize {
        let removed: Vec<Arc<UpdateListener>> = {
            let mut listeners = self.lock();
            let keys: Vec<ListenerKey> = listeners
                .keys()
                .filter(|key| &key.member_id == member_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|key| listeners.remove(key)).collect()
        };
        for listener in &removed {
            listener.revoke().await;
        }
        removed.len()
    }

    pub async fn shutdown(&self) {
        let all: Vec<Arc<UpdateListener>> = self.lock().drain().map(|(_, l)| l).collect();
        for listener in all {
            listener.revoke().await;
        }
    }
}
