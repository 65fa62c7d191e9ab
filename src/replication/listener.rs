//! Update listener: one supervised streaming subscription to a remote class.
//!
//! The listener's state is an explicit value published on a watch channel.
//! A single supervising task drives the transitions
//! `Connecting -> Streaming -> Backoff -> Connecting`; revocation stops the
//! task from whatever state it is in.

use super::backoff::Backoff;
use super::transport::{StreamConnector, StreamEvent, StreamKey};
use crate::api::{ApiRequest, CredentialProvider, DataApi, LocalDataApi, OriginInfo};
use crate::config::ReplicationConfig;
use crate::error::PodResult;
use crate::store::project_to_class;
use crate::table::OriginKind;
use crate::{log_replication_debug, log_replication_info, log_replication_warn};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

/// What a listener subscribes to: one remote member's class, on behalf of a
/// local member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerKey {
    pub member_id: Uuid,
    pub remote_id: String,
    pub class_name: String,
}

impl ListenerKey {
    pub fn new(member_id: Uuid, remote_id: &str, class_name: &str) -> Self {
        Self {
            member_id,
            remote_id: remote_id.to_string(),
            class_name: class_name.to_string(),
        }
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<-{}/{}", self.member_id, self.remote_id, self.class_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Connecting,
    Streaming,
    /// Waiting before reconnect attempt `attempt`
    Backoff { attempt: u32 },
    Revoked,
}

impl ListenerState {
    pub fn is_backoff(&self) -> bool {
        matches!(self, ListenerState::Backoff { .. })
    }
}

/// Collaborators shared by every listener of a node.
pub struct ListenerContext {
    pub service_id: String,
    pub local: Arc<LocalDataApi>,
    pub connector: Arc<dyn StreamConnector>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub config: ReplicationConfig,
}

impl ListenerContext {
    async fn connect(&self, key: &ListenerKey) -> PodResult<super::transport::EventStream> {
        let credential = self.credentials.credential_for(&key.remote_id).await?;
        let stream_key = StreamKey::new(&self.service_id, &key.class_name, &key.remote_id);
        self.connector.connect(&stream_key, credential).await
    }

    /// Append a received item into the destination class, tagged with its origin
    async fn materialize(&self, key: &ListenerKey, destination_class: &str, event: StreamEvent) -> PodResult<()> {
        let class = self.local.router().class(&key.member_id, destination_class)?;
        let node = project_to_class(&class, event.node);
        let request = ApiRequest::append(&self.service_id, key.member_id, destination_class, node)
            .with_origin(OriginInfo {
                id: event.origin_id,
                kind: OriginKind::Pod,
                class_name: key.class_name.clone(),
            });
        self.local.call(request).await?;
        Ok(())
    }
}

enum Step {
    Item(Option<PodResult<StreamEvent>>),
    Revoked,
}

pub struct UpdateListener {
    key: ListenerKey,
    destination_class: String,
    state: watch::Receiver<ListenerState>,
    revoke: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateListener {
    /// Start the supervising task
    pub fn spawn(key: ListenerKey, destination_class: &str, ctx: Arc<ListenerContext>) -> Self {
        let (state_tx, state_rx) = watch::channel(ListenerState::Connecting);
        let (revoke_tx, revoke_rx) = watch::channel(false);
        let handle = tokio::spawn(supervise(
            key.clone(),
            destination_class.to_string(),
            ctx,
            state_tx,
            revoke_rx,
        ));
        Self {
            key,
            destination_class: destination_class.to_string(),
            state: state_rx,
            revoke: revoke_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn key(&self) -> &ListenerKey {
        &self.key
    }

    pub fn destination_class(&self) -> &str {
        &self.destination_class
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Current state followed by every later transition
    pub fn state_changes(&self) -> WatchStream<ListenerState> {
        WatchStream::new(self.state.clone())
    }

    /// Wait until the listener reaches a state matching `predicate`
    pub async fn wait_for<F>(&self, predicate: F) -> ListenerState
    where
        F: Fn(&ListenerState) -> bool,
    {
        let mut changes = self.state_changes();
        while let Some(state) = changes.next().await {
            if predicate(&state) {
                return state;
            }
        }
        self.state()
    }

    /// Stop the listener and wait for its task to finish
    pub async fn revoke(&self) {
        self.revoke.send_replace(true);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                log_replication_warn!("Listener {} task ended abnormally: {}", self.key, err);
            }
        }
    }
}

impl Drop for UpdateListener {
    fn drop(&mut self) {
        self.revoke.send_replace(true);
    }
}

async fn revoked(revoke: &mut watch::Receiver<bool>) {
    loop {
        if *revoke.borrow() {
            return;
        }
        if revoke.changed().await.is_err() {
            return;
        }
    }
}

async fn supervise(
    key: ListenerKey,
    destination_class: String,
    ctx: Arc<ListenerContext>,
    state: watch::Sender<ListenerState>,
    mut revoke: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::from_config(&ctx.config);
    log_replication_info!("Listener {} started into '{}'", key, destination_class);

    'supervise: loop {
        state.send_replace(ListenerState::Connecting);
        let connected = tokio::select! {
            result = ctx.connect(&key) => Some(result),
            _ = revoked(&mut revoke) => None,
        };
        let Some(connected) = connected else {
            break 'supervise;
        };

        match connected {
            Ok(mut stream) => {
                state.send_replace(ListenerState::Streaming);
                log_replication_debug!("Listener {} streaming", key);
                loop {
                    let step = tokio::select! {
                        item = stream.next() => Step::Item(item),
                        _ = revoked(&mut revoke) => Step::Revoked,
                    };
                    match step {
                        Step::Revoked => break 'supervise,
                        Step::Item(Some(Ok(event))) => {
                            backoff.reset();
                            if let Err(err) = ctx.materialize(&key, &destination_class, event).await {
                                log_replication_warn!("Listener {} dropped an item: {}", key, err);
                            }
                        }
                        Step::Item(Some(Err(err))) => {
                            log_replication_warn!("Listener {} stream failed: {}", key, err);
                            break;
                        }
                        Step::Item(None) => {
                            log_replication_debug!("Listener {} stream closed by remote", key);
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                log_replication_warn!("Listener {} could not connect: {}", key, err);
            }
        }

        let delay = backoff.next_delay();
        state.send_replace(ListenerState::Backoff {
            attempt: backoff.attempts(),
        });
        log_replication_debug!("Listener {} retrying in {:?}", key, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = revoked(&mut revoke) => break 'supervise,
        }
    }

    state.send_replace(ListenerState::Revoked);
    log_replication_info!("Listener {} revoked", key);
}
