//! In-process network joining several nodes, for tests and demos.

use super::service::ReplicationService;
use super::transport::{EventStream, StreamConnector, StreamKey};
use crate::api::{Credential, DataApi, RemoteNodes};
use crate::error::{PodError, PodResult};
use crate::log_replication_debug;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use uuid::Uuid;

struct LoopbackPeer {
    api: Arc<dyn DataApi>,
    service: Arc<ReplicationService>,
    online: bool,
    /// Bumped to cut every open stream of the peer
    epoch: watch::Sender<u64>,
}

/// Routes Data API calls and stream requests to nodes registered by member id.
///
/// Peers can be taken offline to exercise unavailable origins and listener
/// backoff.
#[derive(Default)]
pub struct LoopbackNetwork {
    peers: RwLock<HashMap<String, LoopbackPeer>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `member_id` reachable through the given node
    pub fn register(&self, member_id: Uuid, api: Arc<dyn DataApi>, service: Arc<ReplicationService>) {
        let (epoch, _) = watch::channel(0);
        self.peers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                member_id.to_string(),
                LoopbackPeer {
                    api,
                    service,
                    online: true,
                    epoch,
                },
            );
    }

    pub fn unregister(&self, member_id: &Uuid) {
        let removed = self
            .peers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&member_id.to_string());
        if let Some(peer) = removed {
            peer.epoch.send_modify(|e| *e += 1);
        }
    }

    /// Take a peer offline (cutting its open streams) or bring it back
    pub fn set_online(&self, member_id: &Uuid, online: bool) {
        let mut peers = self
            .peers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(peer) = peers.get_mut(&member_id.to_string()) {
            peer.online = online;
            if !online {
                peer.epoch.send_modify(|e| *e += 1);
            }
        }
    }

    /// Cut every open stream of a peer without taking it offline
    pub fn drop_streams(&self, member_id: &Uuid) {
        let peers = self
            .peers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(peer) = peers.get(&member_id.to_string()) {
            peer.epoch.send_modify(|e| *e += 1);
        }
    }

    fn reachable(&self, remote_id: &str) -> PodResult<(Arc<dyn DataApi>, Arc<ReplicationService>, watch::Receiver<u64>)> {
        let peers = self
            .peers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match peers.get(remote_id) {
            Some(peer) if peer.online => Ok((
                Arc::clone(&peer.api),
                Arc::clone(&peer.service),
                peer.epoch.subscribe(),
            )),
            Some(_) => Err(PodError::origin_unavailable(remote_id, "peer offline")),
            None => Err(PodError::origin_unavailable(remote_id, "unknown peer")),
        }
    }
}

#[async_trait]
impl RemoteNodes for LoopbackNetwork {
    async fn data_api(&self, origin_id: &str) -> PodResult<Arc<dyn DataApi>> {
        self.reachable(origin_id).map(|(api, _, _)| api)
    }
}

#[async_trait]
impl StreamConnector for LoopbackNetwork {
    async fn connect(&self, key: &StreamKey, credential: Credential) -> PodResult<EventStream> {
        let (_, service, mut epoch) = self
            .reachable(&key.remote_id)
            .map_err(|e| PodError::Transport(e.to_string()))?;
        let stream = service.open_stream(key, &credential).await?;
        log_replication_debug!("Loopback stream {} opened", key);

        let cut = async move {
            let _ = epoch.changed().await;
        };
        let reset = stream::once(async { Err(PodError::Transport("connection reset".to_string())) });
        Ok(stream.take_until(cut).chain(reset).boxed())
    }
}
