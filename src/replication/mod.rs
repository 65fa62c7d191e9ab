//! Peer-to-peer replication between pods.
//!
//! For each member, the manager keeps one update listener per (remote
//! member, source class) implied by the member's trust links and the
//! schema's listen rules, recomputing that set at startup and whenever the
//! links class changes. Listeners stage received items into cache classes;
//! feed promoters move items from followed peers onward into feed classes.

pub mod backoff;
pub mod discovery;
pub mod feed;
pub mod listener;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod registry;
pub mod service;
pub mod transport;

pub use backoff::Backoff;
pub use discovery::{desired_listeners, is_followed, load_links, TrustLink};
pub use feed::{FeedPromoter, Promotion};
pub use listener::{ListenerContext, ListenerKey, ListenerState, UpdateListener};
#[cfg(any(test, feature = "mock"))]
pub use mock::LoopbackNetwork;
pub use registry::ListenerRegistry;
pub use service::ReplicationService;
pub use transport::{EventStream, StreamConnector, StreamEvent, StreamKey};

use crate::error::PodResult;
use crate::pubsub::{PubSub, Subscription};
use crate::store::StoreRouter;
use crate::{log_replication_info, log_replication_warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Listener changes made by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub revoked: usize,
}

struct MemberTasks {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct ReplicationManager {
    router: Arc<StoreRouter>,
    pubsub: Arc<PubSub>,
    registry: Arc<ListenerRegistry>,
    members: Mutex<HashMap<Uuid, MemberTasks>>,
}

impl ReplicationManager {
    pub fn new(router: Arc<StoreRouter>, pubsub: Arc<PubSub>, ctx: Arc<ListenerContext>) -> Self {
        Self {
            router,
            pubsub,
            registry: Arc::new(ListenerRegistry::new(ctx)),
            members: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Bring the member's listeners in line with its stored links
    pub async fn sync_member(&self, member_id: &Uuid) -> PodResult<SyncReport> {
        sync_listeners(&self.router, &self.registry, member_id).await
    }

    /// Start replication for a member: initial sync, the links watcher, and
    /// one promoter per listen rule with a feed class
    pub async fn start_member(&self, member_id: Uuid) -> PodResult<()> {
        self.stop_member(&member_id).await;
        let schema = self.router.schema(&member_id)?;
        let (stop, stop_rx) = watch::channel(false);
        let mut handles = Vec::new();

        // Subscribe before the initial pass so link changes are not missed
        let links = self.pubsub.subscribe(&schema.links_class);
        let report = self.sync_member(&member_id).await?;
        log_replication_info!(
            "Member {} replication started: {} listeners",
            member_id,
            report.created
        );
        handles.push(tokio::spawn(watch_links(
            Arc::clone(&self.router),
            Arc::clone(&self.registry),
            member_id,
            links,
            stop_rx.clone(),
        )));

        for rule in schema.listen.iter().filter(|r| r.feed_class.is_some()) {
            let promoter = FeedPromoter::new(member_id, rule.clone(), Arc::clone(&self.router))?;
            let staged = self.pubsub.subscribe(promoter.staging_class());
            let shutdown = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                match promoter.catch_up().await {
                    Ok(promoted) if promoted > 0 => log_replication_info!(
                        "Promoted {} staged items into '{}'",
                        promoted,
                        promoter.feed_class()
                    ),
                    Ok(_) => {}
                    Err(err) => log_replication_warn!(
                        "Catch-up into '{}' failed: {}",
                        promoter.feed_class(),
                        err
                    ),
                }
                promoter.run(staged, shutdown).await;
            }));
        }

        self.members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(member_id, MemberTasks { stop, handles });
        Ok(())
    }

    /// Stop the member's watcher, promoters and listeners
    pub async fn stop_member(&self, member_id: &Uuid) {
        let tasks = self
            .members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(member_id);
        if let Some(tasks) = tasks {
            stop_tasks(tasks).await;
        }
        self.registry.revoke_member(member_id).await;
    }

    pub async fn shutdown(&self) {
        let all: Vec<MemberTasks> = self
            .members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .map(|(_, tasks)| tasks)
            .collect();
        for tasks in all {
            stop_tasks(tasks).await;
        }
        self.registry.shutdown().await;
    }
}

async fn stop_tasks(tasks: MemberTasks) {
    tasks.stop.send_replace(true);
    for handle in tasks.handles {
        if let Err(err) = handle.await {
            log_replication_warn!("Replication task ended abnormally: {}", err);
        }
    }
}

async fn sync_listeners(router: &StoreRouter, registry: &ListenerRegistry, member_id: &Uuid) -> PodResult<SyncReport> {
    let schema = router.schema(member_id)?;
    let links = load_links(router, member_id, &schema).await?;
    let desired = desired_listeners(member_id, &schema, &links);

    let mut report = SyncReport::default();
    for key in registry.member_keys(member_id) {
        if !desired.contains_key(&key) && registry.revoke(&key).await {
            report.revoked += 1;
        }
    }
    for (key, destination) in desired {
        if registry.ensure(key, &destination) {
            report.created += 1;
        }
    }
    Ok(report)
}

async fn watch_links(
    router: Arc<StoreRouter>,
    registry: Arc<ListenerRegistry>,
    member_id: Uuid,
    mut links: Subscription,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = links.recv() => event,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        };
        let Some(event) = event else {
            break;
        };
        if event.member_id != member_id {
            continue;
        }
        match sync_listeners(&router, &registry, &member_id).await {
            Ok(report) if report != SyncReport::default() => log_replication_info!(
                "Links of member {} changed: {} listeners started, {} revoked",
                member_id,
                report.created,
                report.revoked
            ),
            Ok(_) => {}
            Err(err) => log_replication_warn!("Link sync for member {} failed: {}", member_id, err),
        }
    }
}
