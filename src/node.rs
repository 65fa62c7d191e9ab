use crate::api::{CredentialProvider, DataApi, LocalDataApi, RemoteNodes};
use crate::config::NodeConfig;
use crate::db_operations::{RelationalBackend, SqliteBackend};
use crate::error::{PodError, PodResult};
use crate::pubsub::PubSub;
use crate::replication::{ListenerContext, ReplicationManager, ReplicationService, StreamConnector};
use crate::schema::{SchemaValidator, ServiceSchema};
use crate::store::{CacheStore, CacheSweeper, DataStore, StoreRouter};
use crate::{log_store_info, log_store_warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One pod: storage, local Data API, replication, and the cache sweeper for
/// a single service.
///
/// Members can join before or after [`PodNode::start`]; replication for a
/// member runs only while the node is started.
pub struct PodNode {
    config: NodeConfig,
    pubsub: Arc<PubSub>,
    router: Arc<StoreRouter>,
    api: Arc<LocalDataApi>,
    service: Arc<ReplicationService>,
    replication: Arc<ReplicationManager>,
    sweeper: Arc<CacheSweeper>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PodNode {
    /// Create a node from configuration and its network collaborators
    pub fn new(
        config: NodeConfig,
        remotes: Arc<dyn RemoteNodes>,
        connector: Arc<dyn StreamConnector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> PodResult<Self> {
        config.validate()?;
        let backend: Arc<dyn RelationalBackend> = if config.database.in_memory {
            Arc::new(SqliteBackend::open_in_memory()?)
        } else {
            Arc::new(SqliteBackend::open(config.database.resolved_path())?)
        };
        Ok(Self::with_backend(config, backend, remotes, connector, credentials))
    }

    /// Create a node over an already opened backend
    pub fn with_backend(
        config: NodeConfig,
        backend: Arc<dyn RelationalBackend>,
        remotes: Arc<dyn RemoteNodes>,
        connector: Arc<dyn StreamConnector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let enforce = config.database.enforce_unique_cursor;
        let pubsub = Arc::new(PubSub::new(&config.pubsub));
        let data = Arc::new(DataStore::new(Arc::clone(&backend), Arc::clone(&pubsub), enforce));
        let cache = Arc::new(CacheStore::new(
            backend,
            Arc::clone(&pubsub),
            enforce,
            config.cache.clone(),
        ));
        let router = Arc::new(StoreRouter::new(data, Arc::clone(&cache)));
        let api = Arc::new(LocalDataApi::new(&config.service_id, Arc::clone(&router)));
        let service = Arc::new(ReplicationService::new(
            &config.service_id,
            Arc::clone(&router),
            Arc::clone(&pubsub),
        ));
        let ctx = Arc::new(ListenerContext {
            service_id: config.service_id.clone(),
            local: Arc::clone(&api),
            connector,
            credentials: Arc::clone(&credentials),
            config: config.replication.clone(),
        });
        let replication = Arc::new(ReplicationManager::new(
            Arc::clone(&router),
            Arc::clone(&pubsub),
            ctx,
        ));
        let sweeper = Arc::new(CacheSweeper::new(cache, remotes, credentials));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            pubsub,
            router,
            api,
            service,
            replication,
            sweeper,
            running: AtomicBool::new(false),
            shutdown,
            sweeper_handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn node_id(&self) -> Uuid {
        self.config.node_id
    }

    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.pubsub
    }

    pub fn router(&self) -> &Arc<StoreRouter> {
        &self.router
    }

    pub fn local_api(&self) -> &Arc<LocalDataApi> {
        &self.api
    }

    /// The Data API this node fronts, as remote nodes see it
    pub fn data_api(&self) -> Arc<dyn DataApi> {
        Arc::clone(&self.api) as Arc<dyn DataApi>
    }

    pub fn replication_service(&self) -> &Arc<ReplicationService> {
        &self.service
    }

    pub fn replication(&self) -> &Arc<ReplicationManager> {
        &self.replication
    }

    pub fn sweeper(&self) -> &Arc<CacheSweeper> {
        &self.sweeper
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Validate the member's schema, set up its tables, and start its
    /// replication when the node is running
    pub async fn join_member(&self, member_id: Uuid, schema: ServiceSchema) -> PodResult<()> {
        let schema = schema.finalize();
        if schema.service_id != self.config.service_id {
            return Err(PodError::validation(format!(
                "Schema for service '{}' offered to node serving '{}'",
                schema.service_id, self.config.service_id
            )));
        }
        SchemaValidator::validate(&schema)?;
        self.router.setup_member(member_id, Arc::new(schema)).await?;
        if self.is_running() {
            self.replication.start_member(member_id).await?;
        }
        log_store_info!("Member {} joined service '{}'", member_id, self.config.service_id);
        Ok(())
    }

    /// Stop the member's replication and drop its tables
    pub async fn leave_member(&self, member_id: &Uuid) -> PodResult<()> {
        self.replication.stop_member(member_id).await;
        self.router.teardown_member(member_id).await
    }

    /// Start replication for every joined member and the cache sweeper
    pub async fn start(&self) -> PodResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.send_replace(false);
        for member_id in self.router.members() {
            if let Err(err) = self.replication.start_member(member_id).await {
                log_store_warn!("Replication for member {} did not start: {}", member_id, err);
            }
        }
        let handle = Arc::clone(&self.sweeper).spawn(self.shutdown.subscribe());
        *self
            .sweeper_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        log_store_info!("Node {} started", self.config.node_id);
        Ok(())
    }

    /// Stop the sweeper and every replication task
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        let handle = self
            .sweeper_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                log_store_warn!("Cache sweeper ended abnormally: {}", err);
            }
        }
        self.replication.shutdown().await;
        log_store_info!("Node {} stopped", self.config.node_id);
    }
}
