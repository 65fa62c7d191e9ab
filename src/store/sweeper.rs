use super::cache_store::{CacheStore, RefreshReport};
use crate::api::{CredentialProvider, RemoteNodes};
use crate::{log_cache_debug, log_cache_warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Totals of one sweep over every member and cache class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub refresh: RefreshReport,
    pub expired: usize,
}

/// Periodic refresh-then-expire pass over all cache tables.
///
/// Each row transition commits on its own, so stopping mid-sweep leaves
/// whatever progress was made.
pub struct CacheSweeper {
    cache: Arc<CacheStore>,
    remotes: Arc<dyn RemoteNodes>,
    credentials: Arc<dyn CredentialProvider>,
    interval: Duration,
}

impl CacheSweeper {
    pub fn new(
        cache: Arc<CacheStore>,
        remotes: Arc<dyn RemoteNodes>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let interval = cache.config().sweep_interval();
        Self {
            cache,
            remotes,
            credentials,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for member_id in self.cache.members() {
            for class_name in self.cache.classes(&member_id) {
                match self
                    .cache
                    .refresh_table(
                        &member_id,
                        &class_name,
                        None,
                        self.remotes.as_ref(),
                        self.credentials.as_ref(),
                    )
                    .await
                {
                    Ok(refresh) => report.refresh.merge(refresh),
                    Err(err) => log_cache_warn!(
                        "Refresh of '{}' for member {} failed: {}",
                        class_name,
                        member_id,
                        err
                    ),
                }
                match self.cache.expire_table(&member_id, &class_name, None).await {
                    Ok(expired) => report.expired += expired,
                    Err(err) => log_cache_warn!(
                        "Expire of '{}' for member {} failed: {}",
                        class_name,
                        member_id,
                        err
                    ),
                }
            }
        }
        log_cache_debug!("Sweep finished: {:?}", report);
        report
    }

    /// Run sweeps every interval until `shutdown` flips to true
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            log_cache_debug!("Cache sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
