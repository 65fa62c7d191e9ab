//! Node configuration
//!
//! A pod node is configured from a single TOML document. Every section has
//! defaults, so an empty document plus a `service_id` is a valid config.

use crate::constants::*;
use crate::error::{PodError, PodResult};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Configuration for a pod node instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Identity of this node, used as the origin of locally produced rows
    #[serde(default = "Uuid::new_v4")]
    pub node_id: Uuid,
    /// Service whose schema this node serves
    pub service_id: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Relational storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Database file; defaults to the platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Keep everything in memory (tests, ephemeral nodes)
    #[serde(default)]
    pub in_memory: bool,
    /// Create a UNIQUE index on the cursor column so duplicate appends fail
    #[serde(default)]
    pub enforce_unique_cursor: bool,
}

impl DatabaseConfig {
    /// Resolved on-disk location of the database file
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("datapod")
                .join("pod.db")
        })
    }
}

/// Cache sweep settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_refresh_horizon")]
    pub refresh_horizon_secs: u64,
    #[serde(default = "default_expire_horizon")]
    pub expire_horizon_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_refresh_horizon() -> u64 {
    DEFAULT_REFRESH_HORIZON_SECS
}

fn default_expire_horizon() -> u64 {
    DEFAULT_EXPIRE_HORIZON_SECS
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_horizon_secs: DEFAULT_REFRESH_HORIZON_SECS,
            expire_horizon_secs: DEFAULT_EXPIRE_HORIZON_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Replication listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationConfig {
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

fn default_backoff_base() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}

fn default_backoff_max() -> u64 {
    DEFAULT_BACKOFF_MAX_MS
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl ReplicationConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Local broadcast settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PubSubConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_dedup_window() -> usize {
    DEFAULT_DEDUP_WINDOW
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

impl NodeConfig {
    /// Create a new node configuration for the given service
    pub fn new(service_id: &str) -> Self {
        Self {
            node_id: Uuid::new_v4(),
            service_id: service_id.to_string(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            replication: ReplicationConfig::default(),
            pubsub: PubSubConfig::default(),
            logging: LogConfig::default(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> PodResult<Self> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> PodResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Use an in-memory database
    pub fn with_in_memory_database(mut self) -> Self {
        self.database.in_memory = true;
        self
    }

    /// Set the database file path
    pub fn with_database_path(mut self, path: PathBuf) -> Self {
        self.database.path = Some(path);
        self.database.in_memory = false;
        self
    }

    /// Set the node identity
    pub fn with_node_id(mut self, node_id: Uuid) -> Self {
        self.node_id = node_id;
        self
    }

    /// Set reconnect backoff bounds in milliseconds
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.replication.backoff_base_ms = base_ms;
        self.replication.backoff_max_ms = max_ms;
        self
    }

    /// Set the cache sweep interval in seconds
    pub fn with_sweep_interval(mut self, secs: u64) -> Self {
        self.cache.sweep_interval_secs = secs;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> PodResult<()> {
        if self.service_id.trim().is_empty() {
            return Err(PodError::Config("service_id must not be empty".to_string()));
        }
        if self.replication.backoff_base_ms == 0 {
            return Err(PodError::Config(
                "backoff_base_ms must be greater than 0".to_string(),
            ));
        }
        if self.replication.backoff_base_ms > self.replication.backoff_max_ms {
            return Err(PodError::Config(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.replication.backoff_base_ms, self.replication.backoff_max_ms
            )));
        }
        if self.pubsub.channel_capacity == 0 || self.pubsub.dedup_window == 0 {
            return Err(PodError::Config(
                "pubsub capacities must be greater than 0".to_string(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(PodError::Config(
                "sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        self.logging
            .validate()
            .map_err(|e| PodError::Config(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("service_id = \"social\"").unwrap();
        assert_eq!(config.service_id, "social");
        assert_eq!(config.cache.refresh_horizon_secs, DEFAULT_REFRESH_HORIZON_SECS);
        assert_eq!(config.cache.expire_horizon_secs, DEFAULT_EXPIRE_HORIZON_SECS);
        assert_eq!(config.replication.backoff_base_ms, DEFAULT_BACKOFF_BASE_MS);
        assert!(!config.database.enforce_unique_cursor);
    }

    #[test]
    fn test_sections_override_defaults() {
        let toml = r#"
            service_id = "social"
            node_id = "6f1c2f2e-8a6b-4c55-9a52-1c1f0b7c4d11"

            [database]
            in_memory = true
            enforce_unique_cursor = true

            [replication]
            backoff_base_ms = 100
            backoff_max_ms = 1000
        "#;
        let config = NodeConfig::from_toml_str(toml).unwrap();
        assert!(config.database.in_memory);
        assert!(config.database.enforce_unique_cursor);
        assert_eq!(config.replication.backoff_max(), Duration::from_secs(1));
        assert_eq!(
            config.node_id.to_string(),
            "6f1c2f2e-8a6b-4c55-9a52-1c1f0b7c4d11"
        );
    }

    #[test]
    fn test_invalid_backoff_rejected() {
        let config = NodeConfig::new("social").with_backoff(5000, 100);
        assert!(matches!(config.validate(), Err(PodError::Config(_))));
    }

    #[test]
    fn test_empty_service_rejected() {
        assert!(NodeConfig::from_toml_str("service_id = \"  \"").is_err());
    }

    #[test]
    fn test_resolved_path_prefers_explicit() {
        let config = NodeConfig::new("social").with_database_path(PathBuf::from("/tmp/x.db"));
        assert_eq!(config.database.resolved_path(), PathBuf::from("/tmp/x.db"));
    }
}
