//! # Datapod
//!
//! Storage and replication core of a federated personal-data pod.
//!
//! ## Core Components
//!
//! * `schema` - Data classes, cache policies and listen relations
//! * `filter` - Typed predicates evaluated in memory and compiled to SQL
//! * `table` - Object and array tables over a relational backend
//! * `store` - Durable and cache stores, the router between them, and the cache sweeper
//! * `pubsub` - Local fan-out of store mutations
//! * `api` - The Data API every node fronts and calls
//! * `replication` - Trust-link discovery, update listeners and feed promotion
//! * `node` - A pod node wiring all of the above together
//!
//! ## Architecture
//!
//! Each member joined to a service gets its own set of tables, one per data
//! class. Cache-only classes hold rows copied from other pods; every row
//! remembers its origin so a periodic sweep can re-confirm it with that
//! origin, and a TTL bounds how stale it can get. Replication listens to
//! remote classes named by the member's trust links and writes what arrives
//! through the local Data API.

pub mod api;
pub mod config;
pub mod constants;
pub mod db_operations;
pub mod error;
pub mod filter;
pub mod logging;
pub mod node;
pub mod pubsub;
pub mod replication;
pub mod schema;
pub mod store;
pub mod table;

// Re-export main types for convenience
pub use api::{ApiAction, ApiRequest, ApiResponse, DataApi, Edge, LocalDataApi, RemoteNodes};
pub use config::NodeConfig;
pub use error::{PodError, PodResult};
pub use filter::{FilterOperator, FilterPredicate, FilterSet, FilterValue};
pub use logging::{LogConfig, LoggingSystem};
pub use node::PodNode;
pub use pubsub::{PubSub, StoreAction, StoreEvent};
pub use replication::{ReplicationManager, ReplicationService, StreamConnector};
pub use schema::{load_schema_from_file, load_schema_from_str, DataClass, ServiceSchema};
pub use store::{CacheStore, DataStore, StoreRouter};
pub use table::{Origin, OriginKind, Selector};
