//! Store façades over the table engine: durable member data, cached remote
//! data, the router that picks between them, and the cache sweeper.

pub mod cache_store;
pub mod data_store;
pub mod namespace;
pub mod router;
pub mod sweeper;

pub use cache_store::{project_to_class, CacheStore, RefreshReport};
pub use data_store::DataStore;
pub use namespace::{NamespaceStore, WriteOutcome};
pub use router::StoreRouter;
pub use sweeper::{CacheSweeper, SweepReport};
