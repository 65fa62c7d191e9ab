//! Feature-specific logging macros and utilities
//!
//! Each subsystem logs under its own target so operators can raise or lower
//! verbosity per feature without touching the rest of the pod.

/// Feature categories for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogFeature {
    Filter,
    Database,
    Store,
    Cache,
    PubSub,
    Replication,
}

impl LogFeature {
    pub const ALL: [LogFeature; 6] = [
        LogFeature::Filter,
        LogFeature::Database,
        LogFeature::Store,
        LogFeature::Cache,
        LogFeature::PubSub,
        LogFeature::Replication,
    ];

    /// Get the target string for this feature
    pub fn target(&self) -> &'static str {
        match self {
            LogFeature::Filter => "datapod::filter",
            LogFeature::Database => "datapod::database",
            LogFeature::Store => "datapod::store",
            LogFeature::Cache => "datapod::cache",
            LogFeature::PubSub => "datapod::pubsub",
            LogFeature::Replication => "datapod::replication",
        }
    }

    /// Name used as the key in `LogConfig.features`
    pub fn name(&self) -> &'static str {
        match self {
            LogFeature::Filter => "filter",
            LogFeature::Database => "database",
            LogFeature::Store => "store",
            LogFeature::Cache => "cache",
            LogFeature::PubSub => "pubsub",
            LogFeature::Replication => "replication",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

// Filter-specific logging macros
#[macro_export]
macro_rules! log_filter_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "datapod::filter", $($arg)*)
    };
}

// Database-specific logging macros
#[macro_export]
macro_rules! log_database_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "datapod::database", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_database_info {
    ($($arg:tt)*) => {
        log::info!(target: "datapod::database", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_database_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "datapod::database", $($arg)*)
    };
}

// Store-specific logging macros
#[macro_export]
macro_rules! log_store_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "datapod::store", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_store_info {
    ($($arg:tt)*) => {
        log::info!(target: "datapod::store", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_store_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "datapod::store", $($arg)*)
    };
}

// Cache-specific logging macros
#[macro_export]
macro_rules! log_cache_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "datapod::cache", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_cache_info {
    ($($arg:tt)*) => {
        log::info!(target: "datapod::cache", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_cache_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "datapod::cache", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_cache_error {
    ($($arg:tt)*) => {
        log::error!(target: "datapod::cache", $($arg)*)
    };
}

// PubSub-specific logging macros
#[macro_export]
macro_rules! log_pubsub_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "datapod::pubsub", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_pubsub_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "datapod::pubsub", $($arg)*)
    };
}

// Replication-specific logging macros
#[macro_export]
macro_rules! log_replication_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "datapod::replication", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_replication_info {
    ($($arg:tt)*) => {
        log::info!(target: "datapod::replication", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_replication_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "datapod::replication", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_replication_error {
    ($($arg:tt)*) => {
        log::error!(target: "datapod::replication", $($arg)*)
    };
}
