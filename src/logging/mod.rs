//! # Logging System
//!
//! Installs an `env_logger` backend for the `log` facade, configured from a
//! [`LogConfig`]: a default level plus per-feature levels applied to the
//! targets listed in [`features::LogFeature`].

pub mod config;
pub mod features;

pub use config::LogConfig;
pub use features::LogFeature;

use once_cell::sync::OnceCell;

/// Global logging configuration instance
static LOGGING_CONFIG: OnceCell<LogConfig> = OnceCell::new();

/// Logging system entry point
pub struct LoggingSystem;

impl LoggingSystem {
    /// Initialize the logging system with default configuration
    pub fn init_default() -> Result<(), LoggingError> {
        Self::init_with_config(LogConfig::default())
    }

    /// Initialize the logging system with a custom configuration
    pub fn init_with_config(config: LogConfig) -> Result<(), LoggingError> {
        config
            .validate()
            .map_err(|e| LoggingError::Config(e.to_string()))?;

        let default_filter =
            config::parse_level(&config.default_level).unwrap_or(log::LevelFilter::Info);

        let mut builder = env_logger::Builder::new();
        builder.filter_level(default_filter);
        for (name, level) in &config.features {
            match (LogFeature::from_name(name), config::parse_level(level)) {
                (Some(feature), Some(filter)) => {
                    builder.filter_module(feature.target(), filter);
                }
                _ => {
                    return Err(LoggingError::Config(format!(
                        "Unknown feature or level: {}={}",
                        name, level
                    )))
                }
            }
        }
        if !config.include_timestamp {
            builder.format_timestamp(None);
        }
        builder.format_module_path(config.include_module);

        LOGGING_CONFIG
            .set(config)
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        builder
            .try_init()
            .map_err(|e| LoggingError::Config(e.to_string()))
    }

    /// Get the global logging configuration
    pub fn get_config() -> Option<LogConfig> {
        LOGGING_CONFIG.get().cloned()
    }
}

/// Logging system errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logging system already initialized")]
    AlreadyInitialized,
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Only one test in the crate initializes logging; the second call must fail.
        let first = LoggingSystem::init_default();
        let second = LoggingSystem::init_default();
        assert!(first.is_ok() || matches!(first, Err(LoggingError::Config(_))));
        assert!(matches!(second, Err(LoggingError::AlreadyInitialized)));
        assert!(LoggingSystem::get_config().is_some());
    }
}
