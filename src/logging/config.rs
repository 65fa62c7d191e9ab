//! Configuration management for the logging system
//!
//! Loads logging configuration from TOML, with environment variable overrides
//! for the default level and per-feature levels.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const VALID_LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Main logging configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Default log level for all modules
    #[serde(default = "default_level")]
    pub default_level: String,
    /// Emit timestamps on console output
    #[serde(default = "default_true")]
    pub include_timestamp: bool,
    /// Emit the log target (module path) on console output
    #[serde(default = "default_true")]
    pub include_module: bool,
    /// Feature-specific log levels, keyed by feature name
    #[serde(default = "LogConfig::default_features")]
    pub features: HashMap<String, String>,
}

fn default_level() -> String {
    "INFO".to_string()
}

fn default_true() -> bool {
    true
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Invalid log level for feature {0}: {1}")]
    InvalidFeatureLevel(String, String),
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: default_level(),
            include_timestamp: true,
            include_module: true,
            features: Self::default_features(),
        }
    }
}

impl LogConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;

        let mut config: LogConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        // Apply environment variable overrides
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("DATAPOD_LOG_LEVEL") {
            self.default_level = level.to_uppercase();
        }

        for (key, value) in std::env::vars() {
            if let Some(feature) = key.strip_prefix("DATAPOD_LOG_FEATURE_") {
                self.features
                    .insert(feature.to_lowercase(), value.to_uppercase());
            }
        }
    }

    /// Get default feature-specific log levels
    fn default_features() -> HashMap<String, String> {
        let mut features = HashMap::new();
        features.insert("filter".to_string(), "INFO".to_string());
        features.insert("database".to_string(), "WARN".to_string());
        features.insert("store".to_string(), "INFO".to_string());
        features.insert("cache".to_string(), "INFO".to_string());
        features.insert("pubsub".to_string(), "INFO".to_string());
        features.insert("replication".to_string(), "INFO".to_string());
        features
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LEVELS.contains(&self.default_level.as_str()) {
            return Err(ConfigError::InvalidLevel(self.default_level.clone()));
        }

        for (feature, level) in &self.features {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(ConfigError::InvalidFeatureLevel(
                    feature.clone(),
                    level.clone(),
                ));
            }
        }

        Ok(())
    }
}

/// Parse an upper-case level name into a `log` filter.
pub fn parse_level(level: &str) -> Option<log::LevelFilter> {
    match level {
        "TRACE" => Some(log::LevelFilter::Trace),
        "DEBUG" => Some(log::LevelFilter::Debug),
        "INFO" => Some(log::LevelFilter::Info),
        "WARN" => Some(log::LevelFilter::Warn),
        "ERROR" => Some(log::LevelFilter::Error),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LogConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.features.get("replication").map(String::as_str), Some("INFO"));
    }

    #[test]
    fn test_invalid_feature_level_rejected() {
        let mut config = LogConfig::default();
        config
            .features
            .insert("cache".to_string(), "LOUD".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFeatureLevel(_, _))
        ));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: LogConfig = toml::from_str("default_level = \"DEBUG\"").unwrap();
        assert_eq!(config.default_level, "DEBUG");
        assert!(config.include_timestamp);
        assert!(config.features.contains_key("store"));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("WARN"), Some(log::LevelFilter::Warn));
        assert_eq!(parse_level("warn"), None);
    }
}
