//! # Logging
//!
//! `env_logger` console output for the `log` facade, with a default level
//! and per-feature overrides (see [`features::LogFeature`]).

pub mod features;

pub use features::LogFeature;

use env_logger::{Builder, Target};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Logging configuration, embedded in the node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default log level for all modules
    #[serde(default = "default_level")]
    pub default_level: String,
    /// Feature-specific log levels
    #[serde(default)]
    pub features: HashMap<LogFeature, String>,
    /// Include timestamps
    #[serde(default = "default_true")]
    pub include_timestamp: bool,
}

fn default_level() -> String {
    "INFO".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: default_level(),
            features: HashMap::new(),
            include_timestamp: true,
        }
    }
}

/// Logging system errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logging system already initialized")]
    AlreadyInitialized,
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
}

fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    LevelFilter::from_str(level).map_err(|_| LoggingError::InvalidLevel(level.to_string()))
}

/// Builds the console logger: `default_level` for everything, overridden
/// per feature on the feature's target.
pub fn builder(config: &LogConfig) -> Result<Builder, LoggingError> {
    let mut builder = Builder::new();
    builder
        .target(Target::Stderr)
        .filter_level(parse_level(&config.default_level)?);
    for (feature, level) in &config.features {
        builder.filter_module(feature.target(), parse_level(level)?);
    }
    if config.include_timestamp {
        builder.format_timestamp_millis();
    } else {
        builder.format_timestamp(None);
    }
    Ok(builder)
}

/// Installs the process-wide logger.
pub struct LoggingSystem;

impl LoggingSystem {
    /// Initialize the logging system with default configuration
    pub fn init_default() -> Result<(), LoggingError> {
        Self::init(&LogConfig::default())
    }

    /// Initialize the logging system with a custom configuration
    pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
        builder(config)?
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, Log, Metadata};

    #[test]
    fn feature_levels_override_default() {
        let mut config = LogConfig {
            default_level: "WARN".to_string(),
            ..LogConfig::default()
        };
        config.features.insert(LogFeature::Network, "DEBUG".to_string());
        config.features.insert(LogFeature::Node, "ERROR".to_string());
        let logger = builder(&config).unwrap().build();
        let at = |level, target| {
            logger.enabled(&Metadata::builder().level(level).target(target).build())
        };

        assert!(at(Level::Debug, "pear::network"));
        assert!(!at(Level::Debug, "pear::repo"));
        assert!(at(Level::Warn, "pear::repo"));
        assert!(!at(Level::Warn, "pear::node"));
        assert!(at(Level::Error, "pear::node"));
        assert_eq!(logger.filter(), LevelFilter::Debug);
    }

    #[test]
    fn rejects_unknown_levels() {
        let mut config = LogConfig::default();
        config.features.insert(LogFeature::Inbox, "LOUD".to_string());
        assert!(matches!(builder(&config), Err(LoggingError::InvalidLevel(level)) if level == "LOUD"));
    }

    #[test]
    fn config_parses_feature_map() {
        let config: LogConfig = serde_json::from_str(
            r#"{"default_level": "WARN", "features": {"permissions": "DEBUG"}}"#,
        )
        .unwrap();
        assert_eq!(config.features[&LogFeature::Permissions], "DEBUG");
        assert!(config.include_timestamp);
        assert!(parse_level("bogus").is_err());
    }
}
