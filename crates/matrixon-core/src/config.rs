//! Configuration module for Matrixon streams
//!
//! Every field carries a serde default so a partial TOML file (or none at all,
//! with environment overrides only) produces a usable configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server name (e.g., matrixon.local)
    pub server_name: String,

    /// Directory holding the redb database. `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,

    /// Tracing filter directive
    pub log: String,

    /// Scales every LRU cache
    pub cache_capacity_modifier: f64,

    pub sync: SyncConfig,
    pub events: EventsConfig,
    pub state: StateConfig,
    pub consumers: ConsumersConfig,
    pub typing: TypingConfig,
}

/// Long-poll sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Timeout used when a request does not carry one
    pub default_timeout_ms: u64,

    /// Upper bound for a client-supplied timeout
    pub max_timeout_ms: u64,

    /// Number of timeline events per room before a response is limited
    pub timeline_limit: usize,
}

/// Event building limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// At most this many prev events are referenced by a new event
    pub max_prev_events: usize,

    /// At most this many auth events are referenced by a new event
    pub max_auth_events: usize,
}

/// State storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Snapshots with more blocks than this are compacted into one block
    pub max_blocks_per_snapshot: usize,
}

/// Message consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumersConfig {
    /// Delay before an unacknowledged message is redelivered
    pub retry_backoff_ms: u64,

    /// Redeliveries before a message is logged and dropped. Zero = unbounded.
    pub max_redeliveries: u32,
}

/// Typing notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Upper bound on how long a user stays in the typing list
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "matrixon.local".to_owned(),
            database_path: None,
            log: "warn".to_owned(),
            cache_capacity_modifier: 1.0,
            sync: SyncConfig::default(),
            events: EventsConfig::default(),
            state: StateConfig::default(),
            consumers: ConsumersConfig::default(),
            typing: TypingConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_timeout_ms: 120_000,
            timeline_limit: 20,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_prev_events: 20,
            max_auth_events: 10,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_snapshot: 16,
        }
    }
}

impl Default for ConsumersConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 500,
            max_redeliveries: 0,
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl Config {
    /// Check the configuration for values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.server_name.is_empty() {
            return Err(Error::bad_config("server_name must not be empty"));
        }
        if self.cache_capacity_modifier <= 0.0 {
            return Err(Error::bad_config("cache_capacity_modifier must be positive"));
        }
        if self.sync.timeline_limit == 0 {
            return Err(Error::bad_config("sync.timeline_limit must be at least 1"));
        }
        if self.sync.default_timeout_ms > self.sync.max_timeout_ms {
            return Err(Error::bad_config(
                "sync.default_timeout_ms must not exceed sync.max_timeout_ms",
            ));
        }
        if self.events.max_prev_events == 0 || self.events.max_auth_events == 0 {
            return Err(Error::bad_config("event reference limits must be at least 1"));
        }
        if self.state.max_blocks_per_snapshot == 0 {
            return Err(Error::bad_config("state.max_blocks_per_snapshot must be at least 1"));
        }
        Ok(())
    }

    /// Capacity of an LRU cache after applying the configured modifier.
    pub fn cache_capacity(&self, base: usize) -> usize {
        ((base as f64) * self.cache_capacity_modifier).max(1.0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.events.max_prev_events, 20);
        assert_eq!(config.events.max_auth_events, 10);
        assert_eq!(config.state.max_blocks_per_snapshot, 16);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            server_name = "example.org"

            [sync]
            timeline_limit = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.server_name, "example.org");
        assert_eq!(config.sync.timeline_limit, 5);
        assert_eq!(config.sync.max_timeout_ms, 120_000);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.server_name.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.default_timeout_ms = config.sync.max_timeout_ms + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.events.max_auth_events = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_capacity_scaling() {
        let mut config = Config::default();
        config.cache_capacity_modifier = 0.5;
        assert_eq!(config.cache_capacity(1000), 500);
        config.cache_capacity_modifier = 0.0001;
        assert_eq!(config.cache_capacity(10), 1);
    }
}
