//! Store selection and client configuration.

use crate::error::ConfigurationError;
use crate::message::Namespace;
use serde::{Deserialize, Serialize};

/// Configuration for queue client initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Key prefix isolating this client's queues
    pub namespace: String,

    /// Backing store selection
    pub store: StoreConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: Namespace::DEFAULT.to_string(),
            store: StoreConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Client on the in-memory store with the default namespace
    pub fn in_memory() -> Self {
        Self {
            store: StoreConfig::InMemory,
            ..Self::default()
        }
    }

    /// Validated namespace
    pub fn namespace(&self) -> Result<Namespace, ConfigurationError> {
        Namespace::new(self.namespace.clone()).map_err(|e| ConfigurationError::Invalid {
            message: format!("namespace '{}': {}", self.namespace, e),
        })
    }

    /// Check the whole configuration before any connection is attempted
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.namespace()?;
        if let StoreConfig::Redis(redis) = &self.store {
            redis.validate()?;
        }
        Ok(())
    }
}

/// Backing store selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    Redis(RedisConfig),
    InMemory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Redis(RedisConfig::default())
    }
}

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL, `redis://[user:password@]host:port[/db]`
    pub url: String,

    /// Upper bound on a single store round trip, in milliseconds
    pub command_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            command_timeout_ms: 5_000,
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.url.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "store.url".to_string(),
            });
        }
        if !(self.url.starts_with("redis://")
            || self.url.starts_with("rediss://")
            || self.url.starts_with("redis+unix://")
            || self.url.starts_with("unix://"))
        {
            return Err(ConfigurationError::Invalid {
                message: format!("unsupported Redis URL scheme in '{}'", self.url),
            });
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "store.command_timeout_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
