//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use smq_runtime::ClientConfig;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix of environment variables overriding file configuration
pub const ENV_PREFIX: &str = "SMQ";

/// Configuration files consulted in order, later ones overriding earlier ones
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["/etc/smq/smq", "config/smq"];

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Queue client settings
    pub client: ClientConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from the default files, an optional explicit file
    /// and `SMQ__`-prefixed environment variables.
    ///
    /// Absent default files are skipped. An explicit file must exist.
    pub fn load(explicit_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        for path in DEFAULT_CONFIG_FILES {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        if let Some(path) = explicit_path.filter(|path| !path.is_empty()) {
            info!(path = %path, "Loading configuration from explicit path");
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let service_config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        service_config.validate()?;
        Ok(service_config)
    }

    /// Check values that serde cannot constrain
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.client.validate()?;
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,

    /// Enable CORS
    pub enable_cors: bool,

    /// Longest long-poll wait a receive request may ask for
    pub max_wait_seconds: u64,

    /// Pause between receive attempts while long polling
    pub long_poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024,
            enable_cors: true,
            max_wait_seconds: 20,
            long_poll_interval_ms: 100,
        }
    }
}

impl ServerConfig {
    /// Socket address string to bind to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "server.host".to_string(),
            });
        }
        if self.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be greater than zero".to_string(),
            });
        }
        if self.long_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "server.long_poll_interval_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level or `EnvFilter` directive
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}
