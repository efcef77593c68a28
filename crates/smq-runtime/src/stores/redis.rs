//! Redis store implementation.
//!
//! Scripts run through `EVALSHA`; the `redis` crate loads a script with
//! `SCRIPT LOAD` the first time the server reports it missing. Connections are
//! held by a [`ConnectionManager`], which reconnects after a dropped
//! connection.

use crate::config::RedisConfig;
use crate::error::StoreError;
use crate::store::{Script, ScriptValue, Store, StoreKind};
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, instrument};

/// Redis-backed store
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    command_timeout: Duration,
    scripts: Arc<RwLock<HashMap<&'static str, Arc<redis::Script>>>>,
}

impl RedisStore {
    /// Connect to the server named by `config.url`
    #[instrument(skip(config), fields(url = %redacted_url(&config.url)))]
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| StoreError::CommandFailed {
            command: "CONNECT".to_string(),
            message: e.to_string(),
        })?;

        let command_timeout = Duration::from_millis(config.command_timeout_ms);
        let connection = tokio::time::timeout(command_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Unavailable {
                message: format!(
                    "timed out connecting to Redis after {}ms",
                    config.command_timeout_ms
                ),
            })?
            .map_err(map_redis_error("CONNECT"))?;

        debug!("Connected to Redis");
        Ok(Self {
            connection,
            command_timeout,
            scripts: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn prepared(&self, script: &Script) -> Arc<redis::Script> {
        if let Ok(scripts) = self.scripts.read() {
            if let Some(prepared) = scripts.get(script.name()) {
                return Arc::clone(prepared);
            }
        }

        let prepared = Arc::new(redis::Script::new(script.lua()));
        if let Ok(mut scripts) = self.scripts.write() {
            scripts.insert(script.name(), Arc::clone(&prepared));
        }
        prepared
    }

    async fn bounded<T>(
        &self,
        command: &'static str,
        operation: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.command_timeout, operation)
            .await
            .map_err(|_| StoreError::Unavailable {
                message: format!(
                    "{} timed out after {}ms",
                    command,
                    self.command_timeout.as_millis()
                ),
            })?
            .map_err(map_redis_error(command))
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn eval(
        &self,
        script: &Script,
        keys: &[String],
        args: &[Bytes],
    ) -> Result<ScriptValue, StoreError> {
        let prepared = self.prepared(script);
        let mut invocation = prepared.prepare_invoke();
        for key in keys {
            invocation.key(key.as_str());
        }
        for arg in args {
            invocation.arg(arg.as_ref());
        }

        let mut connection = self.connection.clone();
        let reply: redis::Value = self
            .bounded("EVALSHA", invocation.invoke_async(&mut connection))
            .await?;
        convert_value(reply)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut connection = self.connection.clone();
        let mut command = redis::cmd("SMEMBERS");
        command.arg(key);
        self.bounded("SMEMBERS", command.query_async(&mut connection))
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let command = redis::cmd("PING");
        let _: String = self
            .bounded("PING", command.query_async(&mut connection))
            .await?;
        Ok(())
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Redis
    }
}

/// Translate a Redis reply into the common script reply shape
pub(crate) fn convert_value(value: redis::Value) -> Result<ScriptValue, StoreError> {
    match value {
        redis::Value::Nil => Ok(ScriptValue::Nil),
        redis::Value::Int(value) => Ok(ScriptValue::Int(value)),
        redis::Value::BulkString(data) => Ok(ScriptValue::Data(Bytes::from(data))),
        redis::Value::SimpleString(text) => Ok(ScriptValue::text(text)),
        redis::Value::Okay => Ok(ScriptValue::text("OK")),
        redis::Value::Array(items) => items
            .into_iter()
            .map(convert_value)
            .collect::<Result<Vec<_>, _>>()
            .map(ScriptValue::Array),
        other => Err(StoreError::unexpected(format!(
            "unsupported Redis reply: {:?}",
            other
        ))),
    }
}

fn map_redis_error(command: &'static str) -> impl Fn(redis::RedisError) -> StoreError {
    move |error| {
        if error.is_io_error()
            || error.is_connection_dropped()
            || error.is_connection_refusal()
            || error.is_timeout()
        {
            StoreError::Unavailable {
                message: error.to_string(),
            }
        } else {
            StoreError::CommandFailed {
                command: command.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// URL with any password replaced, for logging
pub(crate) fn redacted_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            if credentials.contains(':') {
                format!("{}://{}:***@{}", scheme, user, host)
            } else {
                format!("{}://{}@{}", scheme, user, host)
            }
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
#[path = "redis_tests.rs"]
mod tests;
