//! Queue registry: queue metadata and the set of queue names.
//!
//! A queue exists exactly when its attribute hash exists. Creation claims the
//! hash with `HSETNX`, so two racing creators cannot both succeed and an
//! existing queue's attributes are never overwritten.

use crate::error::QueueError;
use crate::keys::KeySpace;
use crate::message::QueueName;
use crate::queue::{QueueAttributes, QueueSettings, QueueSettingsUpdate};
use crate::scripts::{self, next_value, split_status, status, timestamp, unexpected_status};
use crate::store::Store;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Store-backed registry of the queues in one namespace
#[derive(Clone)]
pub struct QueueRegistry {
    store: Arc<dyn Store>,
    keys: KeySpace,
}

impl QueueRegistry {
    pub fn new(store: Arc<dyn Store>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Create a queue; `Ok(false)` when it already exists
    pub async fn create_queue(
        &self,
        name: &QueueName,
        settings: &QueueSettings,
    ) -> Result<bool, QueueError> {
        settings.validate()?;

        let args = [
            Bytes::from(name.to_string()),
            seconds_arg(settings.visibility_timeout),
            seconds_arg(settings.delay),
            Bytes::from(settings.max_size.to_string()),
        ];
        let reply = self
            .store
            .eval(
                &scripts::CREATE_QUEUE,
                &[self.keys.queues(), self.keys.queue(name).attributes],
                &args,
            )
            .await?;

        match split_status(reply)?.0 {
            status::OK => {
                debug!(queue = %name, "Queue created");
                Ok(true)
            }
            status::EXISTS => {
                debug!(queue = %name, "Queue already exists");
                Ok(false)
            }
            code => Err(unexpected_status(&scripts::CREATE_QUEUE, code).into()),
        }
    }

    /// Attribute record plus live message counters
    pub async fn get_attributes(&self, name: &QueueName) -> Result<QueueAttributes, QueueError> {
        let reply = self
            .store
            .eval(&scripts::QUEUE_ATTRIBUTES, &self.keys.queue(name).to_vec(), &[])
            .await?;

        let (code, values) = split_status(reply)?;
        match code {
            status::OK => {}
            status::QUEUE_NOT_FOUND => return Err(queue_not_found(name)),
            code => return Err(unexpected_status(&scripts::QUEUE_ATTRIBUTES, code).into()),
        }

        let mut values = values.into_iter();
        let visibility_timeout = next_value(&mut values, "vt")?.as_i64()?;
        let delay = next_value(&mut values, "delay")?.as_i64()?;
        let max_size = next_value(&mut values, "maxsize")?.as_i64()?;
        let created = timestamp(&next_value(&mut values, "created")?, "created")?;
        let modified = timestamp(&next_value(&mut values, "modified")?, "modified")?;
        let total_sent = next_value(&mut values, "totalsent")?.as_i64()?;
        let total_received = next_value(&mut values, "totalrecv")?.as_i64()?;
        let ready_messages = next_value(&mut values, "ready count")?.as_i64()?;
        let delayed_messages = next_value(&mut values, "delayed count")?.as_i64()?;
        let hidden_messages = next_value(&mut values, "hidden count")?.as_i64()?;

        Ok(QueueAttributes {
            name: name.clone(),
            visibility_timeout,
            delay,
            max_size: non_negative(max_size) as usize,
            created,
            modified,
            total_sent: non_negative(total_sent),
            total_received: non_negative(total_received),
            ready_messages: non_negative(ready_messages),
            delayed_messages: non_negative(delayed_messages),
            hidden_messages: non_negative(hidden_messages),
        })
    }

    /// Update the provided settings and return the refreshed record
    pub async fn set_attributes(
        &self,
        name: &QueueName,
        update: &QueueSettingsUpdate,
    ) -> Result<QueueAttributes, QueueError> {
        update.validate()?;

        let args = [
            update.visibility_timeout.map(seconds_arg).unwrap_or_default(),
            update.delay.map(seconds_arg).unwrap_or_default(),
            update
                .max_size
                .map(|size| Bytes::from(size.to_string()))
                .unwrap_or_default(),
        ];
        let reply = self
            .store
            .eval(
                &scripts::SET_QUEUE_ATTRIBUTES,
                &[self.keys.queue(name).attributes],
                &args,
            )
            .await?;

        match split_status(reply)?.0 {
            status::OK => {
                debug!(queue = %name, "Queue attributes updated");
                self.get_attributes(name).await
            }
            status::QUEUE_NOT_FOUND => Err(queue_not_found(name)),
            code => Err(unexpected_status(&scripts::SET_QUEUE_ATTRIBUTES, code).into()),
        }
    }

    /// Remove the queue with all of its messages; reports whether it existed
    pub async fn delete_queue(&self, name: &QueueName) -> Result<bool, QueueError> {
        let reply = self
            .store
            .eval(
                &scripts::DELETE_QUEUE,
                &self.keys.registry_keys(name),
                &[Bytes::from(name.to_string())],
            )
            .await?;

        let existed = reply.as_i64()? == 1;
        debug!(queue = %name, existed, "Queue deleted");
        Ok(existed)
    }

    /// Names of all queues, sorted
    pub async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        let members = self.store.set_members(&self.keys.queues()).await?;

        let mut names: Vec<QueueName> = members
            .into_iter()
            .filter_map(|member| match QueueName::new(member.clone()) {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(member = %member, error = %e, "Skipping invalid queue name");
                    None
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }
}

pub(crate) fn queue_not_found(name: &QueueName) -> QueueError {
    QueueError::QueueNotFound {
        queue_name: name.to_string(),
    }
}

/// Whole seconds of a validated timeout as a script argument
pub(crate) fn seconds_arg(value: chrono::Duration) -> Bytes {
    Bytes::from(value.num_seconds().to_string())
}

fn non_negative(value: i64) -> u64 {
    value.max(0) as u64
}
