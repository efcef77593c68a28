//! Message store: the atomic message lifecycle of a queue.
//!
//! Every operation is one script run by the store, so the sequence
//! allocation, the ready and hidden indexes, the message record and the queue
//! counters always change together. Each script also checks that the queue
//! exists as part of the same atomic step.
//!
//! A message is in exactly one of the two indexes while it exists:
//!
//! - `ready`, scored by the time it becomes claimable (`sent + delay`)
//! - `hidden`, scored by the deadline of its current claim
//!
//! Claims first move every hidden message whose deadline passed back to the
//! ready index under its original ready time, then take the lowest-scored
//! ready message. Ids order ties by sequence number.

use crate::error::{QueueError, StoreError};
use crate::keys::KeySpace;
use crate::message::{MessageId, QueueName, ReceivedMessage, Timestamp};
use crate::queue::validate_timeout;
use crate::registry::{queue_not_found, seconds_arg};
use crate::scripts::{self, next_value, split_status, status, timestamp, unexpected_status};
use crate::store::{ScriptValue, Store};
use bytes::Bytes;
use chrono::Duration;
use std::sync::Arc;

#[cfg(test)]
#[path = "message_store_tests.rs"]
mod tests;

/// Store-backed message operations for the queues of one namespace
#[derive(Clone)]
pub struct MessageStore {
    store: Arc<dyn Store>,
    keys: KeySpace,
}

impl MessageStore {
    pub fn new(store: Arc<dyn Store>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Store a new message and return its id.
    ///
    /// `delay` overrides the queue's default delay.
    pub async fn enqueue(
        &self,
        queue: &QueueName,
        body: Bytes,
        delay: Option<Duration>,
    ) -> Result<MessageId, QueueError> {
        if let Some(delay) = delay {
            validate_timeout("delay", delay)?;
        }

        let suffix = MessageId::generate_suffix();
        let size = body.len();
        let args = [
            Bytes::from(queue.to_string()),
            Bytes::from(suffix.clone()),
            body,
            delay.map(seconds_arg).unwrap_or_default(),
        ];
        let reply = self
            .store
            .eval(&scripts::SEND_MESSAGE, &self.keys.queue(queue).to_vec(), &args)
            .await?;

        let (code, values) = split_status(reply)?;
        let mut values = values.into_iter();
        match code {
            status::OK => {
                let sequence = next_value(&mut values, "sequence")?.as_i64()?;
                let sequence = u64::try_from(sequence)
                    .map_err(|_| StoreError::unexpected(format!("negative sequence {}", sequence)))?;
                Ok(MessageId::new(queue.clone(), sequence, suffix))
            }
            status::TOO_LARGE => {
                let max_size = next_value(&mut values, "maxsize")?.as_i64()?;
                Err(QueueError::MessageTooLarge {
                    size,
                    max_size: max_size.max(0) as usize,
                })
            }
            status::QUEUE_NOT_FOUND => Err(queue_not_found(queue)),
            code => Err(unexpected_status(&scripts::SEND_MESSAGE, code).into()),
        }
    }

    /// Claim the next ready message and hide it for `visibility_timeout`
    /// (the queue default when `None`). `Ok(None)` when nothing is ready.
    pub async fn claim_ready(
        &self,
        queue: &QueueName,
        visibility_timeout: Option<Duration>,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        if let Some(timeout) = visibility_timeout {
            validate_timeout("visibility_timeout", timeout)?;
        }

        let args = [
            visibility_timeout.map(seconds_arg).unwrap_or_default(),
            Bytes::new(),
        ];
        self.claim(queue, &args).await
    }

    /// Claim the next ready message and delete it in the same step
    pub async fn pop_ready(&self, queue: &QueueName) -> Result<Option<ReceivedMessage>, QueueError> {
        let args = [Bytes::new(), Bytes::from_static(scripts::POP_FLAG.as_bytes())];
        self.claim(queue, &args).await
    }

    async fn claim(
        &self,
        queue: &QueueName,
        args: &[Bytes],
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let reply = self
            .store
            .eval(&scripts::RECEIVE_MESSAGE, &self.keys.queue(queue).to_vec(), args)
            .await?;

        let (code, values) = split_status(reply)?;
        match code {
            status::OK => Ok(Some(decode_received(values)?)),
            status::EMPTY => Ok(None),
            status::QUEUE_NOT_FOUND => Err(queue_not_found(queue)),
            code => Err(unexpected_status(&scripts::RECEIVE_MESSAGE, code).into()),
        }
    }

    /// Return every hidden message whose deadline passed to the ready index.
    ///
    /// Claims run this pass themselves; calling it directly only makes the
    /// counters of [`get_attributes`](crate::registry::QueueRegistry::get_attributes)
    /// settle earlier. Returns the number of messages released.
    pub async fn release_expired_hidden(&self, queue: &QueueName) -> Result<u64, QueueError> {
        let reply = self
            .store
            .eval(&scripts::RELEASE_EXPIRED, &self.keys.queue(queue).to_vec(), &[])
            .await?;

        let (code, values) = split_status(reply)?;
        match code {
            status::OK => {
                let released = next_value(&mut values.into_iter(), "released count")?.as_i64()?;
                Ok(released.max(0) as u64)
            }
            status::QUEUE_NOT_FOUND => Err(queue_not_found(queue)),
            code => Err(unexpected_status(&scripts::RELEASE_EXPIRED, code).into()),
        }
    }

    /// Delete a message in any state
    pub async fn remove(&self, queue: &QueueName, id: &MessageId) -> Result<(), QueueError> {
        let reply = self
            .store
            .eval(
                &scripts::DELETE_MESSAGE,
                &self.keys.queue(queue).to_vec(),
                &[Bytes::from(id.to_string())],
            )
            .await?;

        match split_status(reply)?.0 {
            status::OK => Ok(()),
            status::MESSAGE_NOT_FOUND => Err(message_not_found(id)),
            status::QUEUE_NOT_FOUND => Err(queue_not_found(queue)),
            code => Err(unexpected_status(&scripts::DELETE_MESSAGE, code).into()),
        }
    }

    /// Move the deadline of a hidden message to `now + timeout` and return it
    pub async fn extend_visibility(
        &self,
        queue: &QueueName,
        id: &MessageId,
        timeout: Duration,
    ) -> Result<Timestamp, QueueError> {
        validate_timeout("visibility_timeout", timeout)?;

        let reply = self
            .store
            .eval(
                &scripts::CHANGE_VISIBILITY,
                &self.keys.queue(queue).to_vec(),
                &[Bytes::from(id.to_string()), seconds_arg(timeout)],
            )
            .await?;

        let (code, values) = split_status(reply)?;
        match code {
            status::OK => {
                let deadline = next_value(&mut values.into_iter(), "deadline")?;
                Ok(timestamp(&deadline, "deadline")?)
            }
            status::MESSAGE_NOT_FOUND => Err(message_not_found(id)),
            status::QUEUE_NOT_FOUND => Err(queue_not_found(queue)),
            code => Err(unexpected_status(&scripts::CHANGE_VISIBILITY, code).into()),
        }
    }
}

fn message_not_found(id: &MessageId) -> QueueError {
    QueueError::MessageNotFound {
        message_id: id.to_string(),
    }
}

/// Decode `[id, body, rc, fr, sent, hidden_until, now]`
fn decode_received(values: Vec<ScriptValue>) -> Result<ReceivedMessage, StoreError> {
    let mut values = values.into_iter();

    let id = next_value(&mut values, "id")?.into_string()?;
    let id: MessageId = id
        .parse()
        .map_err(|e| StoreError::unexpected(format!("malformed message id '{}': {}", id, e)))?;
    let body = match next_value(&mut values, "body")? {
        ScriptValue::Nil => Bytes::new(),
        value => value.into_bytes()?,
    };
    let receive_count = next_value(&mut values, "receive count")?.as_i64()?;
    let first_received = timestamp(&next_value(&mut values, "first received")?, "first received")?;
    let sent = timestamp(&next_value(&mut values, "sent")?, "sent")?;
    let hidden_until = next_value(&mut values, "hidden until")?;
    let hidden_until = if hidden_until.as_i64()? < 0 {
        None
    } else {
        Some(timestamp(&hidden_until, "hidden until")?)
    };
    let received = timestamp(&next_value(&mut values, "store time")?, "store time")?;

    Ok(ReceivedMessage {
        id,
        body,
        receive_count: receive_count.max(0) as u64,
        first_received,
        sent,
        hidden_until,
        received,
    })
}
