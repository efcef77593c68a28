//! Queue settings and attribute records.

use crate::error::QueueError;
use crate::message::{QueueName, Timestamp};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Largest visibility timeout or delay, in seconds
pub const MAX_TIMEOUT_SECONDS: i64 = 9_999_999;

/// Smallest allowed per-queue message size limit, in bytes
pub const MIN_MESSAGE_SIZE: usize = 1024;

/// Largest allowed per-queue message size limit, in bytes
pub const MAX_MESSAGE_SIZE: usize = 65536;

/// Per-queue configuration applied to messages that do not override it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// How long a received message stays hidden from other receivers
    pub visibility_timeout: Duration,
    /// How long a sent message waits before it becomes ready
    pub delay: Duration,
    /// Maximum message body size in bytes
    pub max_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::seconds(30),
            delay: Duration::zero(),
            max_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl QueueSettings {
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Check every value against its allowed range
    pub fn validate(&self) -> Result<(), QueueError> {
        validate_timeout("visibility_timeout", self.visibility_timeout)?;
        validate_timeout("delay", self.delay)?;
        validate_max_size(self.max_size)
    }
}

/// Partial update of queue settings; `None` leaves a value unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSettingsUpdate {
    pub visibility_timeout: Option<Duration>,
    pub delay: Option<Duration>,
    pub max_size: Option<usize>,
}

impl QueueSettingsUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.visibility_timeout.is_none() && self.delay.is_none() && self.max_size.is_none()
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if let Some(timeout) = self.visibility_timeout {
            validate_timeout("visibility_timeout", timeout)?;
        }
        if let Some(delay) = self.delay {
            validate_timeout("delay", delay)?;
        }
        if let Some(max_size) = self.max_size {
            validate_max_size(max_size)?;
        }
        Ok(())
    }
}

/// Check a visibility timeout or delay against its allowed range. Scripts
/// take whole seconds.
pub fn validate_timeout(field: &str, value: Duration) -> Result<(), QueueError> {
    if value < Duration::zero() || value > Duration::seconds(MAX_TIMEOUT_SECONDS) {
        return Err(QueueError::InvalidConfig {
            message: format!(
                "{} must be between 0 and {} seconds, got {}s",
                field,
                MAX_TIMEOUT_SECONDS,
                value.num_seconds()
            ),
        });
    }
    if value.num_milliseconds() % 1000 != 0 {
        return Err(QueueError::InvalidConfig {
            message: format!(
                "{} must be a whole number of seconds, got {}ms",
                field,
                value.num_milliseconds()
            ),
        });
    }
    Ok(())
}

fn validate_max_size(max_size: usize) -> Result<(), QueueError> {
    if !(MIN_MESSAGE_SIZE..=MAX_MESSAGE_SIZE).contains(&max_size) {
        return Err(QueueError::InvalidConfig {
            message: format!(
                "max_size must be between {} and {} bytes, got {}",
                MIN_MESSAGE_SIZE, MAX_MESSAGE_SIZE, max_size
            ),
        });
    }
    Ok(())
}

/// Full attribute record of a queue plus its live counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAttributes {
    pub name: QueueName,
    /// Default visibility timeout in seconds
    pub visibility_timeout: i64,
    /// Default delay in seconds
    pub delay: i64,
    pub max_size: usize,
    pub created: Timestamp,
    pub modified: Timestamp,
    pub total_sent: u64,
    pub total_received: u64,
    /// Messages that can be claimed right now
    pub ready_messages: u64,
    /// Messages whose delay has not elapsed yet
    pub delayed_messages: u64,
    /// Claimed messages whose visibility deadline has not passed
    pub hidden_messages: u64,
}

impl QueueAttributes {
    /// Settings view of this record
    pub fn settings(&self) -> QueueSettings {
        QueueSettings {
            visibility_timeout: Duration::seconds(self.visibility_timeout),
            delay: Duration::seconds(self.delay),
            max_size: self.max_size,
        }
    }

    /// Messages currently stored in the queue, in any state
    pub fn total_messages(&self) -> u64 {
        self.ready_messages + self.delayed_messages + self.hidden_messages
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
