//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Number of random characters appended to every message id
pub const MESSAGE_ID_SUFFIX_LEN: usize = 10;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        validate_identifier("queue_name", &name, 160)?;
        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Key prefix separating independent sets of queues within one store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub const DEFAULT: &'static str = "rsmq";

    /// Create new namespace with validation
    pub fn new(namespace: String) -> Result<Self, ValidationError> {
        validate_identifier("namespace", &namespace, 64)?;
        Ok(Self(namespace))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Namespace {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(namespace: Namespace) -> Self {
        namespace.0
    }
}

fn validate_identifier(field: &str, value: &str, max_len: usize) -> Result<(), ValidationError> {
    if value.is_empty() || value.len() > max_len {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must be 1-{} characters", max_len),
        });
    }

    // Validate characters (ASCII alphanumeric, hyphens, underscores)
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
        });
    }

    // Validate no consecutive hyphens or leading/trailing hyphens
    if value.starts_with('-') || value.ends_with('-') || value.contains("--") {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
        });
    }

    Ok(())
}

/// Identifier of a message: originating queue, per-queue sequence number and a
/// random suffix.
///
/// The text form is `{queue}.{sequence:020}.{suffix}`. Zero padding keeps the
/// lexicographic order of ids equal to their sequence order within a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId {
    queue: QueueName,
    sequence: u64,
    suffix: String,
}

impl MessageId {
    pub(crate) fn new(queue: QueueName, sequence: u64, suffix: String) -> Self {
        Self {
            queue,
            sequence,
            suffix,
        }
    }

    /// Generate the random part of a new message id
    pub fn generate_suffix() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MESSAGE_ID_SUFFIX_LEN)
            .map(char::from)
            .collect()
    }

    /// Queue the message was sent to
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Per-queue sequence number allocated at send time
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Check whether this id was issued by the given queue
    pub fn belongs_to(&self, queue: &QueueName) -> bool {
        &self.queue == queue
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:020}.{}", self.queue, self.sequence, self.suffix)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        let invalid = |message: &str| ValidationError::InvalidFormat {
            field: "message_id".to_string(),
            message: message.to_string(),
        };

        let mut parts = s.rsplitn(3, '.');
        let suffix = parts.next().unwrap_or_default();
        let sequence = parts
            .next()
            .ok_or_else(|| invalid("expected '<queue>.<sequence>.<suffix>'"))?;
        let queue = parts
            .next()
            .ok_or_else(|| invalid("expected '<queue>.<sequence>.<suffix>'"))?;

        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("suffix must be ASCII alphanumeric"));
        }
        if sequence.is_empty() || !sequence.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("sequence must be decimal digits"));
        }
        let sequence = sequence
            .parse::<u64>()
            .map_err(|_| invalid("sequence out of range"))?;

        Ok(Self {
            queue: QueueName::new(queue.to_string())?,
            sequence,
            suffix: suffix.to_string(),
        })
    }
}

impl TryFrom<String> for MessageId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_string()
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Create timestamp from Unix milliseconds, as kept by the backing store
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Self)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Unix milliseconds
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the queue system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Bytes,
    /// Overrides the queue's default delay when set
    pub delay: Option<Duration>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self { body, delay: None }
    }

    /// Hold the message back for `delay` before it becomes ready
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl From<&str> for Message {
    fn from(body: &str) -> Self {
        Self::new(Bytes::copy_from_slice(body.as_bytes()))
    }
}

/// A message claimed from the queue with delivery metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub id: MessageId,
    #[serde(with = "body_encoding")]
    pub body: Bytes,
    /// Number of times this message has been claimed, including this one
    pub receive_count: u64,
    pub first_received: Timestamp,
    pub sent: Timestamp,
    /// Deadline after which the message becomes ready again; `None` for popped
    /// messages, which were deleted as they were claimed.
    pub hidden_until: Option<Timestamp>,
    /// Store time at which this claim was made
    pub received: Timestamp,
}

impl ReceivedMessage {
    /// Body as UTF-8 text, if it is valid UTF-8
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Visibility window granted by this claim, measured in store time.
    /// `None` for popped messages.
    pub fn visibility_window(&self) -> Option<Duration> {
        self.hidden_until.map(|deadline| {
            (deadline.as_datetime() - self.received.as_datetime()).max(Duration::zero())
        })
    }
}

/// Base64 serialization for message bodies
pub mod body_encoding {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
