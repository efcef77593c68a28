//! Request and response bodies of the API.

use serde::{Deserialize, Serialize};
use smq_runtime::{MessageId, QueueName, StoreKind, Timestamp};

// ============================================================================
// Request Types
// ============================================================================

/// Body of `POST /queues`; absent settings take the queue defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateQueueRequest {
    pub name: String,
    /// Seconds
    pub visibility_timeout: Option<i64>,
    /// Seconds
    pub delay: Option<i64>,
    /// Bytes
    pub max_size: Option<usize>,
}

/// Body of `PATCH /queues/{queue}`; absent settings stay unchanged
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateQueueRequest {
    pub visibility_timeout: Option<i64>,
    pub delay: Option<i64>,
    pub max_size: Option<usize>,
}

/// Body of `POST /queues/{queue}/messages`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SendMessageRequest {
    /// Base64-encoded message body
    pub body: String,
    /// Seconds; the queue default when absent
    pub delay: Option<i64>,
}

/// Body of `POST /queues/{queue}/messages/receive`; may be omitted entirely
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReceiveMessageRequest {
    /// Seconds; the queue default when absent
    pub visibility_timeout: Option<i64>,
    /// Long-poll for up to this many seconds when the queue is empty
    pub wait_seconds: Option<u64>,
}

/// Body of `PUT /queues/{queue}/messages/{id}/visibility`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChangeVisibilityRequest {
    /// Seconds from now
    pub visibility_timeout: i64,
}

// ============================================================================
// Response Types
// ============================================================================

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: StoreKind,
    pub namespace: String,
    pub timestamp: Timestamp,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueListResponse {
    pub queues: Vec<QueueName>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateQueueResponse {
    pub name: QueueName,
    pub created: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub id: MessageId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangeVisibilityResponse {
    pub id: MessageId,
    pub hidden_until: Timestamp,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    /// Hidden messages whose deadline passed and that are ready again
    pub released: u64,
}
