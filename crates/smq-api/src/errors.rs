//! Error types for the HTTP service

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use smq_runtime::{ConfigurationError, QueueError, ValidationError};
use tracing::{error, warn};

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Request handler errors with HTTP status code mapping
///
/// - `400 Bad Request`: invalid queue settings, identifiers or request bodies
/// - `404 Not Found`: unknown queue or message
/// - `413 Payload Too Large`: message body above the queue's limit
/// - `500 Internal Server Error`: unexpected store replies and other failures
/// - `503 Service Unavailable`: the store cannot be reached; carries `Retry-After`
///
/// Details of 500 responses are logged server-side only.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Failure reported by the queue client
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Request body or parameter the queue client never sees
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        Self::Queue(QueueError::ValidationError(error))
    }
}

impl ApiError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Stable machine-readable error code, also used as metrics label
    pub fn code(&self) -> &'static str {
        match self {
            Self::Queue(QueueError::QueueNotFound { .. }) => "queue_not_found",
            Self::Queue(QueueError::MessageNotFound { .. }) => "message_not_found",
            Self::Queue(QueueError::MessageTooLarge { .. }) => "message_too_large",
            Self::Queue(QueueError::InvalidConfig { .. }) => "invalid_config",
            Self::Queue(QueueError::ValidationError(_)) => "invalid_request",
            Self::Queue(QueueError::ConfigurationError(_)) => "configuration_error",
            Self::Queue(QueueError::StoreUnavailable { .. }) => "store_unavailable",
            Self::Queue(QueueError::StoreFailure { .. }) => "store_failure",
            Self::InvalidRequest { .. } => "invalid_request",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Queue(QueueError::QueueNotFound { .. })
            | Self::Queue(QueueError::MessageNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Queue(QueueError::MessageTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Queue(QueueError::InvalidConfig { .. })
            | Self::Queue(QueueError::ValidationError(_))
            | Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Queue(QueueError::StoreUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Queue(QueueError::ConfigurationError(_))
            | Self::Queue(QueueError::StoreFailure { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Seconds a client should wait before retrying, for transient failures
    pub fn retry_after_seconds(&self) -> Option<i64> {
        match self {
            Self::Queue(e) if e.is_transient() => e
                .retry_after()
                .map(|delay| delay.num_seconds().max(1))
                .or(Some(1)),
            _ => None,
        }
    }
}

/// JSON body of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Internal server error occurred");
            "Internal server error occurred. Please try again later.".to_string()
        } else {
            if status == StatusCode::SERVICE_UNAVAILABLE {
                warn!(error = %self, "Backing store unavailable");
            }
            self.to_string()
        };

        let body = ErrorBody {
            error: self.code().to_string(),
            message,
        };
        let mut response = (status, Json(body)).into_response();

        if let Some(retry_seconds) = self.retry_after_seconds() {
            if let Ok(header_value) = retry_seconds.to_string().parse() {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, header_value);
            }
        }

        response
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue client unavailable: {0}")]
    Client(#[from] QueueError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration loading failed: {0}")]
    Loading(#[from] config::ConfigError),

    #[error("Client configuration: {0}")]
    Client(#[from] ConfigurationError),
}
