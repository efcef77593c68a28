//! Error types for queue operations.

use chrono::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Invalid queue configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Backing store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Backing store failure: {message}")]
    StoreFailure { message: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::InvalidConfig { .. } => false,
            Self::StoreUnavailable { .. } => true,
            Self::StoreFailure { .. } => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }

    /// Check if the caller supplied something that must be corrected before retrying
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::MessageTooLarge { .. } | Self::ValidationError(_)
        )
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::StoreUnavailable { .. } => Some(Duration::seconds(1)),
            _ => None,
        }
    }
}

impl From<StoreError> for QueueError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable { message } => Self::StoreUnavailable { message },
            other => Self::StoreFailure {
                message: other.to_string(),
            },
        }
    }
}

/// Errors raised by a backing store adapter
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Unexpected reply: {message}")]
    UnexpectedReply { message: String },
}

impl StoreError {
    pub(crate) fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            message: message.into(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
