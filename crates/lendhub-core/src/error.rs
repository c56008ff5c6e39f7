use thiserror::Error;

/// Core error types shared across Lendhub crates.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("UUID error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Unknown job type: {queue}/{job_type}")]
    UnknownJobType { queue: String, job_type: String },
}

impl CoreError {
    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new InvalidPayload error
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// Create a new UnknownJobType error
    pub fn unknown_job_type(queue: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self::UnknownJobType {
            queue: queue.into(),
            job_type: job_type.into(),
        }
    }
}
