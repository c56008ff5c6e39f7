//! Job and queue vocabulary types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by job handlers and the queue machinery.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

impl JobError {
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// The four job queues. A slow queue cannot starve the others: each has
/// its own consumer and concurrency budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    Email,
    Notifications,
    ImageProcessing,
    Cleanup,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Email,
        QueueName::Notifications,
        QueueName::ImageProcessing,
        QueueName::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Email => "email",
            QueueName::Notifications => "notifications",
            QueueName::ImageProcessing => "image-processing",
            QueueName::Cleanup => "cleanup",
        }
    }

    /// Per-queue retry and retention policy.
    pub fn defaults(self) -> QueueDefaults {
        match self {
            QueueName::Email => QueueDefaults {
                max_attempts: 3,
                backoff_base: Duration::from_secs(2),
                keep_completed: 100,
                keep_failed: 50,
            },
            QueueName::Notifications => QueueDefaults {
                max_attempts: 2,
                backoff_base: Duration::from_secs(1),
                keep_completed: 100,
                keep_failed: 50,
            },
            // Resource-heavy, so retries back off further apart.
            QueueName::ImageProcessing => QueueDefaults {
                max_attempts: 2,
                backoff_base: Duration::from_secs(5),
                keep_completed: 100,
                keep_failed: 50,
            },
            // Cleanup runs are idempotent and rescheduled anyway.
            QueueName::Cleanup => QueueDefaults {
                max_attempts: 1,
                backoff_base: Duration::ZERO,
                keep_completed: 100,
                keep_failed: 50,
            },
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = lendhub_core::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(QueueName::Email),
            "notifications" => Ok(QueueName::Notifications),
            "image-processing" => Ok(QueueName::ImageProcessing),
            "cleanup" => Ok(QueueName::Cleanup),
            other => Err(lendhub_core::CoreError::UnknownQueue(other.to_string())),
        }
    }
}

/// Per-queue defaults applied on enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDefaults {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Retention for completed jobs, for observability.
    pub keep_completed: usize,
    pub keep_failed: usize,
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Active => write!(f, "active"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Delayed => write!(f, "delayed"),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: QueueName,
    pub job_type: String,
    pub payload: Value,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub state: JobState,
    /// Unix epoch milliseconds.
    pub enqueued_at: i64,
    /// Earliest time this job may run, epoch milliseconds.
    pub run_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Job {
    /// Exponential retry delay: `base × 2^attempts_made`.
    pub fn backoff_delay(&self) -> Duration {
        let base = Duration::from_millis(self.backoff_base_ms);
        base * 2u32.saturating_pow(self.attempts_made)
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

/// Caller overrides applied on top of the queue defaults.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOpts {
    pub max_attempts: Option<u32>,
    pub backoff_base: Option<Duration>,
    pub delay: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_string(&JobState::Waiting).unwrap(), "\"waiting\"");
        let back: JobState = serde_json::from_str("\"delayed\"").unwrap();
        assert_eq!(back, JobState::Delayed);
    }

    #[test]
    fn test_queue_name_roundtrip() {
        for queue in QueueName::ALL {
            let parsed: QueueName = queue.as_str().parse().unwrap();
            assert_eq!(parsed, queue);
        }
        assert!("faxes".parse::<QueueName>().is_err());
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let mut job = Job {
            id: Uuid::new_v4(),
            queue: QueueName::Email,
            job_type: "send-email".into(),
            payload: serde_json::json!({}),
            attempts_made: 1,
            max_attempts: 3,
            backoff_base_ms: 2_000,
            state: JobState::Waiting,
            enqueued_at: 0,
            run_at: 0,
            last_error: None,
            result: None,
        };
        assert_eq!(job.backoff_delay(), Duration::from_secs(4));
        job.attempts_made = 2;
        assert_eq!(job.backoff_delay(), Duration::from_secs(8));
    }

    #[test]
    fn test_cleanup_queue_has_no_retries() {
        let defaults = QueueName::Cleanup.defaults();
        assert_eq!(defaults.max_attempts, 1);
        assert_eq!(defaults.backoff_base, Duration::ZERO);
    }
}
