//! The job queue façade over the broker primitives.
//!
//! Broker layout per queue:
//!
//! - `jobs:<queue>:waiting` — list of job ids in FIFO enqueue order
//! - `jobs:<queue>:delayed` — sorted set scored by run-at epoch millis
//! - `jobs:<queue>:active` — set of ids currently executing
//! - `jobs:<queue>:completed` / `jobs:<queue>:failed` — recent ids,
//!   trimmed to the per-queue retention
//! - `jobs:<queue>:job:<id>` — the JSON job record
//!
//! If the broker never came up, `schedule` returns `None` after a logged
//! warning; the side effect simply will not happen asynchronously.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use lendhub_cache::ConnectionManager;

use crate::types::{Job, JobError, JobState, QueueName, ScheduleOpts};

/// Job records outlive the retention lists slightly; operators can still
/// inspect a pruned job until this TTL fires.
const JOB_RECORD_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Per-queue counters for the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueueStats {
    pub name: String,
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

/// Enqueue façade shared by the CRUD layer and the worker pool.
#[derive(Clone)]
pub struct JobQueue {
    cm: Arc<ConnectionManager>,
}

fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn key_waiting(queue: QueueName) -> String {
    format!("jobs:{queue}:waiting")
}
fn key_delayed(queue: QueueName) -> String {
    format!("jobs:{queue}:delayed")
}
fn key_active(queue: QueueName) -> String {
    format!("jobs:{queue}:active")
}
fn key_completed(queue: QueueName) -> String {
    format!("jobs:{queue}:completed")
}
fn key_failed(queue: QueueName) -> String {
    format!("jobs:{queue}:failed")
}
fn key_job(queue: QueueName, id: Uuid) -> String {
    format!("jobs:{queue}:job:{id}")
}

impl JobQueue {
    pub fn new(cm: Arc<ConnectionManager>) -> Self {
        Self { cm }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.cm
    }

    /// Enqueue a job with the queue's defaults. Returns `None` when the
    /// broker is unavailable — callers must treat that as "the side effect
    /// will not happen asynchronously" and never block on it.
    pub async fn schedule(
        &self,
        queue: QueueName,
        job_type: &str,
        payload: Value,
        opts: ScheduleOpts,
    ) -> Option<Uuid> {
        if !self.cm.is_connected() {
            tracing::warn!(
                queue = %queue,
                job_type,
                "job queue degraded, dropping job"
            );
            return None;
        }

        let defaults = queue.defaults();
        let now = now_ms();
        let delay = opts.delay.unwrap_or(Duration::ZERO);
        let run_at = now + delay.as_millis() as i64;
        let delayed = delay > Duration::ZERO;

        let job = Job {
            id: Uuid::new_v4(),
            queue,
            job_type: job_type.to_string(),
            payload,
            attempts_made: 0,
            max_attempts: opts.max_attempts.unwrap_or(defaults.max_attempts),
            backoff_base_ms: opts
                .backoff_base
                .unwrap_or(defaults.backoff_base)
                .as_millis() as u64,
            state: if delayed { JobState::Delayed } else { JobState::Waiting },
            enqueued_at: now,
            run_at,
            last_error: None,
            result: None,
        };

        if !self.store_job(&job).await {
            tracing::warn!(queue = %queue, job_type, "failed to persist job, dropping");
            return None;
        }

        let pushed = if delayed {
            self.cm
                .zadd(&key_delayed(queue), &job.id.to_string(), run_at as f64)
                .await
        } else {
            self.cm
                .rpush(&key_waiting(queue), &job.id.to_string())
                .await
        };
        if !pushed {
            return None;
        }

        tracing::info!(
            queue = %queue,
            job_type,
            job_id = %job.id,
            delayed,
            "job scheduled"
        );
        Some(job.id)
    }

    /// Enqueue a job that becomes runnable after `delay`.
    pub async fn schedule_delayed(
        &self,
        queue: QueueName,
        job_type: &str,
        payload: Value,
        delay: Duration,
    ) -> Option<Uuid> {
        self.schedule(
            queue,
            job_type,
            payload,
            ScheduleOpts {
                delay: Some(delay),
                ..ScheduleOpts::default()
            },
        )
        .await
    }

    pub async fn load_job(&self, queue: QueueName, id: Uuid) -> Option<Job> {
        let raw = self.cm.get(&key_job(queue, id)).await?;
        match serde_json::from_str(&raw) {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::warn!(queue = %queue, job_id = %id, error = %e, "corrupt job record");
                None
            }
        }
    }

    pub(crate) async fn store_job(&self, job: &Job) -> bool {
        let raw = match serde_json::to_string(job) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "failed to serialize job");
                return false;
            }
        };
        self.cm.set(&key_job(job.queue, job.id), &raw, JOB_RECORD_TTL).await
    }

    /// Move due members of the delayed zset to the waiting list. A retried
    /// or delayed job re-enters the queue at its new scheduled time, not
    /// at its original position.
    pub async fn promote_due(&self, queue: QueueName) -> usize {
        let due = self
            .cm
            .zrangebyscore(&key_delayed(queue), now_ms() as f64)
            .await;
        let mut promoted = 0;
        for raw_id in due {
            if !self.cm.zrem(&key_delayed(queue), &raw_id).await {
                // Another consumer claimed it between range and remove.
                continue;
            }
            if let Ok(id) = raw_id.parse::<Uuid>()
                && let Some(mut job) = self.load_job(queue, id).await
            {
                job.state = JobState::Waiting;
                self.store_job(&job).await;
            }
            self.cm.rpush(&key_waiting(queue), &raw_id).await;
            promoted += 1;
        }
        if promoted > 0 {
            tracing::debug!(queue = %queue, promoted, "promoted delayed jobs");
        }
        promoted
    }

    /// Pop the next waiting job, FIFO.
    pub async fn next_waiting(&self, queue: QueueName) -> Option<Job> {
        let raw_id = self.cm.lpop(&key_waiting(queue)).await?;
        let id = match raw_id.parse::<Uuid>() {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(queue = %queue, raw_id = %raw_id, "invalid job id on queue");
                return None;
            }
        };
        self.load_job(queue, id).await
    }

    /// Transition to `active`, counting the attempt.
    pub async fn mark_active(&self, job: &mut Job) {
        job.state = JobState::Active;
        job.attempts_made += 1;
        self.store_job(job).await;
        self.cm
            .sadd(&key_active(job.queue), &job.id.to_string())
            .await;
    }

    /// Terminal success.
    pub async fn mark_completed(&self, job: &mut Job, result: Value) {
        job.state = JobState::Completed;
        job.result = Some(result);
        job.last_error = None;
        self.store_job(job).await;
        self.cm
            .srem(&key_active(job.queue), &job.id.to_string())
            .await;
        let completed = key_completed(job.queue);
        self.cm.rpush(&completed, &job.id.to_string()).await;
        let keep = job.queue.defaults().keep_completed as i64;
        self.cm.ltrim(&completed, -keep, -1).await;
        tracing::info!(
            queue = %job.queue,
            job_id = %job.id,
            attempts = job.attempts_made,
            "job completed"
        );
    }

    /// Re-enter the delayed set with the exponential backoff delay.
    /// Returns the applied delay.
    pub async fn retry_later(&self, job: &mut Job, error: &JobError) -> Duration {
        let delay = job.backoff_delay();
        job.state = JobState::Delayed;
        job.last_error = Some(error.to_string());
        job.run_at = now_ms() + delay.as_millis() as i64;
        self.store_job(job).await;
        self.cm
            .srem(&key_active(job.queue), &job.id.to_string())
            .await;
        self.cm
            .zadd(&key_delayed(job.queue), &job.id.to_string(), job.run_at as f64)
            .await;
        tracing::warn!(
            queue = %job.queue,
            job_id = %job.id,
            attempt = job.attempts_made,
            max_attempts = job.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "job failed, retrying with backoff"
        );
        delay
    }

    /// Terminal failure, retained for operator inspection.
    pub async fn mark_failed(&self, job: &mut Job, error: &JobError) {
        job.state = JobState::Failed;
        job.last_error = Some(error.to_string());
        self.store_job(job).await;
        self.cm
            .srem(&key_active(job.queue), &job.id.to_string())
            .await;
        let failed = key_failed(job.queue);
        self.cm.rpush(&failed, &job.id.to_string()).await;
        let keep = job.queue.defaults().keep_failed as i64;
        self.cm.ltrim(&failed, -keep, -1).await;
        tracing::error!(
            queue = %job.queue,
            job_id = %job.id,
            attempts = job.attempts_made,
            error = %error,
            "job failed terminally"
        );
    }

    pub async fn stats(&self, queue: QueueName) -> QueueStats {
        QueueStats {
            name: queue.as_str().to_string(),
            waiting: self.cm.llen(&key_waiting(queue)).await,
            active: self.cm.scard(&key_active(queue)).await,
            completed: self.cm.llen(&key_completed(queue)).await,
            failed: self.cm.llen(&key_failed(queue)).await,
            delayed: self.cm.zcard(&key_delayed(queue)).await,
        }
    }

    pub async fn all_stats(&self) -> Vec<QueueStats> {
        let mut stats = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            stats.push(self.stats(queue).await);
        }
        stats
    }
}
