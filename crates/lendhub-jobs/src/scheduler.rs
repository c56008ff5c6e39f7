//! Cron scheduler for recurring jobs.
//!
//! Periodic work (cleanup sweeps, popularity refreshes) is registered as
//! a cron expression; the scheduler ticks on an interval and enqueues an
//! instance through the normal `JobQueue::schedule` path whenever an
//! expression fires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use croner::Cron;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::interval;

use lendhub_core::CoreError;

use crate::queue::JobQueue;
use crate::types::QueueName;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to check for expressions that are due.
    pub check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
        }
    }
}

struct RecurringEntry {
    queue: QueueName,
    job_type: String,
    payload: Value,
    expression: String,
    cron: Cron,
}

/// Registers cron entries before `start`, then ticks in the background.
pub struct RecurringScheduler {
    queue: Arc<JobQueue>,
    config: SchedulerConfig,
    entries: Vec<RecurringEntry>,
    last_runs: HashMap<usize, OffsetDateTime>,
}

impl RecurringScheduler {
    pub fn new(queue: Arc<JobQueue>, config: SchedulerConfig) -> Self {
        Self {
            queue,
            config,
            entries: Vec::new(),
            last_runs: HashMap::new(),
        }
    }

    /// Register a recurring job. Invalid cron expressions fail here, at
    /// startup, not at tick time.
    pub fn add(
        &mut self,
        queue: QueueName,
        job_type: &str,
        payload: Value,
        cron_expression: &str,
    ) -> Result<(), CoreError> {
        let cron = Cron::new(cron_expression).parse().map_err(|e| {
            CoreError::configuration(format!(
                "invalid cron expression '{cron_expression}' for {queue}/{job_type}: {e}"
            ))
        })?;
        self.entries.push(RecurringEntry {
            queue,
            job_type: job_type.to_string(),
            payload,
            expression: cron_expression.to_string(),
            cron,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start the scheduler in a background task.
    ///
    /// Returns a shutdown sender that stops the scheduler.
    pub fn start(mut self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tracing::info!(
                entries = self.entries.len(),
                check_interval_secs = self.config.check_interval_secs,
                "recurring scheduler started"
            );
            let mut ticker = interval(Duration::from_secs(self.config.check_interval_secs));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check_and_enqueue().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("recurring scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    async fn check_and_enqueue(&mut self) {
        let now = OffsetDateTime::now_utc();
        for index in 0..self.entries.len() {
            let due = {
                let entry = &self.entries[index];
                let last_run = self.last_runs.get(&index).copied();
                self.should_run(&entry.cron, now, last_run)
            };
            if !due {
                continue;
            }
            self.last_runs.insert(index, now);
            let entry = &self.entries[index];
            tracing::debug!(
                queue = %entry.queue,
                job_type = %entry.job_type,
                cron = %entry.expression,
                "recurring job due"
            );
            self.queue
                .schedule(
                    entry.queue,
                    &entry.job_type,
                    entry.payload.clone(),
                    Default::default(),
                )
                .await;
        }
    }

    /// A cron entry runs when its most recent scheduled time falls within
    /// the check window and it has not already run for that time.
    fn should_run(&self, cron: &Cron, now: OffsetDateTime, last_run: Option<OffsetDateTime>) -> bool {
        // croner works with chrono timestamps.
        let now_chrono = chrono::DateTime::from_timestamp(now.unix_timestamp(), 0)
            .unwrap_or_else(chrono::Utc::now);

        let window_secs = self.config.check_interval_secs as i64;
        let past = now_chrono - chrono::Duration::seconds(window_secs * 2);

        let prev = match cron.find_next_occurrence(&past, false) {
            Ok(prev) => prev,
            Err(_) => return false,
        };
        let now_ts = now_chrono.timestamp();
        let prev_ts = prev.timestamp();
        if prev_ts > now_ts {
            return false;
        }

        match last_run {
            None => now_ts - prev_ts < window_secs,
            Some(last) => prev_ts > last.unix_timestamp() && now_ts - prev_ts < window_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lendhub_cache::ConnectionManager;
    use serde_json::json;

    fn scheduler(check_interval_secs: u64) -> RecurringScheduler {
        let queue = Arc::new(JobQueue::new(Arc::new(ConnectionManager::memory())));
        RecurringScheduler::new(queue, SchedulerConfig { check_interval_secs })
    }

    #[test]
    fn test_invalid_expression_fails_at_registration() {
        let mut sched = scheduler(60);
        let err = sched
            .add(QueueName::Cleanup, "comprehensive-cleanup", json!({}), "not a cron")
            .unwrap_err();
        assert!(err.to_string().contains("invalid cron expression"));
    }

    #[test]
    fn test_valid_expression_registers() {
        let mut sched = scheduler(60);
        sched
            .add(QueueName::Cleanup, "comprehensive-cleanup", json!({}), "0 3 * * *")
            .unwrap();
        assert_eq!(sched.len(), 1);
    }

    fn at(hour: u8, minute: u8, second: u8) -> OffsetDateTime {
        use time::macros::date;
        date!(2025 - 06 - 15)
            .with_hms(hour, minute, second)
            .unwrap()
            .assume_utc()
    }

    #[test]
    fn test_daily_expression_due_just_after_fire_time() {
        let sched = scheduler(60);
        let cron = Cron::new("0 3 * * *").parse().unwrap();
        assert!(sched.should_run(&cron, at(3, 0, 30), None));
    }

    #[test]
    fn test_daily_expression_not_due_mid_day() {
        let sched = scheduler(60);
        let cron = Cron::new("0 3 * * *").parse().unwrap();
        assert!(!sched.should_run(&cron, at(14, 30, 0), None));
    }

    #[test]
    fn test_already_ran_for_this_occurrence() {
        let sched = scheduler(60);
        let cron = Cron::new("0 3 * * *").parse().unwrap();
        // Last run is after the 03:00 fire time, so a rerun is suppressed.
        assert!(!sched.should_run(&cron, at(3, 0, 45), Some(at(3, 0, 10))));
    }
}
