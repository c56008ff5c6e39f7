//! Per-queue job consumers.
//!
//! One consumer task per queue, each with a bounded-concurrency semaphore
//! so a slow queue (image optimization) cannot starve the others. The
//! consumer loop promotes due delayed jobs, pops the next waiting job, and
//! dispatches it through the handler registry; success and failure are
//! reported back to the queue, which drives the job state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use lendhub_core::CoreError;

use crate::queue::JobQueue;
use crate::registry::HandlerRegistry;
use crate::types::{Job, JobError, QueueName};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Simultaneous jobs per queue.
    pub concurrency: usize,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    /// Bound on waiting for in-flight jobs during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_millis(250),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Running consumer group, one task per queue.
pub struct WorkerPool {
    config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    consumers: Vec<JoinHandle<()>>,
    semaphores: HashMap<QueueName, Arc<Semaphore>>,
}

impl WorkerPool {
    /// Validate that every expected `(queue, job type)` pair has a handler,
    /// then spawn. A hole in the registry fails here instead of surfacing
    /// as terminal job failures at dispatch time.
    pub fn start_checked(
        queue: Arc<JobQueue>,
        registry: HandlerRegistry,
        config: WorkerConfig,
        expected: &[(QueueName, &str)],
    ) -> Result<Self, CoreError> {
        registry.validate(expected)?;
        Ok(Self::start(queue, registry, config))
    }

    /// Spawn one consumer per queue.
    pub fn start(queue: Arc<JobQueue>, registry: HandlerRegistry, config: WorkerConfig) -> Self {
        let registry = Arc::new(registry);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut consumers = Vec::with_capacity(QueueName::ALL.len());
        let mut semaphores = HashMap::new();

        for name in QueueName::ALL {
            let semaphore = Arc::new(Semaphore::new(config.concurrency));
            semaphores.insert(name, semaphore.clone());
            consumers.push(tokio::spawn(consume(
                queue.clone(),
                name,
                registry.clone(),
                semaphore,
                shutdown_rx.clone(),
                config.poll_interval,
            )));
        }

        tracing::info!(
            concurrency = config.concurrency,
            queues = QueueName::ALL.len(),
            "worker pool started"
        );

        Self {
            config,
            shutdown_tx,
            consumers,
            semaphores,
        }
    }

    /// Stop pulling new jobs, wait for in-flight jobs to finish (bounded
    /// by the shutdown timeout), then return.
    pub async fn shutdown(self) {
        tracing::info!("worker pool shutting down");
        let _ = self.shutdown_tx.send(true);

        for consumer in self.consumers {
            let _ = consumer.await;
        }

        // Draining a semaphore to full capacity means no job holds a permit.
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        for (name, semaphore) in self.semaphores {
            let capacity = self.config.concurrency as u32;
            match tokio::time::timeout_at(deadline, semaphore.acquire_many(capacity)).await {
                Ok(Ok(_permits)) => {}
                Ok(Err(_)) => {}
                Err(_) => {
                    tracing::warn!(queue = %name, "shutdown timeout with jobs still in flight");
                }
            }
        }
        tracing::info!("worker pool stopped");
    }
}

async fn consume(
    queue: Arc<JobQueue>,
    name: QueueName,
    registry: Arc<HandlerRegistry>,
    semaphore: Arc<Semaphore>,
    mut shutdown_rx: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    tracing::debug!(queue = %name, "consumer started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        queue.promote_due(name).await;

        match queue.next_waiting(name).await {
            Some(job) => {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let queue = queue.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    run_one(&queue, &registry, job).await;
                    drop(permit);
                });
            }
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }
    tracing::debug!(queue = %name, "consumer stopped");
}

async fn run_one(queue: &JobQueue, registry: &HandlerRegistry, mut job: Job) {
    let Some(handler) = registry.get(job.queue, &job.job_type) else {
        // Registration is validated at startup; reaching this means a
        // foreign producer enqueued an unknown type. Terminal, no retry.
        let error = JobError::failed(format!("no handler registered for {}", job.job_type));
        queue.mark_failed(&mut job, &error).await;
        return;
    };

    queue.mark_active(&mut job).await;
    tracing::debug!(
        queue = %job.queue,
        job_type = %job.job_type,
        job_id = %job.id,
        attempt = job.attempts_made,
        "job started"
    );

    match handler(job.payload.clone()).await {
        Ok(result) => queue.mark_completed(&mut job, result).await,
        Err(error) => {
            if job.attempts_exhausted() {
                queue.mark_failed(&mut job, &error).await;
            } else {
                queue.retry_later(&mut job, &error).await;
            }
        }
    }
}
