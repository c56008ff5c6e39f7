//! End-to-end job lifecycle tests against the in-memory broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use lendhub_cache::ConnectionManager;
use lendhub_jobs::handlers::{self, HandlerDeps, InMemoryCleanupStore};
use lendhub_jobs::{
    HandlerRegistry, Job, JobQueue, JobState, QueueName, ScheduleOpts, WorkerConfig, WorkerPool,
};

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        poll_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(5),
    }
}

fn fast_retry_opts(max_attempts: u32) -> ScheduleOpts {
    ScheduleOpts {
        max_attempts: Some(max_attempts),
        backoff_base: Some(Duration::from_millis(10)),
        delay: None,
    }
}

/// Poll the job record until it reaches a terminal state.
async fn wait_for_terminal(queue: &JobQueue, name: QueueName, id: Uuid) -> Job {
    for _ in 0..250 {
        if let Some(job) = queue.load_job(name, id).await
            && matches!(job.state, JobState::Completed | JobState::Failed)
        {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} never reached a terminal state");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_success_on_third_attempt() {
    let queue = Arc::new(JobQueue::new(Arc::new(ConnectionManager::memory())));

    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    {
        let calls = calls.clone();
        registry
            .register(QueueName::Email, "flaky", move |_payload| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(lendhub_jobs::JobError::failed("transient"))
                    } else {
                        Ok(json!({ "ok": true }))
                    }
                }
            })
            .unwrap();
    }

    let pool = WorkerPool::start(queue.clone(), registry, fast_worker_config());
    let id = queue
        .schedule(QueueName::Email, "flaky", json!({}), fast_retry_opts(3))
        .await
        .unwrap();

    let job = wait_for_terminal(&queue, QueueName::Email, id).await;
    pool.shutdown().await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts_made, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(job.result.unwrap()["ok"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exhausted_attempts_are_terminal() {
    let queue = Arc::new(JobQueue::new(Arc::new(ConnectionManager::memory())));

    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    {
        let calls = calls.clone();
        registry
            .register(QueueName::Email, "doomed", move |_payload| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<serde_json::Value, _>(lendhub_jobs::JobError::failed("smtp down"))
                }
            })
            .unwrap();
    }

    let pool = WorkerPool::start(queue.clone(), registry, fast_worker_config());
    let id = queue
        .schedule(QueueName::Email, "doomed", json!({}), fast_retry_opts(3))
        .await
        .unwrap();

    let job = wait_for_terminal(&queue, QueueName::Email, id).await;

    // Give any spurious extra attempt a chance to show up, then confirm
    // the budget held.
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.shutdown().await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts_made, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(job.last_error.as_deref(), Some("smtp down"));

    let stats = queue.stats(QueueName::Email).await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.delayed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_jobs_run_in_enqueue_order() {
    let queue = Arc::new(JobQueue::new(Arc::new(ConnectionManager::memory())));

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut registry = HandlerRegistry::new();
    {
        let seen = seen.clone();
        registry
            .register(QueueName::Notifications, "record", move |payload| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(payload["n"].as_i64().unwrap());
                    Ok(json!({}))
                }
            })
            .unwrap();
    }

    let mut ids = Vec::new();
    for n in 0..5 {
        let id = queue
            .schedule(
                QueueName::Notifications,
                "record",
                json!({ "n": n }),
                ScheduleOpts::default(),
            )
            .await
            .unwrap();
        ids.push(id);
    }

    let pool = WorkerPool::start(
        queue.clone(),
        registry,
        WorkerConfig {
            concurrency: 1,
            ..fast_worker_config()
        },
    );
    for id in &ids {
        wait_for_terminal(&queue, QueueName::Notifications, *id).await;
    }
    pool.shutdown().await;

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delayed_job_waits_for_run_at() {
    let queue = Arc::new(JobQueue::new(Arc::new(ConnectionManager::memory())));

    let mut registry = HandlerRegistry::new();
    registry
        .register(QueueName::Cleanup, "tick", |_payload| async {
            Ok(json!({}))
        })
        .unwrap();

    let id = queue
        .schedule_delayed(
            QueueName::Cleanup,
            "tick",
            json!({}),
            Duration::from_millis(150),
        )
        .await
        .unwrap();

    let stats = queue.stats(QueueName::Cleanup).await;
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.waiting, 0);

    let pool = WorkerPool::start(queue.clone(), registry, fast_worker_config());
    let job = wait_for_terminal(&queue, QueueName::Cleanup, id).await;
    pool.shutdown().await;

    assert_eq!(job.state, JobState::Completed);
    assert!(job.run_at >= job.enqueued_at + 150);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_job_type_fails_without_retry() {
    let queue = Arc::new(JobQueue::new(Arc::new(ConnectionManager::memory())));

    // Empty registry: anything popped has no handler.
    let pool = WorkerPool::start(queue.clone(), HandlerRegistry::new(), fast_worker_config());
    let id = queue
        .schedule(QueueName::Email, "mystery", json!({}), fast_retry_opts(3))
        .await
        .unwrap();

    let job = wait_for_terminal(&queue, QueueName::Email, id).await;
    pool.shutdown().await;

    assert_eq!(job.state, JobState::Failed);
    // No dispatch ever happened, so no attempt was consumed.
    assert_eq!(job.attempts_made, 0);
    assert!(job.last_error.unwrap().contains("no handler registered"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_comprehensive_cleanup_through_worker() {
    let queue = Arc::new(JobQueue::new(Arc::new(ConnectionManager::memory())));

    let deps = HandlerDeps {
        cleanup: Arc::new(InMemoryCleanupStore::with_counts(3, 2, 1, 0, 0)),
        ..HandlerDeps::logging()
    };
    let registry = handlers::default_registry(&deps).unwrap();

    let pool = WorkerPool::start(queue.clone(), registry, fast_worker_config());
    let id = queue
        .schedule(
            QueueName::Cleanup,
            "comprehensive-cleanup",
            json!({}),
            ScheduleOpts::default(),
        )
        .await
        .unwrap();

    let job = wait_for_terminal(&queue, QueueName::Cleanup, id).await;
    pool.shutdown().await;

    assert_eq!(job.state, JobState::Completed);
    let result = job.result.unwrap();
    assert_eq!(result["expired_tokens"], 3);
    assert_eq!(result["read_notifications"], 2);
    assert_eq!(result["temp_files"], 1);
    assert_eq!(result["total"], 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_checked_start_rejects_incomplete_registry() {
    let queue = Arc::new(JobQueue::new(Arc::new(ConnectionManager::memory())));

    // A hand-built registry missing an expected type must not start.
    let err = WorkerPool::start_checked(
        queue.clone(),
        HandlerRegistry::new(),
        fast_worker_config(),
        &handlers::EXPECTED_JOB_TYPES,
    )
    .err()
    .expect("empty registry should be rejected");
    assert!(err.to_string().contains("send-email"));

    let registry = handlers::default_registry(&HandlerDeps::logging()).unwrap();
    let pool = WorkerPool::start_checked(
        queue,
        registry,
        fast_worker_config(),
        &handlers::EXPECTED_JOB_TYPES,
    )
    .expect("complete registry should start");
    pool.shutdown().await;
}

#[tokio::test]
async fn test_offline_broker_drops_jobs() {
    let queue = JobQueue::new(Arc::new(ConnectionManager::offline()));
    let id = queue
        .schedule(
            QueueName::Email,
            "send-email",
            json!({ "to": "a@b.c", "subject": "hi" }),
            ScheduleOpts::default(),
        )
        .await;
    assert!(id.is_none());

    let stats = queue.all_stats().await;
    assert!(stats.iter().all(|s| s.waiting == 0 && s.delayed == 0));
}
