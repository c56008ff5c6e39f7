//! Asynchronous job system for the Lendhub marketplace.
//!
//! Four queues (email, notifications, image processing, cleanup), each
//! with its own retry budget and backoff policy, persisted through the
//! shared broker connection:
//!
//! - [`JobQueue`]: the enqueue façade. `schedule` / `schedule_delayed`
//!   return `None` when the broker never came up — the side effect will
//!   not happen asynchronously and callers must not block on it.
//! - [`WorkerPool`]: one consumer per queue with bounded concurrency,
//!   dispatching by `(queue, job type)` through a [`HandlerRegistry`]
//!   validated at startup.
//! - [`RecurringScheduler`]: cron-style re-enqueueing for periodic jobs
//!   (cleanup sweeps, popularity refreshes).
//! - [`handlers`]: pure functions of their JSON payload, with the
//!   outward side effects (email transport, notification sinks, image
//!   processing, cleanup targets) behind traits.
//!
//! State machine per job: `waiting → active → {completed | failed}`;
//! a failed job with attempts remaining re-enters `delayed` with
//! `delay = base × 2^attempts`, then `waiting` when due.

pub mod handlers;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use handlers::{EXPECTED_JOB_TYPES, HandlerDeps, default_registry};
pub use queue::{JobQueue, QueueStats};
pub use registry::{HandlerFn, HandlerRegistry};
pub use scheduler::{RecurringScheduler, SchedulerConfig};
pub use types::{Job, JobError, JobState, QueueDefaults, QueueName, ScheduleOpts};
pub use worker::{WorkerConfig, WorkerPool};
