//! Handler registration table.
//!
//! Jobs dispatch strictly by `(queue, job type)` through this table, and
//! the table is validated at startup so an unknown job type fails fast at
//! registration time rather than at execution time.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use lendhub_core::CoreError;

use crate::types::{JobError, QueueName};

/// Boxed handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, JobError>> + Send>>;

/// A registered handler: a pure async function of the job payload.
pub type HandlerFn = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// `(queue, job type) → handler` table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(QueueName, String), HandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Duplicate registration is a configuration error.
    pub fn register<F, Fut>(
        &mut self,
        queue: QueueName,
        job_type: &str,
        handler: F,
    ) -> Result<(), CoreError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        let key = (queue, job_type.to_string());
        if self.handlers.contains_key(&key) {
            return Err(CoreError::configuration(format!(
                "duplicate handler for {queue}/{job_type}"
            )));
        }
        let boxed: HandlerFn = Arc::new(move |payload| Box::pin(handler(payload)));
        self.handlers.insert(key, boxed);
        Ok(())
    }

    pub fn get(&self, queue: QueueName, job_type: &str) -> Option<HandlerFn> {
        self.handlers.get(&(queue, job_type.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Startup validation: every expected `(queue, job type)` pair must
    /// have a handler.
    pub fn validate(&self, expected: &[(QueueName, &str)]) -> Result<(), CoreError> {
        for (queue, job_type) in expected {
            if !self.handlers.contains_key(&(*queue, job_type.to_string())) {
                return Err(CoreError::unknown_job_type(queue.as_str(), *job_type));
            }
        }
        Ok(())
    }
}
