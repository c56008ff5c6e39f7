//! Job handlers grouped by queue.
//!
//! Handlers are pure functions of their JSON payload. Their outward side
//! effects (mail, push delivery, image work, store deletes) go through
//! traits carried in [`HandlerDeps`], wired once at startup by
//! [`default_registry`].

pub mod cleanup;
pub mod email;
pub mod images;
pub mod notifications;

use std::sync::Arc;

use lendhub_core::CoreError;

use crate::registry::HandlerRegistry;
use crate::types::QueueName;

pub use cleanup::{CleanupStore, InMemoryCleanupStore};
pub use email::{EmailMessage, EmailTransport, LogTransport};
pub use images::{ImageProcessor, PassthroughProcessor};
pub use notifications::{LogSink, NotificationSink};

/// Every `(queue, job type)` pair the system produces. `WorkerPool`
/// validates the registry against this list at startup.
pub const EXPECTED_JOB_TYPES: [(QueueName, &str); 17] = [
    (QueueName::Email, "send-email"),
    (QueueName::Email, "send-welcome-email"),
    (QueueName::Email, "send-borrow-request-email"),
    (QueueName::Email, "send-reminder-email"),
    (QueueName::Email, "send-overdue-email"),
    (QueueName::Notifications, "send-push-notification"),
    (QueueName::Notifications, "send-socket-notification"),
    (QueueName::ImageProcessing, "optimize-image"),
    (QueueName::ImageProcessing, "generate-thumbnails"),
    (QueueName::ImageProcessing, "upload-optimized-image"),
    (QueueName::ImageProcessing, "batch-process-images"),
    (QueueName::Cleanup, "cleanup-expired-tokens"),
    (QueueName::Cleanup, "cleanup-old-notifications"),
    (QueueName::Cleanup, "cleanup-temp-files"),
    (QueueName::Cleanup, "cleanup-inactive-sessions"),
    (QueueName::Cleanup, "cleanup-old-borrow-requests"),
    (QueueName::Cleanup, "comprehensive-cleanup"),
];

/// Side-effect collaborators injected into the handlers.
#[derive(Clone)]
pub struct HandlerDeps {
    pub email: Arc<dyn EmailTransport>,
    pub notifications: Arc<dyn NotificationSink>,
    pub images: Arc<dyn ImageProcessor>,
    pub cleanup: Arc<dyn CleanupStore>,
}

impl HandlerDeps {
    /// Log-only collaborators, suitable for development and tests.
    pub fn logging() -> Self {
        Self {
            email: Arc::new(LogTransport),
            notifications: Arc::new(LogSink),
            images: Arc::new(PassthroughProcessor),
            cleanup: Arc::new(InMemoryCleanupStore::default()),
        }
    }
}

macro_rules! wire {
    ($registry:expr, $queue:expr, $job_type:literal, $dep:expr, $handler:path) => {{
        let dep = $dep.clone();
        $registry.register($queue, $job_type, move |payload| {
            let dep = dep.clone();
            async move { $handler(dep, payload).await }
        })?;
    }};
}

/// Build the full registry for [`EXPECTED_JOB_TYPES`].
pub fn default_registry(deps: &HandlerDeps) -> Result<HandlerRegistry, CoreError> {
    let mut registry = HandlerRegistry::new();

    wire!(registry, QueueName::Email, "send-email", deps.email, email::send_email);
    wire!(
        registry,
        QueueName::Email,
        "send-welcome-email",
        deps.email,
        email::send_welcome_email
    );
    wire!(
        registry,
        QueueName::Email,
        "send-borrow-request-email",
        deps.email,
        email::send_borrow_request_email
    );
    wire!(
        registry,
        QueueName::Email,
        "send-reminder-email",
        deps.email,
        email::send_reminder_email
    );
    wire!(
        registry,
        QueueName::Email,
        "send-overdue-email",
        deps.email,
        email::send_overdue_email
    );

    wire!(
        registry,
        QueueName::Notifications,
        "send-push-notification",
        deps.notifications,
        notifications::send_push_notification
    );
    wire!(
        registry,
        QueueName::Notifications,
        "send-socket-notification",
        deps.notifications,
        notifications::send_socket_notification
    );

    wire!(
        registry,
        QueueName::ImageProcessing,
        "optimize-image",
        deps.images,
        images::optimize_image
    );
    wire!(
        registry,
        QueueName::ImageProcessing,
        "generate-thumbnails",
        deps.images,
        images::generate_thumbnails
    );
    wire!(
        registry,
        QueueName::ImageProcessing,
        "upload-optimized-image",
        deps.images,
        images::upload_optimized_image
    );
    wire!(
        registry,
        QueueName::ImageProcessing,
        "batch-process-images",
        deps.images,
        images::batch_process_images
    );

    wire!(
        registry,
        QueueName::Cleanup,
        "cleanup-expired-tokens",
        deps.cleanup,
        cleanup::cleanup_expired_tokens
    );
    wire!(
        registry,
        QueueName::Cleanup,
        "cleanup-old-notifications",
        deps.cleanup,
        cleanup::cleanup_old_notifications
    );
    wire!(
        registry,
        QueueName::Cleanup,
        "cleanup-temp-files",
        deps.cleanup,
        cleanup::cleanup_temp_files
    );
    wire!(
        registry,
        QueueName::Cleanup,
        "cleanup-inactive-sessions",
        deps.cleanup,
        cleanup::cleanup_inactive_sessions
    );
    wire!(
        registry,
        QueueName::Cleanup,
        "cleanup-old-borrow-requests",
        deps.cleanup,
        cleanup::cleanup_old_borrow_requests
    );
    wire!(
        registry,
        QueueName::Cleanup,
        "comprehensive-cleanup",
        deps.cleanup,
        cleanup::comprehensive_cleanup
    );

    registry.validate(&EXPECTED_JOB_TYPES)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_every_job_type() {
        let registry = default_registry(&HandlerDeps::logging()).unwrap();
        assert_eq!(registry.len(), EXPECTED_JOB_TYPES.len());
        for (queue, job_type) in EXPECTED_JOB_TYPES {
            assert!(registry.get(queue, job_type).is_some(), "{queue}/{job_type}");
        }
    }
}
