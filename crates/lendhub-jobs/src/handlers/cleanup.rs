//! Cleanup job handlers.
//!
//! Periodic sweeps over the primary data store: expired tokens, read
//! notifications, temp upload files, stale sessions, and old borrow
//! requests. The store itself is behind [`CleanupStore`] so the CRUD
//! layer owns the queries; every handler reports how many records it
//! removed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::types::JobError;

/// Default retention horizons for the parameterized sweeps.
pub const DEFAULT_NOTIFICATION_AGE_DAYS: u32 = 30;
pub const DEFAULT_TEMP_FILE_AGE_HOURS: u32 = 24;
pub const DEFAULT_SESSION_AGE_DAYS: u32 = 30;
pub const DEFAULT_BORROW_REQUEST_AGE_DAYS: u32 = 90;

#[async_trait]
pub trait CleanupStore: Send + Sync {
    async fn delete_expired_tokens(&self) -> Result<u64, JobError>;
    async fn delete_read_notifications(&self, older_than_days: u32) -> Result<u64, JobError>;
    async fn delete_temp_files(&self, older_than_hours: u32) -> Result<u64, JobError>;
    async fn delete_inactive_sessions(&self, older_than_days: u32) -> Result<u64, JobError>;
    async fn delete_old_borrow_requests(&self, older_than_days: u32) -> Result<u64, JobError>;
}

/// In-memory store that hands out preset counts, draining each bucket on
/// first use. Doubles as the test fixture and the development default.
#[derive(Debug, Default)]
pub struct InMemoryCleanupStore {
    expired_tokens: AtomicU64,
    read_notifications: AtomicU64,
    temp_files: AtomicU64,
    inactive_sessions: AtomicU64,
    old_borrow_requests: AtomicU64,
}

impl InMemoryCleanupStore {
    pub fn with_counts(
        expired_tokens: u64,
        read_notifications: u64,
        temp_files: u64,
        inactive_sessions: u64,
        old_borrow_requests: u64,
    ) -> Self {
        Self {
            expired_tokens: AtomicU64::new(expired_tokens),
            read_notifications: AtomicU64::new(read_notifications),
            temp_files: AtomicU64::new(temp_files),
            inactive_sessions: AtomicU64::new(inactive_sessions),
            old_borrow_requests: AtomicU64::new(old_borrow_requests),
        }
    }

    fn drain(bucket: &AtomicU64) -> u64 {
        bucket.swap(0, Ordering::SeqCst)
    }
}

#[async_trait]
impl CleanupStore for InMemoryCleanupStore {
    async fn delete_expired_tokens(&self) -> Result<u64, JobError> {
        Ok(Self::drain(&self.expired_tokens))
    }

    async fn delete_read_notifications(&self, _older_than_days: u32) -> Result<u64, JobError> {
        Ok(Self::drain(&self.read_notifications))
    }

    async fn delete_temp_files(&self, _older_than_hours: u32) -> Result<u64, JobError> {
        Ok(Self::drain(&self.temp_files))
    }

    async fn delete_inactive_sessions(&self, _older_than_days: u32) -> Result<u64, JobError> {
        Ok(Self::drain(&self.inactive_sessions))
    }

    async fn delete_old_borrow_requests(&self, _older_than_days: u32) -> Result<u64, JobError> {
        Ok(Self::drain(&self.old_borrow_requests))
    }
}

fn parse<T: for<'de> Deserialize<'de> + Default>(payload: Value) -> Result<T, JobError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload).map_err(|e| JobError::invalid_payload(e.to_string()))
}

pub async fn cleanup_expired_tokens(
    store: Arc<dyn CleanupStore>,
    _payload: Value,
) -> Result<Value, JobError> {
    let removed = store.delete_expired_tokens().await?;
    tracing::info!(removed, "expired tokens cleaned up");
    Ok(json!({ "removed": removed }))
}

#[derive(Default, Deserialize)]
struct AgeDaysPayload {
    older_than_days: Option<u32>,
}

pub async fn cleanup_old_notifications(
    store: Arc<dyn CleanupStore>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: AgeDaysPayload = parse(payload)?;
    let days = p.older_than_days.unwrap_or(DEFAULT_NOTIFICATION_AGE_DAYS);
    let removed = store.delete_read_notifications(days).await?;
    tracing::info!(removed, older_than_days = days, "old notifications cleaned up");
    Ok(json!({ "removed": removed }))
}

#[derive(Default, Deserialize)]
struct AgeHoursPayload {
    older_than_hours: Option<u32>,
}

pub async fn cleanup_temp_files(
    store: Arc<dyn CleanupStore>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: AgeHoursPayload = parse(payload)?;
    let hours = p.older_than_hours.unwrap_or(DEFAULT_TEMP_FILE_AGE_HOURS);
    let removed = store.delete_temp_files(hours).await?;
    tracing::info!(removed, older_than_hours = hours, "temp files cleaned up");
    Ok(json!({ "removed": removed }))
}

pub async fn cleanup_inactive_sessions(
    store: Arc<dyn CleanupStore>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: AgeDaysPayload = parse(payload)?;
    let days = p.older_than_days.unwrap_or(DEFAULT_SESSION_AGE_DAYS);
    let removed = store.delete_inactive_sessions(days).await?;
    tracing::info!(removed, older_than_days = days, "inactive sessions cleaned up");
    Ok(json!({ "removed": removed }))
}

pub async fn cleanup_old_borrow_requests(
    store: Arc<dyn CleanupStore>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: AgeDaysPayload = parse(payload)?;
    let days = p.older_than_days.unwrap_or(DEFAULT_BORROW_REQUEST_AGE_DAYS);
    let removed = store.delete_old_borrow_requests(days).await?;
    tracing::info!(removed, older_than_days = days, "old borrow requests cleaned up");
    Ok(json!({ "removed": removed }))
}

#[derive(Default, Deserialize)]
struct ComprehensivePayload {
    older_than_days: Option<u32>,
    older_than_hours: Option<u32>,
}

/// Run every sweep and aggregate the counts. An `older_than_days` /
/// `older_than_hours` override in the payload applies to every sweep
/// it fits; sweeps without an override keep their default horizon.
pub async fn comprehensive_cleanup(
    store: Arc<dyn CleanupStore>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: ComprehensivePayload = parse(payload)?;
    let days = p.older_than_days;
    let hours = p.older_than_hours;

    let expired_tokens = store.delete_expired_tokens().await?;
    let read_notifications = store
        .delete_read_notifications(days.unwrap_or(DEFAULT_NOTIFICATION_AGE_DAYS))
        .await?;
    let temp_files = store
        .delete_temp_files(hours.unwrap_or(DEFAULT_TEMP_FILE_AGE_HOURS))
        .await?;
    let inactive_sessions = store
        .delete_inactive_sessions(days.unwrap_or(DEFAULT_SESSION_AGE_DAYS))
        .await?;
    let old_borrow_requests = store
        .delete_old_borrow_requests(days.unwrap_or(DEFAULT_BORROW_REQUEST_AGE_DAYS))
        .await?;

    let total =
        expired_tokens + read_notifications + temp_files + inactive_sessions + old_borrow_requests;
    tracing::info!(total, "comprehensive cleanup finished");
    Ok(json!({
        "expired_tokens": expired_tokens,
        "read_notifications": read_notifications,
        "temp_files": temp_files,
        "inactive_sessions": inactive_sessions,
        "old_borrow_requests": old_borrow_requests,
        "total": total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_cleanup_with_override_horizon() {
        let store: Arc<dyn CleanupStore> =
            Arc::new(InMemoryCleanupStore::with_counts(0, 7, 0, 0, 0));
        let out = cleanup_old_notifications(store, json!({ "older_than_days": 14 }))
            .await
            .unwrap();
        assert_eq!(out["removed"], 7);
    }

    #[tokio::test]
    async fn test_cleanup_accepts_null_payload() {
        let store: Arc<dyn CleanupStore> =
            Arc::new(InMemoryCleanupStore::with_counts(5, 0, 0, 0, 0));
        let out = cleanup_expired_tokens(store, Value::Null).await.unwrap();
        assert_eq!(out["removed"], 5);
    }

    #[derive(Default)]
    struct RecordingStore {
        day_horizons: std::sync::Mutex<Vec<u32>>,
        hour_horizons: std::sync::Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl CleanupStore for RecordingStore {
        async fn delete_expired_tokens(&self) -> Result<u64, JobError> {
            Ok(0)
        }

        async fn delete_read_notifications(&self, older_than_days: u32) -> Result<u64, JobError> {
            self.day_horizons.lock().unwrap().push(older_than_days);
            Ok(0)
        }

        async fn delete_temp_files(&self, older_than_hours: u32) -> Result<u64, JobError> {
            self.hour_horizons.lock().unwrap().push(older_than_hours);
            Ok(0)
        }

        async fn delete_inactive_sessions(&self, older_than_days: u32) -> Result<u64, JobError> {
            self.day_horizons.lock().unwrap().push(older_than_days);
            Ok(0)
        }

        async fn delete_old_borrow_requests(&self, older_than_days: u32) -> Result<u64, JobError> {
            self.day_horizons.lock().unwrap().push(older_than_days);
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_comprehensive_cleanup_threads_override_horizon() {
        let store = Arc::new(RecordingStore::default());
        comprehensive_cleanup(
            store.clone(),
            json!({ "older_than_days": 60, "older_than_hours": 6 }),
        )
        .await
        .unwrap();
        assert_eq!(*store.day_horizons.lock().unwrap(), vec![60, 60, 60]);
        assert_eq!(*store.hour_horizons.lock().unwrap(), vec![6]);
    }

    #[tokio::test]
    async fn test_comprehensive_cleanup_defaults_without_override() {
        let store = Arc::new(RecordingStore::default());
        comprehensive_cleanup(store.clone(), Value::Null)
            .await
            .unwrap();
        assert_eq!(
            *store.day_horizons.lock().unwrap(),
            vec![
                DEFAULT_NOTIFICATION_AGE_DAYS,
                DEFAULT_SESSION_AGE_DAYS,
                DEFAULT_BORROW_REQUEST_AGE_DAYS
            ]
        );
        assert_eq!(
            *store.hour_horizons.lock().unwrap(),
            vec![DEFAULT_TEMP_FILE_AGE_HOURS]
        );
    }

    #[tokio::test]
    async fn test_comprehensive_cleanup_aggregates() {
        let store: Arc<dyn CleanupStore> =
            Arc::new(InMemoryCleanupStore::with_counts(3, 2, 1, 0, 0));
        let out = comprehensive_cleanup(store, Value::Null).await.unwrap();
        assert_eq!(out["expired_tokens"], 3);
        assert_eq!(out["read_notifications"], 2);
        assert_eq!(out["temp_files"], 1);
        assert_eq!(out["total"], 6);
    }
}
