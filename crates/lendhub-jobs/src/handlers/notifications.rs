//! Notification job handlers.
//!
//! Push and socket notifications fan out through a [`NotificationSink`];
//! the real application plugs in its push provider and websocket hub.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::types::JobError;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a push notification to a user's registered devices.
    async fn push(&self, user_id: &str, title: &str, body: &str) -> Result<(), JobError>;

    /// Emit an event to a user's live socket connections, if any.
    async fn emit(&self, user_id: &str, event: &str, data: &Value) -> Result<(), JobError>;
}

/// Sink that logs instead of delivering.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn push(&self, user_id: &str, title: &str, _body: &str) -> Result<(), JobError> {
        tracing::info!(user_id = %user_id, title = %title, "push notification delivered to log sink");
        Ok(())
    }

    async fn emit(&self, user_id: &str, event: &str, _data: &Value) -> Result<(), JobError> {
        tracing::info!(user_id = %user_id, event = %event, "socket notification delivered to log sink");
        Ok(())
    }
}

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, JobError> {
    serde_json::from_value(payload).map_err(|e| JobError::invalid_payload(e.to_string()))
}

#[derive(Deserialize)]
struct PushPayload {
    user_id: String,
    title: String,
    #[serde(default)]
    body: String,
}

pub async fn send_push_notification(
    sink: Arc<dyn NotificationSink>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: PushPayload = parse(payload)?;
    sink.push(&p.user_id, &p.title, &p.body).await?;
    Ok(json!({ "delivered": true, "user_id": p.user_id }))
}

#[derive(Deserialize)]
struct SocketPayload {
    user_id: String,
    event: String,
    #[serde(default)]
    data: Value,
}

pub async fn send_socket_notification(
    sink: Arc<dyn NotificationSink>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: SocketPayload = parse(payload)?;
    sink.emit(&p.user_id, &p.event, &p.data).await?;
    Ok(json!({ "delivered": true, "user_id": p.user_id, "event": p.event }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_notification() {
        let sink: Arc<dyn NotificationSink> = Arc::new(LogSink);
        let out = send_push_notification(
            sink,
            json!({ "user_id": "u1", "title": "New request", "body": "..." }),
        )
        .await
        .unwrap();
        assert_eq!(out["delivered"], true);
    }

    #[tokio::test]
    async fn test_socket_notification_requires_event() {
        let sink: Arc<dyn NotificationSink> = Arc::new(LogSink);
        let err = send_socket_notification(sink, json!({ "user_id": "u1" }))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload(_)));
    }
}
