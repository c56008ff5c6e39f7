//! Email job handlers.
//!
//! Each handler validates its payload, renders the message, and hands it
//! to the injected [`EmailTransport`]. Rendering failures and transport
//! failures both count against the job's attempt budget.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::types::JobError;

/// Outbound mail delivery. The application wires a real transport; the
/// default implementation only logs, which is enough for development and
/// tests.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), JobError>;
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Transport that logs instead of sending.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), JobError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "email delivered to log transport"
        );
        Ok(())
    }
}

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, JobError> {
    serde_json::from_value(payload).map_err(|e| JobError::invalid_payload(e.to_string()))
}

#[derive(Deserialize)]
struct SendEmailPayload {
    to: String,
    subject: String,
    #[serde(default)]
    body: String,
}

pub async fn send_email(
    transport: Arc<dyn EmailTransport>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: SendEmailPayload = parse(payload)?;
    if p.to.is_empty() {
        return Err(JobError::invalid_payload("recipient address is empty"));
    }
    let message = EmailMessage {
        to: p.to,
        subject: p.subject,
        body: p.body,
    };
    transport.send(&message).await?;
    Ok(json!({ "sent": true, "to": message.to }))
}

#[derive(Deserialize)]
struct WelcomeEmailPayload {
    to: String,
    username: String,
}

pub async fn send_welcome_email(
    transport: Arc<dyn EmailTransport>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: WelcomeEmailPayload = parse(payload)?;
    let message = EmailMessage {
        to: p.to,
        subject: "Welcome to Lendhub".to_string(),
        body: format!(
            "Hi {}, welcome to the community! Browse books near you and \
             list your own shelf to start lending.",
            p.username
        ),
    };
    transport.send(&message).await?;
    Ok(json!({ "sent": true, "to": message.to }))
}

#[derive(Deserialize)]
struct BorrowRequestEmailPayload {
    to: String,
    book_title: String,
    requester_name: String,
}

pub async fn send_borrow_request_email(
    transport: Arc<dyn EmailTransport>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: BorrowRequestEmailPayload = parse(payload)?;
    let message = EmailMessage {
        to: p.to,
        subject: format!("Borrow request for \"{}\"", p.book_title),
        body: format!(
            "{} would like to borrow \"{}\". Open Lendhub to accept or \
             decline the request.",
            p.requester_name, p.book_title
        ),
    };
    transport.send(&message).await?;
    Ok(json!({ "sent": true, "to": message.to }))
}

/// Reminder and overdue notices share a renderer and differ only in how
/// urgently the due date is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Urgency {
    Reminder,
    Overdue,
}

#[derive(Deserialize)]
struct DueDateEmailPayload {
    to: String,
    book_title: String,
    due_date: String,
}

async fn send_due_date_email(
    transport: Arc<dyn EmailTransport>,
    payload: Value,
    urgency: Urgency,
) -> Result<Value, JobError> {
    let p: DueDateEmailPayload = parse(payload)?;
    let (subject, body) = match urgency {
        Urgency::Reminder => (
            format!("Reminder: \"{}\" is due {}", p.book_title, p.due_date),
            format!(
                "Just a heads up: \"{}\" is due back on {}. Arrange the \
                 return with the owner through your messages.",
                p.book_title, p.due_date
            ),
        ),
        Urgency::Overdue => (
            format!("Overdue: \"{}\" was due {}", p.book_title, p.due_date),
            format!(
                "\"{}\" was due back on {} and is now overdue. Please \
                 return it as soon as possible.",
                p.book_title, p.due_date
            ),
        ),
    };
    let message = EmailMessage {
        to: p.to,
        subject,
        body,
    };
    transport.send(&message).await?;
    Ok(json!({ "sent": true, "to": message.to }))
}

pub async fn send_reminder_email(
    transport: Arc<dyn EmailTransport>,
    payload: Value,
) -> Result<Value, JobError> {
    send_due_date_email(transport, payload, Urgency::Reminder).await
}

pub async fn send_overdue_email(
    transport: Arc<dyn EmailTransport>,
    payload: Value,
) -> Result<Value, JobError> {
    send_due_date_email(transport, payload, Urgency::Overdue).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_email_requires_recipient() {
        let transport: Arc<dyn EmailTransport> = Arc::new(LogTransport);
        let err = send_email(transport, json!({ "subject": "hi" }))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_send_email_ok() {
        let transport: Arc<dyn EmailTransport> = Arc::new(LogTransport);
        let out = send_email(
            transport,
            json!({ "to": "reader@example.org", "subject": "hi", "body": "hello" }),
        )
        .await
        .unwrap();
        assert_eq!(out["sent"], true);
        assert_eq!(out["to"], "reader@example.org");
    }

    #[tokio::test]
    async fn test_overdue_framing_differs_from_reminder() {
        struct Capture(std::sync::Mutex<Vec<String>>);

        #[async_trait]
        impl EmailTransport for Capture {
            async fn send(&self, message: &EmailMessage) -> Result<(), JobError> {
                self.0.lock().unwrap().push(message.subject.clone());
                Ok(())
            }
        }

        let capture = Arc::new(Capture(std::sync::Mutex::new(Vec::new())));
        let payload = json!({
            "to": "reader@example.org",
            "book_title": "Dune",
            "due_date": "2026-09-01"
        });
        send_reminder_email(capture.clone(), payload.clone())
            .await
            .unwrap();
        send_overdue_email(capture.clone(), payload).await.unwrap();

        let subjects = capture.0.lock().unwrap();
        assert!(subjects[0].starts_with("Reminder:"));
        assert!(subjects[1].starts_with("Overdue:"));
    }
}
