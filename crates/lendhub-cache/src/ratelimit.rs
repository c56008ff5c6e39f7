//! Fixed-window rate limiting on broker counters.
//!
//! The window is anchored to the first request: the counter key is created
//! with an expiry and later increments never touch the TTL. Rate limiting
//! is defense in depth, not a correctness boundary — if the counter cannot
//! be read or written the request is allowed (fail open).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionManager;
use crate::keys;

/// Named limit classes with fixed `(max_requests, window)` policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitClass {
    /// Book search endpoints.
    Search,
    /// Login/registration; identified by client IP.
    Auth,
    /// Image uploads.
    Upload,
    /// Member-to-member messaging.
    Messages,
    /// General API default.
    Api,
}

impl LimitClass {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitClass::Search => "search",
            LimitClass::Auth => "auth",
            LimitClass::Upload => "upload",
            LimitClass::Messages => "messages",
            LimitClass::Api => "api",
        }
    }

    pub fn max_requests(self) -> u32 {
        match self {
            LimitClass::Search => 30,
            LimitClass::Auth => 5,
            LimitClass::Upload => 10,
            LimitClass::Messages => 20,
            LimitClass::Api => 100,
        }
    }

    pub fn window(self) -> Duration {
        match self {
            LimitClass::Search => Duration::from_secs(60),
            LimitClass::Auth => Duration::from_secs(15 * 60),
            LimitClass::Upload => Duration::from_secs(3600),
            LimitClass::Messages => Duration::from_secs(60),
            LimitClass::Api => Duration::from_secs(60),
        }
    }
}

impl std::fmt::Display for LimitClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window expires.
    pub reset_after: Duration,
    /// Retry hint, present only on rejection.
    pub retry_after: Option<Duration>,
    /// Human-readable rejection message.
    pub message: Option<String>,
}

impl RateLimitDecision {
    fn allow(limit: u32, remaining: u32, reset_after: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_after,
            retry_after: None,
            message: None,
        }
    }

    fn reject(limit: u32, reset_after: Duration, label: &str) -> Self {
        let secs = reset_after.as_secs().max(1);
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_after,
            retry_after: Some(reset_after),
            message: Some(format!(
                "Too many {label} requests. Try again in {secs} seconds."
            )),
        }
    }
}

/// Fixed-window counter per `(identifier, limit class)`.
#[derive(Clone)]
pub struct RateLimiter {
    cm: Arc<ConnectionManager>,
}

impl RateLimiter {
    pub fn new(cm: Arc<ConnectionManager>) -> Self {
        Self { cm }
    }

    /// Check one request against a named limit class.
    pub async fn check(&self, identifier: &str, class: LimitClass) -> RateLimitDecision {
        self.check_window(identifier, class.as_str(), class.max_requests(), class.window())
            .await
    }

    /// Check one request against a bespoke `(max, window)` policy. The
    /// named classes delegate here; extensions can define their own label.
    pub async fn check_window(
        &self,
        identifier: &str,
        label: &str,
        max_requests: u32,
        window: Duration,
    ) -> RateLimitDecision {
        if !self.cm.is_connected() {
            return RateLimitDecision::allow(max_requests, max_requests, window);
        }

        let key = keys::ratelimit_key(label, identifier);

        let current = match self.cm.get(&key).await {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) => Some(n),
                Err(_) => {
                    // Malformed counter: drop it and start a fresh window.
                    self.cm.del(&key).await;
                    None
                }
            },
            None => None,
        };

        match current {
            None => {
                // First request in the window anchors the TTL.
                if !self.cm.set(&key, "1", window).await {
                    tracing::warn!(key = %key, "rate limit counter unavailable, allowing request");
                    return RateLimitDecision::allow(max_requests, max_requests, window);
                }
                RateLimitDecision::allow(max_requests, max_requests.saturating_sub(1), window)
            }
            Some(n) if n >= max_requests => {
                let reset = self.window_remaining(&key, window).await;
                tracing::debug!(
                    key = %key,
                    count = n,
                    limit = max_requests,
                    "rate limit exceeded"
                );
                RateLimitDecision::reject(max_requests, reset, label)
            }
            Some(_) => {
                // INCR never touches the TTL, keeping the window fixed.
                let Some(count) = self.cm.incr(&key).await else {
                    return RateLimitDecision::allow(max_requests, max_requests, window);
                };
                let reset = self.window_remaining(&key, window).await;
                if count as u32 > max_requests {
                    return RateLimitDecision::reject(max_requests, reset, label);
                }
                RateLimitDecision::allow(
                    max_requests,
                    max_requests.saturating_sub(count as u32),
                    reset,
                )
            }
        }
    }

    async fn window_remaining(&self, key: &str, window: Duration) -> Duration {
        match self.cm.ttl(key).await {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_open_when_offline() {
        let limiter = RateLimiter::new(Arc::new(ConnectionManager::offline()));
        for _ in 0..50 {
            let decision = limiter.check("user-1", LimitClass::Auth).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, LimitClass::Auth.max_requests());
        }
    }

    #[tokio::test]
    async fn test_counts_down_to_rejection() {
        let limiter = RateLimiter::new(Arc::new(ConnectionManager::memory()));

        for i in 0..5 {
            let decision = limiter.check("1.2.3.4", LimitClass::Auth).await;
            assert!(decision.allowed, "request {i} should be allowed");
        }

        let decision = limiter.check("1.2.3.4", LimitClass::Auth).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after.is_some());
        assert!(decision.message.is_some());
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let limiter = RateLimiter::new(Arc::new(ConnectionManager::memory()));

        for _ in 0..5 {
            limiter.check("ip-a", LimitClass::Auth).await;
        }
        assert!(!limiter.check("ip-a", LimitClass::Auth).await.allowed);
        assert!(limiter.check("ip-b", LimitClass::Auth).await.allowed);
    }

    #[tokio::test]
    async fn test_window_reset_allows_again() {
        let limiter = RateLimiter::new(Arc::new(ConnectionManager::memory()));
        let window = Duration::from_millis(200);

        for _ in 0..5 {
            assert!(
                limiter
                    .check_window("client", "burst", 5, window)
                    .await
                    .allowed
            );
        }
        let rejected = limiter.check_window("client", "burst", 5, window).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);

        tokio::time::sleep(Duration::from_millis(250)).await;

        let fresh = limiter.check_window("client", "burst", 5, window).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 4);
    }

    #[tokio::test]
    async fn test_classes_are_independent_windows() {
        let limiter = RateLimiter::new(Arc::new(ConnectionManager::memory()));

        for _ in 0..5 {
            limiter.check("u1", LimitClass::Auth).await;
        }
        assert!(!limiter.check("u1", LimitClass::Auth).await.allowed);
        assert!(limiter.check("u1", LimitClass::Search).await.allowed);
    }
}
