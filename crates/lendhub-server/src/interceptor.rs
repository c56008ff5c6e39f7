//! Cache-aware decoration for read handlers and post-commit hooks for
//! writes.
//!
//! Reads opt in through [`cached`]: an explicit wrapper that checks the
//! cache before calling the underlying handler and stores a successful
//! response afterwards, without ever changing the response shape. Writes
//! call [`WriteHooks`] after the primary store commits; the hooks sweep
//! the caches that may now be stale.

use std::sync::Arc;

use serde_json::Value;

use lendhub_cache::{CacheService, TtlClass};

/// Look-aside wrapper around a response-producing future.
///
/// On a hit the handler never runs. On a miss the handler runs, and its
/// value is cached only when it succeeds; errors pass through uncached.
pub async fn cached<F, Fut, E>(
    cache: &CacheService,
    key: &str,
    ttl: TtlClass,
    handler: F,
) -> Result<Value, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, E>>,
{
    if let Some(hit) = cache.get::<Value>(key).await {
        tracing::debug!(key = %key, "cache hit");
        return Ok(hit);
    }

    tracing::debug!(key = %key, "cache miss");
    let value = handler().await?;
    cache.set(key, &value, ttl).await;
    Ok(value)
}

/// Invalidation hooks called by the application layer after a write
/// commits. Separate from the write path so a failed write never sheds
/// valid cache entries.
#[derive(Clone)]
pub struct WriteHooks {
    cache: Arc<CacheService>,
}

impl WriteHooks {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    /// A book was created, updated, or deleted.
    pub async fn book_written(&self) {
        let removed = self.cache.invalidate_book_caches().await;
        tracing::debug!(removed, "book caches invalidated after write");
    }

    /// A user's profile or session-relevant state changed.
    pub async fn user_written(&self, user_id: &str) {
        self.cache.invalidate_user_caches(user_id).await;
        tracing::debug!(user_id = %user_id, "user caches invalidated after write");
    }
}
