//! Fail-open invariant: with the broker unreachable, every cache and
//! rate-limiter operation degrades to a neutral value without erroring.

use std::sync::Arc;

use serde_json::json;

use lendhub_cache::{CacheService, ConnectionManager, LimitClass, RateLimiter};
use lendhub_core::{BookSummary, SessionData};

fn offline_cache() -> CacheService {
    CacheService::new(Arc::new(ConnectionManager::offline()))
}

#[tokio::test]
async fn test_cache_reads_return_empty() {
    let cache = offline_cache();
    assert!(cache.get_search_results("rust", &json!({})).await.is_none());
    assert!(cache.get_nearby_books(40.7, -74.0, 10.0).await.is_none());
    assert!(cache.get_popular_books("fiction").await.is_none());
    assert!(cache.get_community_stats().await.is_none());
    assert!(cache.get_session("u1").await.is_none());
    assert!(cache.online_users().await.is_empty());
    assert_eq!(cache.online_count().await, 0);
    assert!(cache.find_books_within(-74.0, 40.7, 5.0).await.is_empty());
}

#[tokio::test]
async fn test_cache_writes_return_false() {
    let cache = offline_cache();
    let books = vec![BookSummary {
        id: "b1".into(),
        title: "T".into(),
        author: "A".into(),
        category: "c".into(),
        available: true,
        distance_km: None,
    }];
    assert!(!cache.set_search_results("rust", &json!({}), &books).await);
    assert!(!cache.set_popular_books("fiction", &books).await);
    assert!(!cache.set_nearby_books(40.7, -74.0, 10.0, &books).await);
    assert!(!cache.add_book_location("b1", -74.0, 40.7).await);
    assert!(!cache.add_online_user("u1").await);
    assert!(
        !cache
            .set_session(
                "u1",
                &SessionData {
                    user_id: "u1".into(),
                    username: "n".into(),
                    roles: vec![],
                    last_seen: 0,
                },
            )
            .await
    );
}

#[tokio::test]
async fn test_invalidation_is_a_noop() {
    let cache = offline_cache();
    assert_eq!(cache.invalidate_book_caches().await, 0);
    cache.invalidate_user_caches("u1").await;
}

#[tokio::test]
async fn test_health_reports_disconnected() {
    let health = offline_cache().health().await;
    assert!(!health.connected);
    assert_eq!(health.online_users, 0);
}

#[tokio::test]
async fn test_rate_limiter_allows_everything() {
    let limiter = RateLimiter::new(Arc::new(ConnectionManager::offline()));
    for _ in 0..200 {
        let decision = limiter.check("10.0.0.1", LimitClass::Api).await;
        assert!(decision.allowed);
        assert!(decision.retry_after.is_none());
    }
}
