//! Integration tests for the cache service against the in-process broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use lendhub_cache::{CacheService, ConnectionManager};
use lendhub_core::BookSummary;

fn service() -> CacheService {
    CacheService::new(Arc::new(ConnectionManager::memory()))
}

fn book(id: &str, category: &str) -> BookSummary {
    BookSummary {
        id: id.into(),
        title: format!("Book {id}"),
        author: "Author".into(),
        category: category.into(),
        available: true,
        distance_km: None,
    }
}

/// A stand-in for the CRUD layer's database query, counting invocations.
struct CountingSource {
    queries: AtomicUsize,
    books: Vec<BookSummary>,
}

impl CountingSource {
    fn search(&self) -> Vec<BookSummary> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.books.clone()
    }
}

#[tokio::test]
async fn test_search_cache_hit_queries_source_once() {
    let cache = service();
    let source = CountingSource {
        queries: AtomicUsize::new(0),
        books: vec![book("b1", "self-help"), book("b2", "self-help")],
    };
    let filters = json!({});

    // First call: miss, query the source, populate the cache.
    let first = match cache.get_search_results("atomic habits", &filters).await {
        Some(hit) => hit,
        None => {
            let fetched = source.search();
            cache
                .set_search_results("atomic habits", &filters, &fetched)
                .await;
            fetched
        }
    };

    // Second call: hit.
    let second = match cache.get_search_results("atomic habits", &filters).await {
        Some(hit) => hit,
        None => {
            let fetched = source.search();
            cache
                .set_search_results("atomic habits", &filters, &fetched)
                .await;
            fetched
        }
    };

    assert_eq!(first, second);
    assert_eq!(source.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_nearby_cache_shares_rounded_key() {
    let cache = service();
    let books = vec![book("b1", "fiction")];

    cache.set_nearby_books(40.71280, -74.00600, 10.0, &books).await;

    // A query point differing only in the 5th decimal shares the entry.
    assert_eq!(
        cache.get_nearby_books(40.71283, -74.00601, 10.0).await,
        Some(books.clone())
    );
    // A materially different point does not.
    assert_eq!(cache.get_nearby_books(40.81, -74.006, 10.0).await, None);
}

#[tokio::test]
async fn test_invalidate_book_caches_sweeps_all_families() {
    let cache = service();
    let books = vec![book("b1", "fiction")];

    cache
        .set_search_results("rust", &json!({"category": "tech"}), &books)
        .await;
    cache.set_popular_books("fiction", &books).await;
    cache.set_popular_books("history", &books).await;
    cache.set_nearby_books(40.7, -74.0, 5.0, &books).await;

    let removed = cache.invalidate_book_caches().await;
    assert_eq!(removed, 4);

    assert!(
        cache
            .get_search_results("rust", &json!({"category": "tech"}))
            .await
            .is_none()
    );
    assert!(cache.get_popular_books("fiction").await.is_none());
    assert!(cache.get_popular_books("history").await.is_none());
    assert!(cache.get_nearby_books(40.7, -74.0, 5.0).await.is_none());

    // Nothing under the book patterns survives the sweep.
    let cm = cache.connection();
    assert!(cm.keys("books:search:*").await.is_empty());
    assert!(cm.keys("books:popular:*").await.is_empty());
    assert!(cm.keys("books:nearby:*").await.is_empty());
}

#[tokio::test]
async fn test_invalidation_leaves_unrelated_keys() {
    let cache = service();
    let stats = lendhub_core::CommunityStats {
        total_books: 10,
        total_members: 4,
        active_borrows: 2,
        upcoming_events: 1,
    };
    cache.set_community_stats(&stats).await;
    cache
        .set_popular_books("fiction", &[book("b1", "fiction")])
        .await;

    cache.invalidate_book_caches().await;

    assert_eq!(cache.get_community_stats().await, Some(stats));
}

#[tokio::test]
async fn test_geo_index_roundtrip() {
    let cache = service();
    cache.add_book_location("b-downtown", -74.0060, 40.7128).await;
    cache.add_book_location("b-midtown", -73.9855, 40.7580).await;
    cache.add_book_location("b-brooklyn", -73.9442, 40.6782).await;

    let near = cache.find_books_within(-74.0060, 40.7128, 2.0).await;
    assert_eq!(near, vec!["b-downtown"]);

    cache.remove_book_location("b-downtown").await;
    assert!(cache.find_books_within(-74.0060, 40.7128, 2.0).await.is_empty());
}

#[tokio::test]
async fn test_health_reports_presence() {
    let cache = service();
    cache.add_online_user("u1").await;
    cache.add_online_user("u2").await;

    let health = cache.health().await;
    assert!(health.connected);
    assert_eq!(health.online_users, 2);
    assert!(health.timestamp > 0);
}
