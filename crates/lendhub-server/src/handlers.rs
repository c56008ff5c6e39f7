use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use lendhub_cache::TtlClass;
use lendhub_core::BookSummary;

use crate::interceptor::cached;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "Lendhub Server",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Readiness only requires the process to be up: a degraded broker is an
/// accepted state, not a reason to pull the instance from rotation.
pub async fn readyz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ready" }))
}

/// `GET /api/health/cache` — broker connectivity plus a liveness signal
/// from the presence set.
pub async fn cache_health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.cache.health().await;
    (StatusCode::OK, Json(health))
}

/// `GET /api/health/queues` — per-queue counters.
pub async fn queue_health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.jobs.all_stats().await;
    (StatusCode::OK, Json(stats))
}

/// Book lookup backed by the primary store. The CRUD layer implements
/// this; the demo source serves a fixed shelf.
#[async_trait]
pub trait BookSource: Send + Sync {
    async fn search(&self, query: &str, filters: &Value) -> Vec<BookSummary>;
}

pub struct DemoBookSource;

#[async_trait]
impl BookSource for DemoBookSource {
    async fn search(&self, query: &str, _filters: &Value) -> Vec<BookSummary> {
        let shelf = [
            ("b1", "Dune", "Frank Herbert", "fiction"),
            ("b2", "The Pragmatic Programmer", "Hunt & Thomas", "tech"),
            ("b3", "A Wizard of Earthsea", "Ursula K. Le Guin", "fiction"),
        ];
        let needle = query.to_lowercase();
        shelf
            .iter()
            .filter(|(_, title, author, _)| {
                needle.is_empty()
                    || title.to_lowercase().contains(&needle)
                    || author.to_lowercase().contains(&needle)
            })
            .map(|(id, title, author, category)| BookSummary {
                id: (*id).to_string(),
                title: (*title).to_string(),
                author: (*author).to_string(),
                category: (*category).to_string(),
                available: true,
                distance_km: None,
            })
            .collect()
    }
}

/// `GET /api/books/search?q=...` — the cache-aware read path. Identical
/// queries with reordered filter parameters share one cache entry.
pub async fn search_books(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let query = params.get("q").cloned().unwrap_or_default();
    let filters: Value = params
        .iter()
        .filter(|(k, _)| k.as_str() != "q")
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect::<serde_json::Map<String, Value>>()
        .into();

    let key = state.cache.search_key(&query, &filters);
    let result: Result<Value, std::convert::Infallible> =
        cached(&state.cache, &key, TtlClass::SearchResults, || async {
            let books = state.books.search(&query, &filters).await;
            Ok(json!({ "query": query, "results": books }))
        })
        .await;

    match result {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_source_filters_by_title() {
        let books = DemoBookSource.search("dune", &json!({})).await;
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id, "b1");
    }

    #[tokio::test]
    async fn test_demo_source_empty_query_returns_shelf() {
        let books = DemoBookSource.search("", &json!({})).await;
        assert_eq!(books.len(), 3);
    }
}
