//! Domain cache operations for the marketplace.
//!
//! Callers select a `TtlClass`, never a raw number: cache lifetime policy
//! is chosen by data volatility and stays centralized here. All values are
//! JSON; a payload that fails to deserialize is treated as a miss and the
//! poisoned key is deleted.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use lendhub_core::model::{BookSummary, CommunityStats, SessionData};

use crate::connection::ConnectionManager;
use crate::keys;

/// Cache lifetime classes, chosen by data volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// General-purpose entries.
    Default,
    /// User sessions; the only long-lived data in the cache.
    Session,
    /// Search result lists.
    SearchResults,
    /// "Nearby books" result lists.
    Geospatial,
    /// Per-category popularity lists.
    PopularBooks,
    /// Community statistics.
    CommunityStats,
    /// The online-user presence set.
    Presence,
}

impl TtlClass {
    pub fn duration(self) -> Duration {
        match self {
            TtlClass::Default => Duration::from_secs(3600),
            TtlClass::Session => Duration::from_secs(7 * 24 * 3600),
            TtlClass::SearchResults => Duration::from_secs(3600),
            TtlClass::Geospatial => Duration::from_secs(1800),
            TtlClass::PopularBooks => Duration::from_secs(24 * 3600),
            TtlClass::CommunityStats => Duration::from_secs(3600),
            TtlClass::Presence => Duration::from_secs(300),
        }
    }
}

/// Cache health snapshot for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    pub connected: bool,
    pub online_users: usize,
    pub timestamp: i64,
}

/// Domain cache operations over the shared connection manager.
#[derive(Clone)]
pub struct CacheService {
    cm: Arc<ConnectionManager>,
}

impl CacheService {
    pub fn new(cm: Arc<ConnectionManager>) -> Self {
        Self { cm }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.cm
    }

    // ---- generic keyed access ----

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.cm.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => {
                tracing::debug!(key = %key, "cache hit");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to deserialize cached value");
                self.cm.del(key).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: TtlClass) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to serialize value for cache");
                return false;
            }
        };
        let stored = self.cm.set(key, &raw, ttl.duration()).await;
        if stored {
            tracing::debug!(key = %key, ttl_secs = ttl.duration().as_secs(), "cache set");
        }
        stored
    }

    pub async fn del(&self, key: &str) -> bool {
        self.cm.del(key).await
    }

    // ---- search results ----

    pub fn search_key(&self, query: &str, filters: &Value) -> String {
        keys::search_key(query, filters)
    }

    pub async fn get_search_results(&self, query: &str, filters: &Value) -> Option<Vec<BookSummary>> {
        self.get(&keys::search_key(query, filters)).await
    }

    pub async fn set_search_results(
        &self,
        query: &str,
        filters: &Value,
        books: &[BookSummary],
    ) -> bool {
        self.set(&keys::search_key(query, filters), &books, TtlClass::SearchResults)
            .await
    }

    // ---- nearby books ----

    pub async fn get_nearby_books(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
    ) -> Option<Vec<BookSummary>> {
        self.get(&keys::nearby_key(lat, lng, radius_km)).await
    }

    pub async fn set_nearby_books(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        books: &[BookSummary],
    ) -> bool {
        self.set(&keys::nearby_key(lat, lng, radius_km), &books, TtlClass::Geospatial)
            .await
    }

    // ---- geospatial index ----

    /// Register a book's location. Re-adding overwrites the previous point.
    pub async fn add_book_location(&self, book_id: &str, lon: f64, lat: f64) -> bool {
        self.cm.geo_add(keys::GEO_BOOKS, lon, lat, book_id).await
    }

    pub async fn remove_book_location(&self, book_id: &str) -> bool {
        self.cm.zrem(keys::GEO_BOOKS, book_id).await
    }

    /// Book ids within `radius_km` of the point, closest first.
    pub async fn find_books_within(&self, lon: f64, lat: f64, radius_km: f64) -> Vec<String> {
        self.cm.geo_radius(keys::GEO_BOOKS, lon, lat, radius_km).await
    }

    // ---- popularity lists ----

    pub async fn get_popular_books(&self, category: &str) -> Option<Vec<BookSummary>> {
        self.get(&keys::popular_key(category)).await
    }

    pub async fn set_popular_books(&self, category: &str, books: &[BookSummary]) -> bool {
        self.set(&keys::popular_key(category), &books, TtlClass::PopularBooks)
            .await
    }

    // ---- community stats ----

    pub async fn get_community_stats(&self) -> Option<CommunityStats> {
        self.get(keys::COMMUNITY_STATS).await
    }

    pub async fn set_community_stats(&self, stats: &CommunityStats) -> bool {
        self.set(keys::COMMUNITY_STATS, stats, TtlClass::CommunityStats)
            .await
    }

    // ---- sessions ----

    pub async fn get_session(&self, user_id: &str) -> Option<SessionData> {
        self.get(&keys::session_key(user_id)).await
    }

    pub async fn set_session(&self, user_id: &str, session: &SessionData) -> bool {
        self.set(&keys::session_key(user_id), session, TtlClass::Session)
            .await
    }

    pub async fn delete_session(&self, user_id: &str) -> bool {
        self.cm.del(&keys::session_key(user_id)).await
    }

    // ---- presence ----

    /// Add a user to the online set and refresh the TTL of the whole set.
    /// Membership TTL is not per-member: the set as a whole expires if no
    /// one updates it, which bounds staleness without a scheduled sweep.
    pub async fn add_online_user(&self, user_id: &str) -> bool {
        let added = self.cm.sadd(keys::ONLINE_USERS, user_id).await;
        if added {
            self.cm
                .expire(keys::ONLINE_USERS, TtlClass::Presence.duration())
                .await;
        }
        added
    }

    pub async fn remove_online_user(&self, user_id: &str) -> bool {
        self.cm.srem(keys::ONLINE_USERS, user_id).await
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.cm.smembers(keys::ONLINE_USERS).await
    }

    pub async fn online_count(&self) -> usize {
        self.cm.scard(keys::ONLINE_USERS).await
    }

    // ---- invalidation ----

    /// Clear every search, popularity and nearby entry in one sweep.
    ///
    /// Coarse and correctness-biased: any book write invalidates the whole
    /// family rather than tracking which cached results reference the
    /// mutated book, so no stale result can survive a write.
    pub async fn invalidate_book_caches(&self) -> u64 {
        let mut removed = 0;
        for pattern in [keys::SEARCH_PATTERN, keys::POPULAR_PATTERN, keys::NEARBY_PATTERN] {
            removed += self.cm.del_pattern(pattern).await;
        }
        tracing::info!(removed, "book caches invalidated");
        removed
    }

    /// Clear a user's session and drop them from the presence set.
    pub async fn invalidate_user_caches(&self, user_id: &str) {
        self.delete_session(user_id).await;
        self.remove_online_user(user_id).await;
        tracing::info!(user_id = %user_id, "user caches invalidated");
    }

    // ---- health ----

    pub async fn health(&self) -> CacheHealth {
        CacheHealth {
            connected: self.cm.ping().await,
            online_users: self.online_count().await,
            timestamp: time::OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}
