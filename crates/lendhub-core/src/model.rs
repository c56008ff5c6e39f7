//! Serde models shared between the cache layer and the HTTP surface.
//!
//! These are the summaries the CRUD layer hands us for caching, not the
//! full MongoDB documents. Anything the cache stores must round-trip
//! through JSON, so every field here is plain data.

use serde::{Deserialize, Serialize};

/// A book as it appears in cached search results and popularity lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub id: String,
    pub title: String,
    pub author: String,
    pub category: String,
    #[serde(default)]
    pub available: bool,
    /// Distance from the query point, populated only on geo queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

/// Aggregate community statistics cached under `community:stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityStats {
    pub total_books: u64,
    pub total_members: u64,
    pub active_borrows: u64,
    pub upcoming_events: u64,
}

/// User session payload stored under `user:session:<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Unix timestamp of the last activity that refreshed this session.
    pub last_seen: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_summary_roundtrip() {
        let book = BookSummary {
            id: "b1".into(),
            title: "Atomic Habits".into(),
            author: "James Clear".into(),
            category: "self-help".into(),
            available: true,
            distance_km: None,
        };
        let json = serde_json::to_string(&book).unwrap();
        assert!(!json.contains("distance_km"));
        let back: BookSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, book);
    }
}
