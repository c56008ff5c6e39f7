//! Key-naming scheme for the cache.
//!
//! All keys are colon-delimited hierarchies (`domain:subdomain:discriminator`)
//! so whole families can be invalidated with one pattern sweep
//! (`books:search:*`). Search keys are content-addressed: the digest covers
//! the normalized query plus the filter object with sorted keys, so
//! equivalent searches share an entry regardless of filter key order and
//! the key space stays bounded.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Geospatial index of book locations.
pub const GEO_BOOKS: &str = "geo:books";
/// Presence set of online user ids; the whole set shares one TTL.
pub const ONLINE_USERS: &str = "users:online";
/// Aggregate community statistics.
pub const COMMUNITY_STATS: &str = "community:stats";

pub const SEARCH_PATTERN: &str = "books:search:*";
pub const POPULAR_PATTERN: &str = "books:popular:*";
pub const NEARBY_PATTERN: &str = "books:nearby:*";

/// Coordinates are rounded to 3 decimals (~110 m) so users standing in
/// roughly the same spot share a cache entry.
const GEO_KEY_PRECISION: usize = 3;

/// `books:search:<hex sha256>` over the normalized query and filters.
pub fn search_key(query: &str, filters: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    let mut canonical = String::new();
    write_canonical(filters, &mut canonical);
    hasher.update(canonical.as_bytes());
    format!("books:search:{}", hex::encode(hasher.finalize()))
}

/// `books:nearby:<lat>:<lng>:<radius>` with rounded coordinates.
pub fn nearby_key(lat: f64, lng: f64, radius_km: f64) -> String {
    format!(
        "books:nearby:{lat:.prec$}:{lng:.prec$}:{radius_km}",
        prec = GEO_KEY_PRECISION
    )
}

/// `books:popular:<category>`.
pub fn popular_key(category: &str) -> String {
    format!("books:popular:{}", category.trim().to_lowercase())
}

/// `user:session:<id>`.
pub fn session_key(user_id: &str) -> String {
    format!("user:session:{user_id}")
}

/// `ratelimit:<class>:<identifier>`.
pub fn ratelimit_key(class: &str, identifier: &str) -> String {
    format!("ratelimit:{class}:{identifier}")
}

/// Serialize a JSON value with object keys sorted, independent of the
/// in-memory map ordering.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("{key:?}:"));
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_key_stable_under_filter_order() {
        let a = json!({"category": "fiction", "available": true, "maxDistance": 5});
        let b = json!({"maxDistance": 5, "available": true, "category": "fiction"});
        assert_eq!(search_key("atomic habits", &a), search_key("atomic habits", &b));
    }

    #[test]
    fn test_search_key_normalizes_query() {
        let filters = json!({});
        assert_eq!(
            search_key("  Atomic Habits ", &filters),
            search_key("atomic habits", &filters)
        );
    }

    #[test]
    fn test_search_key_differs_for_different_filters() {
        let a = json!({"category": "fiction"});
        let b = json!({"category": "history"});
        assert_ne!(search_key("books", &a), search_key("books", &b));
    }

    #[test]
    fn test_search_key_nested_objects_sorted() {
        let a = json!({"range": {"min": 1, "max": 9}});
        let b = json!({"range": {"max": 9, "min": 1}});
        assert_eq!(search_key("q", &a), search_key("q", &b));
    }

    #[test]
    fn test_nearby_key_rounding() {
        // Differences past the third decimal collapse to the same key.
        assert_eq!(
            nearby_key(40.71280, -74.00600, 10.0),
            nearby_key(40.71283, -74.00601, 10.0)
        );
        assert_ne!(
            nearby_key(40.712, -74.006, 10.0),
            nearby_key(40.713, -74.006, 10.0)
        );
    }

    #[test]
    fn test_nearby_key_shape() {
        assert_eq!(nearby_key(40.7128, -74.006, 10.0), "books:nearby:40.713:-74.006:10");
    }

    #[test]
    fn test_popular_key_normalizes_category() {
        assert_eq!(popular_key(" Fiction "), "books:popular:fiction");
    }
}
