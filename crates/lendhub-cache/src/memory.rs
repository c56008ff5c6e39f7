//! In-process broker used when no Redis URL is configured and by tests.
//!
//! Implements the same primitive surface as the Redis mode over `DashMap`:
//! strings with TTL, sets, sorted sets, lists, and a geospatial index with
//! haversine radius queries. TTLs are enforced lazily on access, the same
//! way expired entries are filtered in the Redis-backed tiers.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Mean Earth radius in kilometres, as used by Redis GEO commands.
const EARTH_RADIUS_KM: f64 = 6372.797560856;

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

/// In-memory implementation of the broker primitives.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    strings: DashMap<String, Entry<String>>,
    sets: DashMap<String, Entry<HashSet<String>>>,
    zsets: DashMap<String, Entry<BTreeMap<String, f64>>>,
    lists: DashMap<String, Entry<VecDeque<String>>>,
    geo: DashMap<String, HashMap<String, (f64, f64)>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- strings ----

    pub fn get(&self, key: &str) -> Option<String> {
        match self.strings.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            Some(entry) => {
                drop(entry);
                self.strings.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        self.strings
            .insert(key.to_string(), Entry::new(value.to_string(), ttl));
        true
    }

    pub fn del(&self, key: &str) -> bool {
        let existed = self.strings.remove(key).is_some();
        existed
            | self.sets.remove(key).is_some()
            | self.zsets.remove(key).is_some()
            | self.lists.remove(key).is_some()
            | self.geo.remove(key).is_some()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
            || self.sets.get(key).is_some_and(|e| !e.is_expired())
            || self.zsets.get(key).is_some_and(|e| !e.is_expired())
            || self.lists.get(key).is_some_and(|e| !e.is_expired())
            || self.geo.contains_key(key)
    }

    /// Glob matching limited to the `prefix:*` patterns the key scheme uses.
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let matcher = |key: &str| match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        };
        self.strings
            .iter()
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.key().clone())
            .filter(|k| matcher(k))
            .collect()
    }

    pub fn incr(&self, key: &str) -> Option<i64> {
        let mut entry = self
            .strings
            .entry(key.to_string())
            .or_insert_with(|| Entry::new("0".to_string(), None));
        if entry.is_expired() {
            *entry = Entry::new("0".to_string(), None);
        }
        let next = entry.value.parse::<i64>().ok()? + 1;
        entry.value = next.to_string();
        Some(next)
    }

    /// Remaining TTL in seconds: `None` if the key is missing, `-1` if it
    /// has no expiry, matching the Redis TTL reply shape.
    pub fn ttl(&self, key: &str) -> Option<i64> {
        let entry = self.strings.get(key)?;
        if entry.is_expired() {
            return None;
        }
        match entry.expires_at {
            Some(at) => Some(at.saturating_duration_since(Instant::now()).as_secs() as i64),
            None => Some(-1),
        }
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        if let Some(mut entry) = self.strings.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
            return true;
        }
        if let Some(mut entry) = self.sets.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
            return true;
        }
        if let Some(mut entry) = self.lists.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
            return true;
        }
        false
    }

    // ---- sets ----

    pub fn sadd(&self, key: &str, member: &str) -> bool {
        let mut entry = self
            .sets
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(HashSet::new(), None));
        if entry.is_expired() {
            *entry = Entry::new(HashSet::new(), None);
        }
        entry.value.insert(member.to_string())
    }

    pub fn srem(&self, key: &str, member: &str) -> bool {
        match self.sets.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => entry.value.remove(member),
            _ => false,
        }
    }

    pub fn smembers(&self, key: &str) -> Vec<String> {
        match self.sets.get(key) {
            Some(entry) if !entry.is_expired() => {
                let mut members: Vec<String> = entry.value.iter().cloned().collect();
                members.sort();
                members
            }
            _ => Vec::new(),
        }
    }

    pub fn scard(&self, key: &str) -> usize {
        match self.sets.get(key) {
            Some(entry) if !entry.is_expired() => entry.value.len(),
            _ => 0,
        }
    }

    // ---- sorted sets ----

    pub fn zadd(&self, key: &str, member: &str, score: f64) -> bool {
        let mut entry = self
            .zsets
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(BTreeMap::new(), None));
        entry.value.insert(member.to_string(), score);
        true
    }

    pub fn zrangebyscore(&self, key: &str, max: f64) -> Vec<String> {
        match self.zsets.get(key) {
            Some(entry) if !entry.is_expired() => {
                let mut members: Vec<(&String, &f64)> =
                    entry.value.iter().filter(|(_, s)| **s <= max).collect();
                members.sort_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
                members.into_iter().map(|(m, _)| m.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn zrem(&self, key: &str, member: &str) -> bool {
        let removed = match self.zsets.get_mut(key) {
            Some(mut entry) => entry.value.remove(member).is_some(),
            None => false,
        };
        if removed {
            return true;
        }
        // Geo indexes are sorted sets in Redis, so ZREM reaches them too.
        match self.geo.get_mut(key) {
            Some(mut members) => members.remove(member).is_some(),
            None => false,
        }
    }

    pub fn zcard(&self, key: &str) -> usize {
        match self.zsets.get(key) {
            Some(entry) if !entry.is_expired() => entry.value.len(),
            _ => 0,
        }
    }

    // ---- lists ----

    pub fn rpush(&self, key: &str, value: &str) -> usize {
        let mut entry = self
            .lists
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(VecDeque::new(), None));
        if entry.is_expired() {
            *entry = Entry::new(VecDeque::new(), None);
        }
        entry.value.push_back(value.to_string());
        entry.value.len()
    }

    pub fn lpop(&self, key: &str) -> Option<String> {
        match self.lists.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => entry.value.pop_front(),
            _ => None,
        }
    }

    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        match self.lists.get(key) {
            Some(entry) if !entry.is_expired() => {
                let len = entry.value.len() as i64;
                let norm = |i: i64| -> i64 {
                    if i < 0 { (len + i).max(0) } else { i.min(len - 1) }
                };
                if len == 0 {
                    return Vec::new();
                }
                let (a, b) = (norm(start), norm(stop));
                if a > b {
                    return Vec::new();
                }
                entry
                    .value
                    .iter()
                    .skip(a as usize)
                    .take((b - a + 1) as usize)
                    .cloned()
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn llen(&self, key: &str) -> usize {
        match self.lists.get(key) {
            Some(entry) if !entry.is_expired() => entry.value.len(),
            _ => 0,
        }
    }

    pub fn ltrim(&self, key: &str, start: i64, stop: i64) -> bool {
        if let Some(mut entry) = self.lists.get_mut(key) {
            let kept = {
                let len = entry.value.len() as i64;
                let norm = |i: i64| -> i64 {
                    if i < 0 { (len + i).max(0) } else { i.min(len - 1) }
                };
                if len == 0 {
                    VecDeque::new()
                } else {
                    let (a, b) = (norm(start), norm(stop));
                    if a > b {
                        VecDeque::new()
                    } else {
                        entry
                            .value
                            .iter()
                            .skip(a as usize)
                            .take((b - a + 1) as usize)
                            .cloned()
                            .collect()
                    }
                }
            };
            entry.value = kept;
        }
        true
    }

    // ---- geo ----

    /// One location per member; re-adding overwrites.
    pub fn geo_add(&self, key: &str, lon: f64, lat: f64, member: &str) -> bool {
        self.geo
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), (lon, lat));
        true
    }

    /// Members within `radius_km` of the point, closest first.
    pub fn geo_radius(&self, key: &str, lon: f64, lat: f64, radius_km: f64) -> Vec<String> {
        let Some(members) = self.geo.get(key) else {
            return Vec::new();
        };
        let mut hits: Vec<(String, f64)> = members
            .iter()
            .filter_map(|(member, (mlon, mlat))| {
                let d = haversine_km(lon, lat, *mlon, *mlat);
                (d <= radius_km).then(|| (member.clone(), d))
            })
            .collect();
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.into_iter().map(|(m, _)| m).collect()
    }
}

fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_ttl_expiry() {
        let broker = MemoryBroker::new();
        broker.set("k", "v", Some(Duration::from_millis(20)));
        assert_eq!(broker.get("k"), Some("v".to_string()));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(broker.get("k"), None);
    }

    #[test]
    fn test_incr_creates_and_counts() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.incr("counter"), Some(1));
        assert_eq!(broker.incr("counter"), Some(2));
    }

    #[test]
    fn test_keys_prefix_pattern() {
        let broker = MemoryBroker::new();
        broker.set("books:search:a", "1", None);
        broker.set("books:search:b", "1", None);
        broker.set("books:popular:fiction", "1", None);
        let mut keys = broker.keys("books:search:*");
        keys.sort();
        assert_eq!(keys, vec!["books:search:a", "books:search:b"]);
    }

    #[test]
    fn test_list_fifo() {
        let broker = MemoryBroker::new();
        broker.rpush("q", "a");
        broker.rpush("q", "b");
        assert_eq!(broker.lpop("q"), Some("a".to_string()));
        assert_eq!(broker.lpop("q"), Some("b".to_string()));
        assert_eq!(broker.lpop("q"), None);
    }

    #[test]
    fn test_ltrim_keeps_tail() {
        let broker = MemoryBroker::new();
        for i in 0..5 {
            broker.rpush("l", &i.to_string());
        }
        broker.ltrim("l", -3, -1);
        assert_eq!(broker.lrange("l", 0, -1), vec!["2", "3", "4"]);
    }

    #[test]
    fn test_geo_radius_haversine() {
        let broker = MemoryBroker::new();
        // Manhattan locations roughly 1 km apart, plus one in Brooklyn.
        broker.geo_add("geo:books", -74.0060, 40.7128, "downtown");
        broker.geo_add("geo:books", -73.9855, 40.7580, "midtown");
        broker.geo_add("geo:books", -73.9442, 40.6782, "brooklyn");

        let near = broker.geo_radius("geo:books", -74.0060, 40.7128, 2.0);
        assert_eq!(near, vec!["downtown"]);

        let wider = broker.geo_radius("geo:books", -74.0060, 40.7128, 10.0);
        assert_eq!(wider.len(), 3);
        assert_eq!(wider[0], "downtown");
    }

    #[test]
    fn test_geo_readd_overwrites() {
        let broker = MemoryBroker::new();
        broker.geo_add("geo:books", -74.0, 40.7, "b1");
        broker.geo_add("geo:books", 2.3522, 48.8566, "b1");
        assert!(broker.geo_radius("geo:books", -74.0, 40.7, 5.0).is_empty());
        assert_eq!(
            broker.geo_radius("geo:books", 2.3522, 48.8566, 5.0),
            vec!["b1"]
        );
    }

    #[test]
    fn test_zrem_reaches_geo_members() {
        let broker = MemoryBroker::new();
        broker.geo_add("geo:books", -74.0, 40.7, "b1");
        assert!(broker.zrem("geo:books", "b1"));
        assert!(broker.geo_radius("geo:books", -74.0, 40.7, 5.0).is_empty());
    }

    #[test]
    fn test_zrangebyscore_ordering() {
        let broker = MemoryBroker::new();
        broker.zadd("z", "late", 300.0);
        broker.zadd("z", "early", 100.0);
        broker.zadd("z", "future", 900.0);
        assert_eq!(broker.zrangebyscore("z", 500.0), vec!["early", "late"]);
    }
}
