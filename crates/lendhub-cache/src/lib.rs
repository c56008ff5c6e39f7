//! Look-aside caching infrastructure for the Lendhub marketplace.
//!
//! ## Architecture
//!
//! - **`ConnectionManager`**: owns the single broker connection and exposes
//!   degrade-safe primitives. Every primitive returns a neutral value when
//!   the broker is unreachable; no error ever propagates to callers.
//! - **`CacheService`**: domain operations on top of the connection manager —
//!   search-result caching, geospatial "nearby books", popularity lists,
//!   community stats, sessions, and the online-presence set. Owns the
//!   key-naming scheme and the TTL policy.
//! - **`RateLimiter`**: fixed-window counters per `(identifier, class)`.
//!
//! ## Graceful degradation
//!
//! The broker can back onto Redis, an in-process memory store (single
//! instance, tests), or nothing at all. In the offline mode the application
//! keeps working against the source of truth, just without the cache.

pub mod connection;
pub mod keys;
pub mod memory;
pub mod ratelimit;
pub mod service;

pub use connection::{ConnectionManager, RedisConfig};
pub use ratelimit::{LimitClass, RateLimitDecision, RateLimiter};
pub use service::{CacheHealth, CacheService, TtlClass};
