//! Broker connection ownership and degrade-safe primitives.
//!
//! The `ConnectionManager` is constructed once at application start and
//! shared (`Arc`) by the cache service, rate limiter and job queue. Every
//! primitive fails open: a broker error or timeout is logged and mapped to
//! a neutral value (`None`, `false`, empty) instead of propagating. The
//! application must stay correct against the source of truth when the
//! broker is down — just slower.

use std::time::Duration;

use deadpool_redis::Pool;
use redis::AsyncCommands;
use redis::geo::{Coord, RadiusOptions, Unit};
use serde::{Deserialize, Serialize};

use crate::memory::MemoryBroker;

const SELFTEST_KEY: &str = "lendhub:selftest";

/// Broker connection configuration.
///
/// Absence of `url` does not fail startup: with `memory_fallback` the
/// manager runs an in-process broker, otherwise it comes up offline and
/// every cache/job feature degrades to a documented no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Connection URL, e.g. `redis://localhost:6379` or `rediss://...` for TLS.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Retry ceiling for the initial connection, with exponential backoff.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Fall back to the in-process broker when Redis is unavailable.
    #[serde(default = "default_memory_fallback")]
    pub memory_fallback: bool,
}

fn default_enabled() -> bool {
    true
}
fn default_pool_size() -> usize {
    16
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_command_timeout_ms() -> u64 {
    2_000
}
fn default_connect_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_memory_fallback() -> bool {
    true
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            url: None,
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            memory_fallback: default_memory_fallback(),
        }
    }
}

enum Broker {
    /// Shared Redis instance (production, multi-instance deployments).
    Redis { pool: Pool },
    /// In-process broker (single instance, tests).
    Memory(MemoryBroker),
    /// Permanently degraded; every primitive returns its neutral value.
    Offline,
}

/// Owner of the single logical broker connection.
pub struct ConnectionManager {
    inner: Broker,
    command_timeout: Duration,
}

impl ConnectionManager {
    /// Connect according to configuration.
    ///
    /// Runs a startup round-trip (PING, then a scoped SET/GET/DEL
    /// self-test) before declaring readiness. Connection failures retry
    /// with exponential backoff up to `connect_attempts`; once the ceiling
    /// is reached the manager stops retrying and the process continues in
    /// degraded mode.
    pub async fn connect(config: &RedisConfig) -> Self {
        let command_timeout = Duration::from_millis(config.command_timeout_ms);

        if !config.enabled {
            tracing::info!("broker disabled, caching and job features are off");
            return Self::offline();
        }

        let Some(url) = config.url.as_deref() else {
            if config.memory_fallback {
                tracing::info!("no broker url configured, using in-process broker");
                return Self::memory_with_timeout(command_timeout);
            }
            tracing::warn!("no broker url configured and memory fallback disabled, running degraded");
            return Self::offline();
        };

        tracing::info!(url = %url, "connecting to broker");

        let mut backoff = Duration::from_millis(config.backoff_base_ms);
        for attempt in 1..=config.connect_attempts.max(1) {
            match Self::try_connect(url, config).await {
                Ok(pool) => {
                    tracing::info!(attempt, "broker connection established");
                    return Self {
                        inner: Broker::Redis { pool },
                        command_timeout,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = config.connect_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "broker connection failed"
                    );
                    if attempt < config.connect_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        if config.memory_fallback {
            tracing::warn!("broker unreachable, falling back to in-process broker");
            Self::memory_with_timeout(command_timeout)
        } else {
            tracing::warn!("broker unreachable, running in degraded mode");
            Self::offline()
        }
    }

    /// In-process broker, used by tests and single-instance deployments.
    pub fn memory() -> Self {
        Self::memory_with_timeout(Duration::from_millis(default_command_timeout_ms()))
    }

    fn memory_with_timeout(command_timeout: Duration) -> Self {
        Self {
            inner: Broker::Memory(MemoryBroker::new()),
            command_timeout,
        }
    }

    /// Permanently degraded manager; every primitive returns its neutral value.
    pub fn offline() -> Self {
        Self {
            inner: Broker::Offline,
            command_timeout: Duration::from_millis(default_command_timeout_ms()),
        }
    }

    async fn try_connect(url: &str, config: &RedisConfig) -> Result<Pool, String> {
        let mut pool_config = deadpool_redis::Config::from_url(url);
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        if let Some(ref mut pc) = pool_config.pool {
            pc.max_size = config.pool_size;
            pc.timeouts.wait = Some(connect_timeout);
            pc.timeouts.create = Some(connect_timeout);
            pc.timeouts.recycle = Some(connect_timeout);
        }

        let pool = pool_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| format!("failed to create pool: {e}"))?;

        Self::self_test(&pool, connect_timeout).await?;
        Ok(pool)
    }

    /// PING plus a scoped set/get/delete round-trip.
    async fn self_test(pool: &Pool, timeout: Duration) -> Result<(), String> {
        let fut = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| format!("failed to get connection: {e}"))?;

            let pong: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| format!("ping failed: {e}"))?;
            if pong != "PONG" {
                return Err(format!("unexpected ping reply: {pong}"));
            }

            conn.set_ex::<_, _, ()>(SELFTEST_KEY, "ok", 10)
                .await
                .map_err(|e| format!("self-test set failed: {e}"))?;
            let got: Option<String> = conn
                .get(SELFTEST_KEY)
                .await
                .map_err(|e| format!("self-test get failed: {e}"))?;
            conn.del::<_, i64>(SELFTEST_KEY)
                .await
                .map_err(|e| format!("self-test del failed: {e}"))?;

            if got.as_deref() == Some("ok") {
                Ok(())
            } else {
                Err("self-test value mismatch".to_string())
            }
        };

        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| "self-test timed out".to_string())?
    }

    /// True unless the manager is in the permanently degraded mode.
    pub fn is_connected(&self) -> bool {
        !matches!(self.inner, Broker::Offline)
    }

    /// Live health round-trip.
    pub async fn ping(&self) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(_) => true,
            Broker::Redis { pool } => {
                let fut = async {
                    let mut conn = pool.get().await.ok()?;
                    redis::cmd("PING")
                        .query_async::<String>(&mut conn)
                        .await
                        .ok()
                };
                matches!(
                    tokio::time::timeout(self.command_timeout, fut).await,
                    Ok(Some(ref pong)) if pong == "PONG"
                )
            }
        }
    }

    /// Close the connection; in-flight commands settle as the pool drains.
    pub async fn shutdown(&self) {
        if let Broker::Redis { pool } = &self.inner {
            pool.close();
            tracing::info!("broker connection closed");
        }
    }

    async fn conn(&self, pool: &Pool) -> Option<deadpool_redis::Connection> {
        match pool.get().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::warn!(error = %e, "failed to get broker connection");
                None
            }
        }
    }

    /// Run one command future against the command timeout, mapping any
    /// error or timeout to the neutral value.
    async fn run<T, F>(&self, command: &str, key: &str, neutral: T, fut: F) -> T
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!(command, key = %key, error = %e, "broker command error");
                neutral
            }
            Err(_) => {
                tracing::warn!(
                    command,
                    key = %key,
                    timeout_ms = self.command_timeout.as_millis() as u64,
                    "broker command timed out"
                );
                neutral
            }
        }
    }

    // ---- string primitives ----

    pub async fn get(&self, key: &str) -> Option<String> {
        match &self.inner {
            Broker::Offline => None,
            Broker::Memory(m) => m.get(key),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return None;
                };
                self.run("GET", key, None, conn.get::<_, Option<String>>(key))
                    .await
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => m.set(key, value, Some(ttl)),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                let secs = ttl.as_secs().max(1);
                self.run("SETEX", key, None, async {
                    conn.set_ex::<_, _, ()>(key, value, secs).await.map(Some)
                })
                .await
                .is_some()
            }
        }
    }

    pub async fn del(&self, key: &str) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => m.del(key),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                self.run("DEL", key, 0i64, conn.del::<_, i64>(key)).await > 0
            }
        }
    }

    /// Delete every key matching a `prefix:*` pattern. Returns the number
    /// of keys removed. Walks the keyspace with SCAN so the sweep never
    /// blocks the broker on a large database.
    pub async fn del_pattern(&self, pattern: &str) -> u64 {
        match &self.inner {
            Broker::Offline => 0,
            Broker::Memory(m) => {
                let keys = m.keys(pattern);
                let mut removed = 0;
                for key in keys {
                    if m.del(&key) {
                        removed += 1;
                    }
                }
                removed
            }
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return 0;
                };
                let mut removed = 0u64;
                let mut cursor = 0u64;
                loop {
                    // Timeouts and errors yield the neutral (0, [])
                    // cursor, which ends the sweep.
                    let (next, batch) = self
                        .run("SCAN", pattern, (0, Vec::new()), async {
                            redis::cmd("SCAN")
                                .arg(cursor)
                                .arg("MATCH")
                                .arg(pattern)
                                .arg("COUNT")
                                .arg(100)
                                .query_async::<(u64, Vec<String>)>(&mut conn)
                                .await
                        })
                        .await;
                    if !batch.is_empty() {
                        removed += self
                            .run("DEL", pattern, 0i64, conn.del::<_, i64>(batch))
                            .await as u64;
                    }
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                removed
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => m.exists(key),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                self.run("EXISTS", key, false, conn.exists::<_, bool>(key))
                    .await
            }
        }
    }

    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        match &self.inner {
            Broker::Offline => Vec::new(),
            Broker::Memory(m) => m.keys(pattern),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return Vec::new();
                };
                self.run("KEYS", pattern, Vec::new(), conn.keys::<_, Vec<String>>(pattern))
                    .await
            }
        }
    }

    pub async fn incr(&self, key: &str) -> Option<i64> {
        match &self.inner {
            Broker::Offline => None,
            Broker::Memory(m) => m.incr(key),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return None;
                };
                self.run("INCR", key, None, async {
                    conn.incr::<_, _, i64>(key, 1i64).await.map(Some)
                })
                .await
            }
        }
    }

    /// Remaining TTL in seconds; `None` when the key is missing or the
    /// broker is unreachable, `Some(-1)` when the key has no expiry.
    pub async fn ttl(&self, key: &str) -> Option<i64> {
        match &self.inner {
            Broker::Offline => None,
            Broker::Memory(m) => m.ttl(key),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return None;
                };
                let ttl = self
                    .run("TTL", key, -2i64, conn.ttl::<_, i64>(key))
                    .await;
                (ttl != -2).then_some(ttl)
            }
        }
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => m.expire(key, ttl),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                self.run(
                    "EXPIRE",
                    key,
                    false,
                    conn.expire::<_, bool>(key, ttl.as_secs().max(1) as i64),
                )
                .await
            }
        }
    }

    // ---- set primitives ----

    pub async fn sadd(&self, key: &str, member: &str) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => {
                m.sadd(key, member);
                true
            }
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                self.run("SADD", key, None, async {
                    conn.sadd::<_, _, i64>(key, member).await.map(Some)
                })
                .await
                .is_some()
            }
        }
    }

    pub async fn srem(&self, key: &str, member: &str) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => m.srem(key, member),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                self.run("SREM", key, 0i64, conn.srem::<_, _, i64>(key, member))
                    .await
                    > 0
            }
        }
    }

    pub async fn smembers(&self, key: &str) -> Vec<String> {
        match &self.inner {
            Broker::Offline => Vec::new(),
            Broker::Memory(m) => m.smembers(key),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return Vec::new();
                };
                self.run("SMEMBERS", key, Vec::new(), conn.smembers::<_, Vec<String>>(key))
                    .await
            }
        }
    }

    pub async fn scard(&self, key: &str) -> usize {
        match &self.inner {
            Broker::Offline => 0,
            Broker::Memory(m) => m.scard(key),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return 0;
                };
                self.run("SCARD", key, 0i64, conn.scard::<_, i64>(key)).await as usize
            }
        }
    }

    // ---- geospatial primitives ----

    pub async fn geo_add(&self, key: &str, lon: f64, lat: f64, member: &str) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => m.geo_add(key, lon, lat, member),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                self.run("GEOADD", key, None, async {
                    conn.geo_add::<_, _, i64>(key, (Coord::lon_lat(lon, lat), member))
                        .await
                        .map(Some)
                })
                .await
                .is_some()
            }
        }
    }

    pub async fn geo_radius(&self, key: &str, lon: f64, lat: f64, radius_km: f64) -> Vec<String> {
        match &self.inner {
            Broker::Offline => Vec::new(),
            Broker::Memory(m) => m.geo_radius(key, lon, lat, radius_km),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return Vec::new();
                };
                self.run(
                    "GEORADIUS",
                    key,
                    Vec::new(),
                    conn.geo_radius::<_, Vec<String>>(
                        key,
                        lon,
                        lat,
                        radius_km,
                        Unit::Kilometers,
                        RadiusOptions::default(),
                    ),
                )
                .await
            }
        }
    }

    // ---- list / sorted-set broker primitives (job queues) ----

    pub async fn rpush(&self, key: &str, value: &str) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => {
                m.rpush(key, value);
                true
            }
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                self.run("RPUSH", key, None, async {
                    conn.rpush::<_, _, i64>(key, value).await.map(Some)
                })
                .await
                .is_some()
            }
        }
    }

    pub async fn lpop(&self, key: &str) -> Option<String> {
        match &self.inner {
            Broker::Offline => None,
            Broker::Memory(m) => m.lpop(key),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return None;
                };
                self.run("LPOP", key, None, conn.lpop::<_, Option<String>>(key, None))
                    .await
            }
        }
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        match &self.inner {
            Broker::Offline => Vec::new(),
            Broker::Memory(m) => m.lrange(key, start, stop),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return Vec::new();
                };
                self.run(
                    "LRANGE",
                    key,
                    Vec::new(),
                    conn.lrange::<_, Vec<String>>(key, start as isize, stop as isize),
                )
                .await
            }
        }
    }

    pub async fn llen(&self, key: &str) -> usize {
        match &self.inner {
            Broker::Offline => 0,
            Broker::Memory(m) => m.llen(key),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return 0;
                };
                self.run("LLEN", key, 0i64, conn.llen::<_, i64>(key)).await as usize
            }
        }
    }

    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => m.ltrim(key, start, stop),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                self.run("LTRIM", key, None, async {
                    conn.ltrim::<_, ()>(key, start as isize, stop as isize)
                        .await
                        .map(Some)
                })
                .await
                .is_some()
            }
        }
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => m.zadd(key, member, score),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                self.run("ZADD", key, None, async {
                    conn.zadd::<_, _, _, i64>(key, member, score).await.map(Some)
                })
                .await
                .is_some()
            }
        }
    }

    /// Members with score at or below `max`, lowest score first.
    pub async fn zrangebyscore(&self, key: &str, max: f64) -> Vec<String> {
        match &self.inner {
            Broker::Offline => Vec::new(),
            Broker::Memory(m) => m.zrangebyscore(key, max),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return Vec::new();
                };
                self.run(
                    "ZRANGEBYSCORE",
                    key,
                    Vec::new(),
                    conn.zrangebyscore::<_, _, _, Vec<String>>(key, "-inf", max),
                )
                .await
            }
        }
    }

    pub async fn zrem(&self, key: &str, member: &str) -> bool {
        match &self.inner {
            Broker::Offline => false,
            Broker::Memory(m) => m.zrem(key, member),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return false;
                };
                self.run("ZREM", key, 0i64, conn.zrem::<_, _, i64>(key, member))
                    .await
                    > 0
            }
        }
    }

    pub async fn zcard(&self, key: &str) -> usize {
        match &self.inner {
            Broker::Offline => 0,
            Broker::Memory(m) => m.zcard(key),
            Broker::Redis { pool } => {
                let Some(mut conn) = self.conn(pool).await else {
                    return 0;
                };
                self.run("ZCARD", key, 0i64, conn.zcard::<_, i64>(key)).await as usize
            }
        }
    }
}
