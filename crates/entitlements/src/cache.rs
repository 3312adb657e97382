//! Per-user add-on entitlement cache
//!
//! Hot-path checks elsewhere cache "does this user hold a seat of add-on X"
//! under a `(family, user)` key. Every writer that changes seat assignments
//! invalidates the matching entries in the same operation.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use seatkeeper_shared::UserId;

use crate::catalog::AddOnName;
use crate::error::{EntitlementError, EntitlementResult};

/// Default cache TTL (1 hour)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Typed cache key, rendered as `"<family>:<user_id>"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserAddOnCacheKey {
    pub family: AddOnName,
    pub user_id: UserId,
}

impl UserAddOnCacheKey {
    pub fn new(family: AddOnName, user_id: UserId) -> Self {
        Self { family, user_id }
    }
}

impl std::fmt::Display for UserAddOnCacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.family.cache_family(), self.user_id)
    }
}

/// Cache shared by readers (entitlement checks) and writers (seat changes)
#[async_trait]
pub trait UserEntitlementCache: Send + Sync {
    async fn get(&self, key: &UserAddOnCacheKey) -> EntitlementResult<Option<bool>>;

    async fn set(&self, key: &UserAddOnCacheKey, value: bool) -> EntitlementResult<()>;

    async fn invalidate(&self, keys: &[UserAddOnCacheKey]) -> EntitlementResult<()>;
}

/// Cache entry with expiration
#[derive(Clone)]
struct CacheEntry {
    value: bool,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: bool, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Thread-safe in-memory cache with TTL
pub struct InMemoryUserCache {
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for InMemoryUserCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserCache {
    /// Create a new cache with default TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    /// Create a new cache with custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Clear expired entries (call periodically for memory management)
    pub fn cleanup(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, entry| !entry.is_expired());
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserEntitlementCache for InMemoryUserCache {
    async fn get(&self, key: &UserAddOnCacheKey) -> EntitlementResult<Option<bool>> {
        let cache = self
            .cache
            .read()
            .map_err(|_| EntitlementError::Cache("cache lock poisoned".to_string()))?;

        Ok(cache
            .get(&key.to_string())
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value))
    }

    async fn set(&self, key: &UserAddOnCacheKey, value: bool) -> EntitlementResult<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| EntitlementError::Cache("cache lock poisoned".to_string()))?;
        cache.insert(key.to_string(), CacheEntry::new(value, self.ttl));
        Ok(())
    }

    async fn invalidate(&self, keys: &[UserAddOnCacheKey]) -> EntitlementResult<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| EntitlementError::Cache("cache lock poisoned".to_string()))?;
        for key in keys {
            cache.remove(&key.to_string());
        }
        Ok(())
    }
}

/// Redis-backed cache shared across processes
#[derive(Clone)]
pub struct RedisUserCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisUserCache {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }
}

#[async_trait]
impl UserEntitlementCache for RedisUserCache {
    async fn get(&self, key: &UserAddOnCacheKey) -> EntitlementResult<Option<bool>> {
        let mut conn = self.conn.clone();
        let value: Option<u8> = redis::cmd("GET")
            .arg(key.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(value.map(|v| v == 1))
    }

    async fn set(&self, key: &UserAddOnCacheKey, value: bool) -> EntitlementResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key.to_string())
            .arg(u8::from(value))
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn invalidate(&self, keys: &[UserAddOnCacheKey]) -> EntitlementResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let _: i64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(())
    }
}
