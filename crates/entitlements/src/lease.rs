//! Exclusive leases
//!
//! A lease is a named, TTL-bounded lock. Workers take one per purchase before
//! refreshing it; failing to get it means another worker is on the job.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use seatkeeper_shared::PurchaseId;
use uuid::Uuid;

use crate::error::{EntitlementError, EntitlementResult};

/// Releases only if the stored token still matches ours
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey(String);

impl LeaseKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Lease guarding assigned-user refresh of one purchase
    pub fn for_purchase_refresh(id: PurchaseId) -> Self {
        Self(format!("seatkeeper:add_on_purchase:{}:refresh_assigned_users", id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of holding a lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken(String);

impl LeaseToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[async_trait]
pub trait ExclusiveLease: Send + Sync {
    /// `None` when someone else holds the lease
    async fn try_obtain(
        &self,
        key: &LeaseKey,
        ttl: Duration,
    ) -> EntitlementResult<Option<LeaseToken>>;

    /// Release; returns `false` if the lease had expired or changed hands
    async fn cancel(&self, key: &LeaseKey, token: &LeaseToken) -> EntitlementResult<bool>;
}

/// Process-local leases
#[derive(Default)]
pub struct InMemoryLease {
    held: Mutex<HashMap<LeaseKey, (LeaseToken, Instant)>>,
}

impl InMemoryLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExclusiveLease for InMemoryLease {
    async fn try_obtain(
        &self,
        key: &LeaseKey,
        ttl: Duration,
    ) -> EntitlementResult<Option<LeaseToken>> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| EntitlementError::Lease("lease lock poisoned".to_string()))?;

        let now = Instant::now();
        if let Some((_, expires_at)) = held.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let token = LeaseToken::generate();
        held.insert(key.clone(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn cancel(&self, key: &LeaseKey, token: &LeaseToken) -> EntitlementResult<bool> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| EntitlementError::Lease("lease lock poisoned".to_string()))?;

        match held.get(key) {
            Some((current, _)) if current == token => {
                held.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Leases shared across workers through Redis
#[derive(Clone)]
pub struct RedisLease {
    conn: ConnectionManager,
}

impl RedisLease {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ExclusiveLease for RedisLease {
    async fn try_obtain(
        &self,
        key: &LeaseKey,
        ttl: Duration,
    ) -> EntitlementResult<Option<LeaseToken>> {
        let mut conn = self.conn.clone();
        let token = LeaseToken::generate();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(&token.0)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| EntitlementError::Lease(e.to_string()))?;

        Ok(reply.map(|_| token))
    }

    async fn cancel(&self, key: &LeaseKey, token: &LeaseToken) -> EntitlementResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key.as_str())
            .arg(&token.0)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| EntitlementError::Lease(e.to_string()))?;

        Ok(deleted == 1)
    }
}
