//! Cross-run coordination: the sync lock and the read-side cache version token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::StoreError;

pub const LISTING_CACHE_PREFIX: &str = "api:product-prices:index";
pub const DEFAULT_CACHE_VERSION_KEY: &str = "api:product-prices:version";

/// Proof of a granted lock; only the holder's token can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub token: Uuid,
}

/// Named, TTL-bounded, non-blocking mutual exclusion.
#[async_trait]
pub trait SyncLock: Send + Sync {
    /// `Ok(None)` means another holder owns an unexpired lease.
    async fn try_acquire(&self, name: &str, ttl: Duration)
        -> Result<Option<LockHandle>, StoreError>;

    async fn release(&self, handle: LockHandle) -> Result<(), StoreError>;
}

/// Write side of the cache version token.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self) -> Result<(), StoreError>;
}

/// Read side of the cache version token; a missing token is created on first read.
#[async_trait]
pub trait CacheVersion: Send + Sync {
    async fn current(&self) -> Result<String, StoreError>;
}

/// Cache key for one listing query under the given version token.
pub fn listing_cache_key(version: &str, query_string: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query_string.as_bytes());
    format!(
        "{LISTING_CACHE_PREFIX}:{version}:{}",
        hex::encode(hasher.finalize())
    )
}

#[derive(Debug, Default)]
pub struct MemorySyncLock {
    leases: Mutex<HashMap<String, (Uuid, Instant)>>,
    fail_release: AtomicBool,
}

impl MemorySyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `release` error out, as an unreachable lock backend would.
    pub fn fail_release(&self, enabled: bool) {
        self.fail_release.store(enabled, Ordering::SeqCst);
    }

    pub async fn is_held(&self, name: &str) -> bool {
        self.leases
            .lock()
            .await
            .get(name)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }
}

#[async_trait]
impl SyncLock for MemorySyncLock {
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<LockHandle>, StoreError> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = leases.get(name) {
            if *expires_at > now {
                return Ok(None);
            }
            debug!(lock = name, "taking over expired lease");
        }
        let token = Uuid::new_v4();
        leases.insert(name.to_string(), (token, now + ttl));
        Ok(Some(LockHandle {
            name: name.to_string(),
            token,
        }))
    }

    async fn release(&self, handle: LockHandle) -> Result<(), StoreError> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("lock backend unavailable".to_string()));
        }
        let mut leases = self.leases.lock().await;
        if leases
            .get(&handle.name)
            .is_some_and(|(token, _)| *token == handle.token)
        {
            leases.remove(&handle.name);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCacheVersion {
    version: RwLock<Option<Uuid>>,
    invalidations: AtomicUsize,
}

impl MemoryCacheVersion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheInvalidator for MemoryCacheVersion {
    async fn invalidate(&self) -> Result<(), StoreError> {
        *self.version.write().await = Some(Uuid::new_v4());
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl CacheVersion for MemoryCacheVersion {
    async fn current(&self) -> Result<String, StoreError> {
        if let Some(version) = *self.version.read().await {
            return Ok(version.to_string());
        }
        let mut slot = self.version.write().await;
        Ok(slot.get_or_insert_with(Uuid::new_v4).to_string())
    }
}

/// Lock leases stored as rows of `sync_locks`; an expired row is taken over in place.
#[derive(Debug, Clone)]
pub struct PgSyncLock {
    pool: PgPool,
}

impl PgSyncLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncLock for PgSyncLock {
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<LockHandle>, StoreError> {
        let token = Uuid::new_v4();
        let granted = sqlx::query(
            r#"
            INSERT INTO sync_locks (name, token, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (name) DO UPDATE
               SET token = EXCLUDED.token,
                   expires_at = EXCLUDED.expires_at
             WHERE sync_locks.expires_at <= NOW()
            RETURNING token
            "#,
        )
        .bind(name)
        .bind(token)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(granted.map(|_| LockHandle {
            name: name.to_string(),
            token,
        }))
    }

    async fn release(&self, handle: LockHandle) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_locks WHERE name = $1 AND token = $2")
            .bind(&handle.name)
            .bind(handle.token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Version token stored in `cache_versions` under a single key.
#[derive(Debug, Clone)]
pub struct PgCacheVersion {
    pool: PgPool,
    key: String,
}

impl PgCacheVersion {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            key: DEFAULT_CACHE_VERSION_KEY.to_string(),
        }
    }
}

#[async_trait]
impl CacheInvalidator for PgCacheVersion {
    async fn invalidate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cache_versions (key, version, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE
               SET version = EXCLUDED.version,
                   updated_at = NOW()
            "#,
        )
        .bind(&self.key)
        .bind(Uuid::new_v4())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CacheVersion for PgCacheVersion {
    async fn current(&self) -> Result<String, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO cache_versions (key, version, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET key = cache_versions.key
            RETURNING version
            "#,
        )
        .bind(&self.key)
        .bind(Uuid::new_v4())
        .fetch_one(&self.pool)
        .await?;
        let version: Uuid = row.try_get("version")?;
        Ok(version.to_string())
    }
}
