//! Lock-guarded entry points for a reconciliation run.
//!
//! A run moves through [`SyncPhase`]s: the coarse lock is requested without
//! waiting, the engine runs under a timeout equal to the lock TTL, and on every
//! path past a granted lock the lock is released and the listing cache version is
//! bumped. Callers never see error detail, only a [`SyncOutcome`].

use std::sync::Arc;
use std::time::Duration;

use catsync_core::{SyncCounts, SyncKind};
use catsync_storage::{CacheInvalidator, LockHandle, SyncLock};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::engine::SyncEngine;
use crate::SyncError;

pub const DEFAULT_LOCK_NAME: &str = "sync:catalog";
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    LockRequested,
    LockDenied,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "counts", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncCounts),
    /// Another run holds the lock; nothing was read or written.
    Conflict,
    Failed,
}

impl SyncOutcome {
    pub fn counts(&self) -> SyncCounts {
        match self {
            SyncOutcome::Completed(counts) => *counts,
            SyncOutcome::Conflict | SyncOutcome::Failed => SyncCounts::zero(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub lock_name: String,
    pub lock_ttl: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }
}

pub struct SyncCoordinator {
    engine: SyncEngine,
    lock: Arc<dyn SyncLock>,
    cache: Arc<dyn CacheInvalidator>,
    config: CoordinatorConfig,
}

impl SyncCoordinator {
    pub fn new(
        engine: SyncEngine,
        lock: Arc<dyn SyncLock>,
        cache: Arc<dyn CacheInvalidator>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            engine,
            lock,
            cache,
            config,
        }
    }

    pub async fn run_product_sync(&self) -> SyncOutcome {
        self.run(SyncKind::Products).await
    }

    pub async fn run_price_sync(&self) -> SyncOutcome {
        self.run(SyncKind::Prices).await
    }

    pub async fn run(&self, kind: SyncKind) -> SyncOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("catalog_sync", kind = %kind, run_id = %run_id);
        self.run_locked(kind, run_id).instrument(span).await
    }

    async fn run_locked(&self, kind: SyncKind, run_id: Uuid) -> SyncOutcome {
        let ttl = self.config.lock_ttl;
        enter(SyncPhase::LockRequested);
        let handle = match self.lock.try_acquire(&self.config.lock_name, ttl).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                enter(SyncPhase::LockDenied);
                warn!(lock = %self.config.lock_name, "another sync holds the lock");
                enter(SyncPhase::Idle);
                return SyncOutcome::Conflict;
            }
            Err(err) => {
                enter(SyncPhase::Failed);
                error!(error = %err, "could not request the sync lock");
                invalidate_cache(self.cache.as_ref()).await;
                enter(SyncPhase::Idle);
                return SyncOutcome::Failed;
            }
        };

        let guard = RunGuard::new(self.lock.clone(), self.cache.clone(), handle);
        enter(SyncPhase::Running);
        let result = match tokio::time::timeout(ttl, self.engine.run(kind, run_id)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(ttl)),
        };

        let outcome = match result {
            Ok(counts) => {
                enter(SyncPhase::Completed);
                info!(
                    processed = counts.processed,
                    inserted = counts.inserted,
                    updated = counts.updated,
                    deleted = counts.deleted,
                    "sync completed"
                );
                SyncOutcome::Completed(counts)
            }
            Err(err) => {
                enter(SyncPhase::Failed);
                error!(error = %err, "sync failed; transaction rolled back");
                SyncOutcome::Failed
            }
        };
        guard.finish().await;
        enter(SyncPhase::Idle);
        outcome
    }
}

fn enter(phase: SyncPhase) {
    debug!(?phase, "sync phase");
}

async fn release_lock(lock: &dyn SyncLock, handle: LockHandle) {
    if let Err(err) = lock.release(handle).await {
        warn!(error = %err, "sync lock release failed; lease will expire on its own");
    }
}

async fn invalidate_cache(cache: &dyn CacheInvalidator) {
    if let Err(err) = cache.invalidate().await {
        error!(error = %err, "listing cache invalidation failed");
    }
}

/// Releases the lock and bumps the cache version once the run is over, even when
/// the run future is dropped before finishing.
struct RunGuard {
    lock: Arc<dyn SyncLock>,
    cache: Arc<dyn CacheInvalidator>,
    handle: Option<LockHandle>,
}

impl RunGuard {
    fn new(lock: Arc<dyn SyncLock>, cache: Arc<dyn CacheInvalidator>, handle: LockHandle) -> Self {
        Self {
            lock,
            cache,
            handle: Some(handle),
        }
    }

    async fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            release_lock(self.lock.as_ref(), handle).await;
            invalidate_cache(self.cache.as_ref()).await;
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        warn!("sync run cancelled; releasing lock in the background");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let lock = self.lock.clone();
                let cache = self.cache.clone();
                runtime.spawn(async move {
                    release_lock(lock.as_ref(), handle).await;
                    invalidate_cache(cache.as_ref()).await;
                });
            }
            Err(_) => warn!("no runtime to release the sync lock; lease will expire on its own"),
        }
    }
}
