//! Bookmark-sync cache and per-user sync lock.
//!
//! ## Keys
//!
//! - `<prefix>:karakeep:index:<user_id>`: `{url_hash: bookmark_id}` snapshot,
//!   replaced wholesale after each sync
//! - `<prefix>:karakeep:lock:<user_id>`: lock record `{owner, acquired_at}`
//!
//! ## Lock Semantics
//!
//! Acquisition is a single `SET NX EX`, so at most one owner holds the key for
//! at most `sync_lock_ttl_secs`. Release deletes the key only if the stored
//! owner is ours, checked and deleted atomically by the store. A worker whose
//! lock expired and was taken over cannot release the new holder's lock.
//!
//! Without a store there is no cross-process exclusion: acquisition always
//! succeeds and release is a no-op that reports success.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::JsonCache;
use crate::config::CacheTtlConfig;
use crate::connection::ConnectionManager;
use crate::metrics;
use crate::store::OwnerRelease;

const DOMAIN: &str = "karakeep";
const INDEX_PART: &str = "index";
const LOCK_PART: &str = "lock";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshot of a user's synced bookmarks: URL hash → bookmark id.
pub type BookmarkIndex = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner: String,
    #[serde(with = "time::serde::rfc3339")]
    pub acquired_at: OffsetDateTime,
}

/// Opaque owner id: process id plus a random suffix.
pub fn default_owner_id() -> String {
    format!("{}-{}", std::process::id(), Uuid::new_v4().simple())
}

#[derive(Clone)]
pub struct SyncCache {
    cache: JsonCache,
    owner: String,
    index_ttl_secs: u64,
    lock_ttl_secs: u64,
    poll_interval: Duration,
}

impl SyncCache {
    pub fn new(manager: Arc<ConnectionManager>, ttls: &CacheTtlConfig) -> Self {
        let enabled = manager.config().sync_cache_enabled;
        Self {
            cache: JsonCache::new(manager, DOMAIN, enabled),
            owner: default_owner_id(),
            index_ttl_secs: ttls.bookmark_index_ttl_secs,
            lock_ttl_secs: ttls.sync_lock_ttl_secs,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Use a specific owner id for lock records.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn enabled(&self) -> bool {
        self.cache.enabled()
    }

    pub async fn get_bookmark_index(&self, user_id: i64) -> Option<BookmarkIndex> {
        let user = user_id.to_string();
        self.cache.get_json(&[INDEX_PART, &user]).await
    }

    pub async fn set_bookmark_index(&self, user_id: i64, index: &BookmarkIndex) -> bool {
        let user = user_id.to_string();
        self.cache
            .set_json(index, self.index_ttl_secs, &[INDEX_PART, &user])
            .await
    }

    pub async fn invalidate_bookmark_index(&self, user_id: i64) -> bool {
        let user = user_id.to_string();
        self.cache.delete(&[INDEX_PART, &user]).await
    }

    /// Try to take the sync lock for `user_id`.
    ///
    /// With `wait`, retries every poll interval until the lock TTL has elapsed.
    pub async fn acquire_sync_lock(&self, user_id: i64, wait: bool) -> bool {
        let user = user_id.to_string();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.lock_ttl_secs);

        loop {
            let record = LockRecord {
                owner: self.owner.clone(),
                acquired_at: OffsetDateTime::now_utc(),
            };
            match self
                .cache
                .set_if_absent_json(&record, self.lock_ttl_secs, &[LOCK_PART, &user])
                .await
            {
                Some(true) => {
                    tracing::info!(user_id, owner = %self.owner, "sync lock acquired");
                    metrics::record_lock_acquisition("acquired");
                    return true;
                }
                None => {
                    tracing::warn!(
                        user_id,
                        "cache store unavailable, proceeding without cross-process sync lock"
                    );
                    metrics::record_lock_acquisition("unguarded");
                    return true;
                }
                Some(false) => {
                    if !wait || tokio::time::Instant::now() + self.poll_interval > deadline {
                        tracing::debug!(user_id, "sync lock held by another worker");
                        metrics::record_lock_acquisition("contended");
                        return false;
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Release the lock if this cache's owner holds it.
    pub async fn release_sync_lock(&self, user_id: i64) -> bool {
        let user = user_id.to_string();
        match self
            .cache
            .delete_if_owner(&[LOCK_PART, &user], &self.owner)
            .await
        {
            Some(OwnerRelease::Released) => {
                tracing::info!(user_id, owner = %self.owner, "sync lock released");
                true
            }
            Some(OwnerRelease::HeldByOther) => {
                tracing::warn!(
                    user_id,
                    owner = %self.owner,
                    "sync lock is owned by another worker, not releasing"
                );
                false
            }
            Some(OwnerRelease::NotHeld) => {
                tracing::debug!(user_id, "sync lock already gone");
                false
            }
            None => true,
        }
    }

    /// Delete the lock regardless of owner (operator recovery).
    pub async fn force_release_sync_lock(&self, user_id: i64) -> bool {
        let user = user_id.to_string();
        let removed = self.cache.delete(&[LOCK_PART, &user]).await;
        if removed {
            tracing::warn!(user_id, "sync lock force-released");
        }
        removed
    }

    pub async fn is_sync_locked(&self, user_id: i64) -> bool {
        let user = user_id.to_string();
        self.cache.exists(&[LOCK_PART, &user]).await
    }

    pub async fn get_lock_info(&self, user_id: i64) -> Option<LockRecord> {
        let user = user_id.to_string();
        self.cache.get_json(&[LOCK_PART, &user]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::memory_manager;

    fn ttls() -> CacheTtlConfig {
        CacheTtlConfig {
            sync_lock_ttl_secs: 30,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bookmark_index_round_trip() {
        let (manager, _) = memory_manager();
        let cache = SyncCache::new(manager, &ttls());
        let index: BookmarkIndex = [("h1".to_string(), "bm-1".to_string())].into();

        assert!(cache.set_bookmark_index(7, &index).await);
        assert_eq!(cache.get_bookmark_index(7).await, Some(index));
        assert!(cache.invalidate_bookmark_index(7).await);
        assert_eq!(cache.get_bookmark_index(7).await, None);
    }

    #[tokio::test]
    async fn test_lock_exclusive_between_owners() {
        let (manager, _) = memory_manager();
        let a = SyncCache::new(manager.clone(), &ttls()).with_owner("worker-a");
        let b = SyncCache::new(manager, &ttls()).with_owner("worker-b");

        assert!(a.acquire_sync_lock(7, false).await);
        assert!(!b.acquire_sync_lock(7, false).await);
        assert!(a.is_sync_locked(7).await);

        // The loser cannot release the winner's lock
        assert!(!b.release_sync_lock(7).await);
        assert_eq!(a.get_lock_info(7).await.unwrap().owner, "worker-a");

        assert!(a.release_sync_lock(7).await);
        assert!(!a.is_sync_locked(7).await);
        assert!(b.acquire_sync_lock(7, false).await);
    }

    #[tokio::test]
    async fn test_locks_are_per_user() {
        let (manager, _) = memory_manager();
        let a = SyncCache::new(manager.clone(), &ttls()).with_owner("a");
        let b = SyncCache::new(manager, &ttls()).with_owner("b");
        assert!(a.acquire_sync_lock(1, false).await);
        assert!(b.acquire_sync_lock(2, false).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_acquires_after_holder_releases() {
        let (manager, _) = memory_manager();
        let holder = SyncCache::new(manager.clone(), &ttls()).with_owner("holder");
        let waiter = SyncCache::new(manager, &ttls()).with_owner("waiter");
        assert!(holder.acquire_sync_lock(7, false).await);

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            holder.release_sync_lock(7).await
        });

        assert!(waiter.acquire_sync_lock(7, true).await);
        assert!(release.await.unwrap());
        assert_eq!(waiter.get_lock_info(7).await.unwrap().owner, "waiter");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_after_lock_ttl() {
        let (manager, _) = memory_manager();
        let long_ttls = CacheTtlConfig {
            sync_lock_ttl_secs: 120,
            ..Default::default()
        };
        let holder = SyncCache::new(manager.clone(), &long_ttls).with_owner("holder");
        let waiter = SyncCache::new(manager, &ttls()).with_owner("waiter");
        assert!(holder.acquire_sync_lock(7, false).await);

        let started = tokio::time::Instant::now();
        let acquired = waiter.acquire_sync_lock(7, true).await;
        let waited = started.elapsed();

        assert!(!acquired);
        assert!(waited <= Duration::from_secs(30));
        assert!(waited >= Duration::from_secs(28));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_cannot_be_released_by_old_owner() {
        let (manager, _) = memory_manager();
        let slow = SyncCache::new(manager.clone(), &ttls()).with_owner("slow");
        let fresh = SyncCache::new(manager, &ttls()).with_owner("fresh");

        assert!(slow.acquire_sync_lock(7, false).await);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(fresh.acquire_sync_lock(7, false).await);

        assert!(!slow.release_sync_lock(7).await);
        assert_eq!(fresh.get_lock_info(7).await.unwrap().owner, "fresh");
    }

    #[tokio::test]
    async fn test_store_down_lock_always_granted() {
        let (manager, store) = memory_manager();
        store.set_available(false);
        let a = SyncCache::new(manager.clone(), &ttls()).with_owner("a");
        let b = SyncCache::new(manager, &ttls()).with_owner("b");

        assert!(a.acquire_sync_lock(7, false).await);
        assert!(b.acquire_sync_lock(7, true).await);
        assert!(a.release_sync_lock(7).await);
        assert!(!a.is_sync_locked(7).await);
        assert!(a.get_lock_info(7).await.is_none());
    }

    #[tokio::test]
    async fn test_force_release() {
        let (manager, _) = memory_manager();
        let a = SyncCache::new(manager.clone(), &ttls()).with_owner("a");
        let admin = SyncCache::new(manager, &ttls()).with_owner("admin");
        assert!(a.acquire_sync_lock(7, false).await);
        assert!(admin.force_release_sync_lock(7).await);
        assert!(!a.is_sync_locked(7).await);
    }

    #[test]
    fn test_default_owner_ids_are_unique() {
        assert_ne!(default_owner_id(), default_owner_id());
    }
}
