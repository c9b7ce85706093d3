//! In-process store backed by DashMap.
//!
//! Used when a single process owns all cache state (tests, local runs) and as
//! the injected fake for exercising cache behavior without a Redis server.
//! TTLs are tracked with `tokio::time::Instant`, so tests can drive expiry with
//! a paused clock.
//!
//! Expired entries are removed when read, on every scan, and in a sweep that
//! runs every [`SWEEP_EVERY_WRITES`] writes. Channels whose subscribers are
//! all gone are dropped on publish and subscribe.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use super::{OwnerRelease, Store};
use crate::error::{CacheError, CacheResult};

const CHANNEL_CAPACITY: usize = 64;

/// Writes between two sweeps of expired entries.
pub const SWEEP_EVERY_WRITES: u64 = 256;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// DashMap-backed [`Store`] with TTL and pub/sub support.
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    channels: DashMap<String, broadcast::Sender<String>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            channels: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: while unavailable every command fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every command by `latency` (for timeout handling).
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.cleanup_expired();
        self.entries.len()
    }

    /// Remove expired entries and channels nobody listens to.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        if removed > 0 {
            tracing::debug!(removed, "Swept expired memory store entries");
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.live_value(key).is_some()
    }

    /// Write a raw value without TTL, bypassing JSON encoding.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(
            key.into(),
            StoredValue {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    async fn check(&self) -> CacheResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::unavailable("memory store marked unavailable"))
        }
    }

    /// Count a write and sweep on every `SWEEP_EVERY_WRITES`th one.
    ///
    /// Must not be called while an entry guard is held.
    fn note_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY_WRITES == 0 {
            self.cleanup_expired();
        }
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, v| v.is_expired(now));
            return None;
        }
        Some(entry.value.clone())
    }
}

/// Translate a Redis glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> CacheResult<regex::Regex> {
    let mut re = String::with_capacity(pattern.len() + 2);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).map_err(|e| CacheError::decode(format!("invalid pattern: {e}")))
}

fn owner_of(value: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(value)
        .ok()?
        .get("owner")?
        .as_str()
        .map(str::to_owned)
}

#[async_trait]
impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check().await
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check().await?;
        Ok(self.live_value(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.check().await?;
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        self.note_write();
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.check().await?;
        let now = Instant::now();
        let fresh = StoredValue {
            value: value.to_string(),
            expires_at: Some(now + ttl),
        };
        let written = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };
        if written {
            self.note_write();
        }
        Ok(written)
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        self.check().await?;
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|k| self.entries.remove(k))
            .filter(|(_, v)| !v.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check().await?;
        Ok(self.live_value(key).is_some())
    }

    async fn scan_match(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.check().await?;
        let matcher = glob_to_regex(pattern)?;
        self.cleanup_expired();
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now) && matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn incr_expire(&self, key: &str, window: Duration) -> CacheResult<u64> {
        self.check().await?;
        let now = Instant::now();
        let next = {
            let mut entry = self.entries.entry(key.to_string()).or_insert(StoredValue {
                value: "0".into(),
                expires_at: None,
            });
            let current = if entry.is_expired(now) {
                0
            } else {
                entry
                    .value
                    .parse::<u64>()
                    .map_err(|e| CacheError::decode(format!("counter is not an integer: {e}")))?
            };
            let next = current + 1;
            entry.value = next.to_string();
            entry.expires_at = Some(now + window);
            next
        };
        self.note_write();
        Ok(next)
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        self.check().await?;
        let sent = self
            .channels
            .get(channel)
            .map(|tx| tx.send(message.to_string()));
        match sent {
            Some(Ok(receivers)) => Ok(receivers as u64),
            Some(Err(_)) => {
                self.channels
                    .remove_if(channel, |_, tx| tx.receiver_count() == 0);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<BoxStream<'static, String>> {
        self.check().await?;
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Ok(BroadcastStream::new(rx)
            .filter_map(|msg| async move { msg.ok() })
            .boxed())
    }

    async fn delete_if_owner(&self, key: &str, owner: &str) -> CacheResult<OwnerRelease> {
        self.check().await?;
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.remove();
                    return Ok(OwnerRelease::NotHeld);
                }
                if owner_of(&occupied.get().value).as_deref() == Some(owner) {
                    occupied.remove();
                    Ok(OwnerRelease::Released)
                } else {
                    Ok(OwnerRelease::HeldByOther)
                }
            }
            Entry::Vacant(_) => Ok(OwnerRelease::NotHeld),
        }
    }

    async fn close(&self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_ex_expires() {
        let store = MemoryStore::new();
        store
            .set_ex("k", "v", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_respects_live_key_only() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.set_nx_ex("lock", "a", ttl).await.unwrap());
        assert!(!store.set_nx_ex("lock", "b", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.set_nx_ex("lock", "b", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_scan_match_glob() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_ex("bsr:query:a:1", "1", ttl).await.unwrap();
        store.set_ex("bsr:query:b:2", "2", ttl).await.unwrap();
        store.set_ex("bsr:auth:x", "3", ttl).await.unwrap();
        store.set_ex("bsr.query.c", "4", ttl).await.unwrap();

        let mut keys = store.scan_match("bsr:query:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["bsr:query:a:1", "bsr:query:b:2"]);

        let single = store.scan_match("bsr:query:?:1").await.unwrap();
        assert_eq!(single, vec!["bsr:query:a:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_expire_resets_after_window() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);
        assert_eq!(store.incr_expire("c", window).await.unwrap(), 1);
        assert_eq!(store.incr_expire("c", window).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.incr_expire("c", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let store = MemoryStore::new();
        assert_eq!(store.publish("chan", "early").await.unwrap(), 0);

        let mut stream = store.subscribe("chan").await.unwrap();
        assert_eq!(store.publish("chan", "hello").await.unwrap(), 1);
        assert_eq!(stream.next().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_delete_if_owner() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store
            .set_ex("lock", r#"{"owner":"w1","acquired_at":"now"}"#, ttl)
            .await
            .unwrap();

        assert_eq!(
            store.delete_if_owner("lock", "w2").await.unwrap(),
            OwnerRelease::HeldByOther
        );
        assert!(store.exists("lock").await.unwrap());
        assert_eq!(
            store.delete_if_owner("lock", "w1").await.unwrap(),
            OwnerRelease::Released
        );
        assert_eq!(
            store.delete_if_owner("lock", "w1").await.unwrap(),
            OwnerRelease::NotHeld
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_swept() {
        let store = MemoryStore::new();
        for i in 0..1000 {
            store
                .set_ex(&format!("old:{i}"), "v", Duration::from_secs(1))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        for i in 0..10 {
            store
                .set_ex(&format!("new:{i}"), "v", Duration::from_secs(60))
                .await
                .unwrap();
        }

        assert_eq!(store.scan_match("*").await.unwrap().len(), 10);
        assert_eq!(store.entries.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_trigger_periodic_sweep() {
        let store = MemoryStore::new();
        let writes_before_expiry = SWEEP_EVERY_WRITES / 2;
        for i in 0..writes_before_expiry {
            store
                .set_ex(&format!("old:{i}"), "v", Duration::from_secs(1))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        for i in writes_before_expiry..SWEEP_EVERY_WRITES {
            store
                .set_ex(&format!("new:{i}"), "v", Duration::from_secs(60))
                .await
                .unwrap();
        }

        // No read or scan ran, the write counter alone swept the map
        assert_eq!(
            store.entries.len() as u64,
            SWEEP_EVERY_WRITES - writes_before_expiry
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired_reports_removed() {
        let store = MemoryStore::new();
        store.set_ex("a", "1", Duration::from_secs(1)).await.unwrap();
        store.set_ex("b", "2", Duration::from_secs(1)).await.unwrap();
        store.insert_raw("c", "3");

        assert_eq!(store.cleanup_expired(), 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.cleanup_expired(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_channel_is_pruned() {
        let store = MemoryStore::new();
        let stream = store.subscribe("chan").await.unwrap();
        assert_eq!(store.channels.len(), 1);

        drop(stream);
        assert_eq!(store.publish("chan", "nobody").await.unwrap(), 0);
        assert!(store.channels.is_empty());

        let _a = store.subscribe("a").await.unwrap();
        drop(store.subscribe("b").await.unwrap());
        let _c = store.subscribe("c").await.unwrap();
        let mut live: Vec<String> = store.channels.iter().map(|e| e.key().clone()).collect();
        live.sort();
        assert_eq!(live, vec!["a", "c"]);
    }

    #[test]
    fn test_huge_latency_saturates() {
        let store = MemoryStore::new();
        store.set_latency(Duration::MAX);
        assert_eq!(store.latency_ms.load(Ordering::SeqCst), u64::MAX);

        store.set_latency(Duration::from_millis(1500));
        assert_eq!(store.latency_ms.load(Ordering::SeqCst), 1500);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(store.ping().await.is_err());
        assert!(matches!(
            store.get("k").await,
            Err(CacheError::Unavailable(_))
        ));
    }
}
