//! Generic JSON cache over the shared store.
//!
//! ## Fail-Open Policy
//!
//! Every method here returns a plain value: `Option<T>` for reads, `bool` for
//! writes. Store errors, timeouts and undecodable payloads are logged and
//! turned into a miss (or `false`) in one place, [`JsonCache::absorb`], so the
//! specialized caches never see a `CacheError`.
//!
//! ## Keys
//!
//! ```text
//! <prefix>:<domain>:<part>:<part>...
//! ```
//!
//! The prefix comes from `redis.prefix`; the domain and parts are passed by
//! the specialized caches.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::connection::ConnectionManager;
use crate::error::{CacheError, CacheResult};
use crate::metrics;
use crate::store::{OwnerRelease, Store};

/// JSON-valued cache bound to one domain of the key namespace.
#[derive(Clone)]
pub struct JsonCache {
    manager: Arc<ConnectionManager>,
    domain: &'static str,
    enabled: bool,
    timeout: Duration,
}

impl JsonCache {
    /// Create a cache for `domain`.
    ///
    /// The cache is enabled only if Redis is enabled and `consumer_enabled`
    /// (the consumer's own switch) is on.
    pub fn new(manager: Arc<ConnectionManager>, domain: &'static str, consumer_enabled: bool) -> Self {
        let enabled = manager.is_enabled() && consumer_enabled;
        let timeout = manager.config().cache_timeout();
        Self {
            manager,
            domain,
            enabled,
            timeout,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }

    /// Build `<prefix>:<domain>:<parts...>`.
    pub fn key(&self, parts: &[&str]) -> String {
        let prefix = self.manager.prefix();
        let mut key = String::with_capacity(
            prefix.len() + self.domain.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>() + 1,
        );
        key.push_str(prefix);
        key.push(':');
        key.push_str(self.domain);
        for part in parts {
            key.push(':');
            key.push_str(part);
        }
        key
    }

    /// Resolve the store and run `op`, both under the cache timeout.
    ///
    /// `Ok(None)` means no store is available (disabled or unreachable).
    async fn run<T, F, Fut>(&self, op: F) -> CacheResult<Option<T>>
    where
        F: FnOnce(Arc<dyn Store>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        if !self.enabled {
            return Ok(None);
        }
        let attempt = async {
            let Some(store) = self.manager.store().await? else {
                return Ok(None);
            };
            op(store).await.map(Some)
        };
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    /// Convert a typed result into the fail-open shape, logging failures.
    fn absorb<T>(&self, op: &'static str, key: &str, result: CacheResult<Option<T>>) -> Option<T> {
        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    cache = self.domain,
                    op,
                    key = %key,
                    error = %e,
                    "cache operation failed, treating as miss"
                );
                metrics::record_cache_error(self.domain, e.kind());
                None
            }
        }
    }

    /// Fetch and decode a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, parts: &[&str]) -> Option<T> {
        let key = self.key(parts);
        let raw = self.run(|store| {
            let key = key.clone();
            async move { store.get(&key).await }
        });
        let result = raw.await.and_then(|found| match found.flatten() {
            Some(payload) => serde_json::from_str::<T>(&payload)
                .map(Some)
                .map_err(|e| CacheError::decode(e.to_string())),
            None => Ok(None),
        });

        let value = self.absorb("get", &key, result);
        if value.is_some() {
            tracing::debug!(cache = self.domain, key = %key, "cache hit");
            metrics::record_cache_hit(self.domain);
        } else {
            tracing::debug!(cache = self.domain, key = %key, "cache miss");
            metrics::record_cache_miss(self.domain);
        }
        value
    }

    /// Encode and store a JSON value with a TTL in seconds.
    ///
    /// Returns `false` for a zero TTL, a disabled cache, or any store failure.
    pub async fn set_json<T: Serialize + ?Sized>(&self, value: &T, ttl_secs: u64, parts: &[&str]) -> bool {
        let key = self.key(parts);
        if ttl_secs == 0 {
            tracing::warn!(cache = self.domain, key = %key, "refusing cache write with zero TTL");
            return false;
        }
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                let failure: CacheResult<Option<()>> = Err(e.into());
                return self.absorb("set", &key, failure).is_some();
            }
        };
        let result = self
            .run(|store| {
                let key = key.clone();
                async move {
                    store
                        .set_ex(&key, &payload, Duration::from_secs(ttl_secs))
                        .await
                }
            })
            .await;
        let written = self.absorb("set", &key, result).is_some();
        if written {
            tracing::debug!(cache = self.domain, key = %key, ttl_secs, "cache set");
        }
        written
    }

    /// Store a JSON value only if the key is absent.
    ///
    /// `Some(true)` written, `Some(false)` already present or zero TTL,
    /// `None` store unavailable.
    pub async fn set_if_absent_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
        ttl_secs: u64,
        parts: &[&str],
    ) -> Option<bool> {
        let key = self.key(parts);
        if ttl_secs == 0 {
            tracing::warn!(cache = self.domain, key = %key, "refusing cache write with zero TTL");
            return Some(false);
        }
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => return self.absorb("set_nx", &key, Err(e.into())),
        };
        let result = self
            .run(|store| {
                let key = key.clone();
                async move {
                    store
                        .set_nx_ex(&key, &payload, Duration::from_secs(ttl_secs))
                        .await
                }
            })
            .await;
        self.absorb("set_nx", &key, result)
    }

    /// Delete one key. Returns `true` if something was removed.
    pub async fn delete(&self, parts: &[&str]) -> bool {
        let key = self.key(parts);
        let result = self
            .run(|store| {
                let keys = vec![key.clone()];
                async move { store.del(&keys).await }
            })
            .await;
        self.absorb("delete", &key, result).unwrap_or(0) > 0
    }

    pub async fn exists(&self, parts: &[&str]) -> bool {
        let key = self.key(parts);
        let result = self
            .run(|store| {
                let key = key.clone();
                async move { store.exists(&key).await }
            })
            .await;
        self.absorb("exists", &key, result).unwrap_or(false)
    }

    /// Delete the key only if its JSON `owner` matches.
    ///
    /// `None` when the store is unavailable.
    pub async fn delete_if_owner(&self, parts: &[&str], owner: &str) -> Option<OwnerRelease> {
        let key = self.key(parts);
        let result = self
            .run(|store| {
                let key = key.clone();
                let owner = owner.to_string();
                async move { store.delete_if_owner(&key, &owner).await }
            })
            .await;
        self.absorb("delete_if_owner", &key, result)
    }

    /// Remove every key matching `<prefix>:<domain>:<pattern>`.
    ///
    /// Returns the number of keys deleted.
    pub async fn delete_matching(&self, pattern: &str) -> usize {
        let full_pattern = self.key(&[pattern]);
        self.delete_pattern(full_pattern).await
    }

    /// Remove every key under the configured prefix, across all domains.
    pub async fn clear(&self) -> usize {
        let pattern = format!("{}:*", self.manager.prefix());
        let removed = self.delete_pattern(pattern).await;
        tracing::info!(removed, prefix = %self.manager.prefix(), "cache cleared");
        removed
    }

    async fn delete_pattern(&self, pattern: String) -> usize {
        let result = self
            .run(|store| {
                let pattern = pattern.clone();
                async move {
                    let keys = store.scan_match(&pattern).await?;
                    store.del(&keys).await
                }
            })
            .await;
        self.absorb("delete_matching", &pattern, result).unwrap_or(0) as usize
    }

    /// Increment a counter whose window restarts with each increment.
    pub async fn increment(&self, parts: &[&str], window_secs: u64) -> Option<u64> {
        let key = self.key(parts);
        let result = self
            .run(|store| {
                let key = key.clone();
                async move {
                    store
                        .incr_expire(&key, Duration::from_secs(window_secs.max(1)))
                        .await
                }
            })
            .await;
        self.absorb("increment", &key, result)
    }

    /// Publish a JSON message. Returns `true` when the store accepted it.
    pub async fn publish_json<T: Serialize + ?Sized>(&self, channel_parts: &[&str], message: &T) -> bool {
        let channel = self.key(channel_parts);
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                let failure: CacheResult<Option<u64>> = Err(e.into());
                return self.absorb("publish", &channel, failure).is_some();
            }
        };
        let result = self
            .run(|store| {
                let channel = channel.clone();
                async move { store.publish(&channel, &payload).await }
            })
            .await;
        match self.absorb("publish", &channel, result) {
            Some(receivers) => {
                tracing::debug!(channel = %channel, receivers, "published message");
                true
            }
            None => false,
        }
    }

    /// Subscribe to a channel and decode each message as `T`.
    ///
    /// Messages that fail to decode are logged and skipped. `None` when the
    /// store is unavailable.
    pub async fn subscribe_json<T>(&self, channel_parts: &[&str]) -> Option<BoxStream<'static, T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let channel = self.key(channel_parts);
        let result = self
            .run(|store| {
                let channel = channel.clone();
                async move { store.subscribe(&channel).await }
            })
            .await;
        let raw = self.absorb("subscribe", &channel, result)?;
        let stream = raw.filter_map(move |payload| {
            let decoded = serde_json::from_str::<T>(&payload);
            async move {
                match decoded {
                    Ok(message) => Some(message),
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable pub/sub message");
                        None
                    }
                }
            }
        });
        Some(stream.boxed())
    }

    /// `true` if a store is reachable right now.
    pub async fn is_available(&self) -> bool {
        let result = self.run(|store| async move { store.ping().await }).await;
        self.absorb("ping", "-", result).is_some()
    }
}
