//! Key-value store seam.
//!
//! Every cache in this crate talks to the store through [`Store`]. Two
//! implementations exist:
//!
//! - [`RedisStore`]: deadpool-redis pool plus a dedicated client for pub/sub
//! - [`MemoryStore`]: in-process DashMap with TTLs and broadcast channels
//!
//! ## Command Mapping
//!
//! | Method             | Redis                                  |
//! |--------------------|----------------------------------------|
//! | `ping`             | `PING`                                 |
//! | `get`              | `GET`                                  |
//! | `set_ex`           | `SET key value EX ttl`                 |
//! | `set_nx_ex`        | `SET key value NX EX ttl`              |
//! | `del`              | `DEL k1 k2 ...`                        |
//! | `exists`           | `EXISTS`                               |
//! | `scan_match`       | `SCAN cursor MATCH pattern COUNT n`    |
//! | `incr_expire`      | `MULTI INCR EXPIRE EXEC` (pipeline)    |
//! | `publish`          | `PUBLISH`                              |
//! | `subscribe`        | `SUBSCRIBE` on a dedicated connection  |
//! | `delete_if_owner`  | Lua compare-and-delete                 |

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::CacheResult;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Outcome of an owner-checked delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerRelease {
    /// The key was held by the caller and has been deleted.
    Released,
    /// No key existed.
    NotHeld,
    /// The key is held by a different owner and was left in place.
    HeldByOther,
}

/// Minimal async key-value store used by every cache.
///
/// Values are UTF-8 strings (JSON documents). Implementations must be safe to
/// share across tasks behind an `Arc`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name for logging and metrics.
    fn backend_name(&self) -> &'static str;

    /// Liveness check.
    async fn ping(&self) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Set only if the key does not exist.
    ///
    /// Returns `Ok(true)` if the key was written, `Ok(false)` if it already
    /// existed.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Delete keys. Returns the number of keys removed.
    async fn del(&self, keys: &[String]) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Collect every key matching a glob pattern (`*`, `?`).
    async fn scan_match(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Increment a counter and (re)arm its expiry in one round trip.
    async fn incr_expire(&self, key: &str, window: Duration) -> CacheResult<u64>;

    /// Publish a message. Returns the number of receivers.
    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64>;

    /// Subscribe to a channel.
    ///
    /// The subscription lives as long as the returned stream; dropping it
    /// unsubscribes.
    async fn subscribe(&self, channel: &str) -> CacheResult<BoxStream<'static, String>>;

    /// Delete `key` only if its JSON value has `"owner": owner`.
    async fn delete_if_owner(&self, key: &str, owner: &str) -> CacheResult<OwnerRelease>;

    /// Release underlying connections.
    async fn close(&self);
}
