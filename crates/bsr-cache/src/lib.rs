//! Redis-backed cache layer for Bite-Size Reader.
//!
//! A single [`ConnectionManager`] owns the store handle; each specialized
//! cache wraps a [`JsonCache`] bound to its own key domain:
//!
//! | Cache                  | Keys                                   |
//! |------------------------|----------------------------------------|
//! | [`AuthTokenCache`]     | `<prefix>:auth:<fingerprint>`          |
//! | [`EmbeddingCache`]     | `<prefix>:embed:<model>:<hash>`        |
//! | [`QueryCache`]         | `<prefix>:query:<name>:<digest>`       |
//! | [`BatchProgressCache`] | `<prefix>:batch:progress:<session>`    |
//! | [`SyncCache`]          | `<prefix>:karakeep:{index,lock}:<uid>` |
//! | [`RateLimiter`]        | `<prefix>:ratelimit:<subject>`         |
//! | [`ResponseCache`]      | `<prefix>:{scrape,llm}:...`            |
//!
//! Every cache fails open: with Redis disabled or unreachable, reads miss,
//! writes return `false`, and the sync lock is always granted.

pub mod auth;
pub mod cache;
pub mod config;
pub mod connection;
pub mod embedding;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod progress;
pub mod query;
pub mod ratelimit;
pub mod response;
pub mod store;
pub mod sync;

use std::sync::Arc;

pub use auth::{AuthTokenCache, TokenRecord, fingerprint};
pub use cache::JsonCache;
pub use config::{AppConfig, CacheTtlConfig, LoggingConfig, RedisConfig};
pub use connection::ConnectionManager;
pub use embedding::{EmbeddingCache, EmbeddingRecord, hash_content};
pub use error::{CacheError, CacheResult};
pub use observability::init_tracing;
pub use progress::{BatchProgressCache, BatchStatus, ProgressEvent, ProgressRecord, ProgressUpdate};
pub use query::{QueryCache, QueryKey};
pub use ratelimit::RateLimiter;
pub use response::ResponseCache;
pub use store::{MemoryStore, OwnerRelease, RedisStore, Store};
pub use sync::{BookmarkIndex, LockRecord, SyncCache};

/// Every cache built from one configuration and one shared manager.
#[derive(Clone)]
pub struct Caches {
    pub manager: Arc<ConnectionManager>,
    pub auth: AuthTokenCache,
    pub embeddings: EmbeddingCache,
    pub queries: QueryCache,
    pub progress: BatchProgressCache,
    pub sync: SyncCache,
    pub rate_limiter: RateLimiter,
    pub responses: ResponseCache,
}

impl Caches {
    /// Build all caches over a new manager for `config.redis`.
    ///
    /// Nothing connects until the first cache call.
    pub fn from_config(config: &AppConfig) -> Self {
        let manager = Arc::new(ConnectionManager::new(config.redis.clone()));
        Self::with_manager(manager, &config.cache)
    }

    pub fn with_manager(manager: Arc<ConnectionManager>, ttls: &CacheTtlConfig) -> Self {
        Self {
            auth: AuthTokenCache::new(manager.clone(), ttls),
            embeddings: EmbeddingCache::new(manager.clone(), ttls),
            queries: QueryCache::new(manager.clone(), ttls),
            progress: BatchProgressCache::new(manager.clone(), ttls),
            sync: SyncCache::new(manager.clone(), ttls),
            rate_limiter: RateLimiter::new(manager.clone(), ttls),
            responses: ResponseCache::new(manager.clone(), ttls),
            manager,
        }
    }

    /// Close the shared store.
    pub async fn close(&self) {
        self.manager.close().await;
    }
}
