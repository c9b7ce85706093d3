//! Fixed-window request counter.
//!
//! Each subject gets `<prefix>:ratelimit:<subject>`, incremented and given a
//! fresh expiry in one pipelined round trip. When the store is down every
//! request is allowed.

use std::sync::Arc;

use crate::cache::JsonCache;
use crate::config::CacheTtlConfig;
use crate::connection::ConnectionManager;

const DOMAIN: &str = "ratelimit";

#[derive(Clone)]
pub struct RateLimiter {
    cache: JsonCache,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(manager: Arc<ConnectionManager>, ttls: &CacheTtlConfig) -> Self {
        let enabled = manager.config().cache_enabled;
        Self {
            cache: JsonCache::new(manager, DOMAIN, enabled),
            window_secs: ttls.rate_limit_window_secs,
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Count one request for `subject`; `None` when nothing was counted.
    pub async fn hit(&self, subject: &str) -> Option<u64> {
        self.cache.increment(&[subject], self.window_secs).await
    }

    /// Count a request and decide whether it is within `limit`.
    pub async fn check(&self, subject: &str, limit: u64) -> bool {
        match self.hit(subject).await {
            Some(count) if count > limit => {
                tracing::info!(subject = %subject, count, limit, "rate limit exceeded");
                false
            }
            _ => true,
        }
    }
}
