pub mod cache;
pub mod lock;
pub mod progress;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bsr_cache::{AppConfig, ConnectionManager};

/// Open a manager that refuses to run without a reachable store.
///
/// The caches fail open, which would make every admin command silently do
/// nothing against a dead server.
pub async fn connect(config: &AppConfig) -> Result<Arc<ConnectionManager>> {
    if !config.redis.enabled {
        bail!("Redis is disabled (set redis.enabled = true or BSR__REDIS__ENABLED=true)");
    }
    let mut redis = config.redis.clone();
    redis.required = true;
    let manager = Arc::new(ConnectionManager::new(redis));
    manager
        .store()
        .await
        .context("cannot reach the cache store")?;
    Ok(manager)
}
