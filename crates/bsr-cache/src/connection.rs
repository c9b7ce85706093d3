//! Shared store handle for every cache in the process.
//!
//! ## Connection Modes
//!
//! - **Redis disabled**: `store()` returns `Ok(None)` without connecting
//! - **Redis enabled**: the first call builds the pool and pings; the handle is
//!   memoized for every later caller
//! - **Injected**: [`ConnectionManager::with_store`] hands out a prebuilt store
//!   (in-memory fakes, custom backends)
//!
//! ## Graceful Degradation
//!
//! A failed ping is logged and reported as "no store" unless
//! `redis.required` is set, in which case the error is returned. After a
//! failure, attempts are throttled to one per `reconnect_interval_secs`.
//! While a connect is in flight, optional callers skip the cache instead of
//! queueing behind it. After [`ConnectionManager::close`] no store is handed
//! out again.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::config::RedisConfig;
use crate::error::{CacheError, CacheResult};
use crate::store::{RedisStore, Store};

#[derive(Default)]
struct ConnectionState {
    store: Option<Arc<dyn Store>>,
    last_failure: Option<Instant>,
    closed: bool,
}

enum Lookup {
    Ready(Arc<dyn Store>),
    Unavailable,
    Connect,
}

/// Owns the process-wide store handle.
///
/// Create one at startup, wrap it in `Arc`, and pass it to each cache
/// constructor.
pub struct ConnectionManager {
    config: RedisConfig,
    state: Arc<Mutex<ConnectionState>>,
    connecting: Arc<Mutex<()>>,
}

impl ConnectionManager {
    pub fn new(config: RedisConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(ConnectionState::default())),
            connecting: Arc::new(Mutex::new(())),
        }
    }

    /// Create a manager that always hands out `store`.
    ///
    /// `config.enabled` still gates access, so a disabled config yields no
    /// store even when one is injected.
    pub fn with_store(config: RedisConfig, store: Arc<dyn Store>) -> Self {
        let state = ConnectionState {
            store: Some(store),
            ..Default::default()
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
            connecting: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Namespace prefix shared by every key and channel.
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Get the shared store, connecting on first use.
    ///
    /// Returns `Ok(None)` when Redis is disabled, unreachable, closed, or
    /// (for an optional store) while another caller is already connecting.
    /// Returns an error only when the store is unreachable and marked
    /// required.
    ///
    /// The connect attempt runs in its own task, so a caller that stops
    /// waiting does not abort it and its outcome is still recorded.
    pub async fn store(&self) -> CacheResult<Option<Arc<dyn Store>>> {
        if !self.config.enabled {
            return Ok(None);
        }
        match self.lookup().await {
            Lookup::Ready(store) => return Ok(Some(store)),
            Lookup::Unavailable => return Ok(None),
            Lookup::Connect => {}
        }

        let guard = if self.config.required {
            Arc::clone(&self.connecting).lock_owned().await
        } else {
            match Arc::clone(&self.connecting).try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!("Redis connect already in progress, skipping cache");
                    return Ok(None);
                }
            }
        };

        // Another caller may have finished connecting while we waited
        match self.lookup().await {
            Lookup::Ready(store) => return Ok(Some(store)),
            Lookup::Unavailable => return Ok(None),
            Lookup::Connect => {}
        }

        let task = tokio::spawn(connect_and_record(
            self.config.clone(),
            Arc::clone(&self.state),
            guard,
        ));
        match task.await {
            Ok(result) => result,
            Err(e) => Err(CacheError::unavailable(format!("connect task failed: {e}"))),
        }
    }

    async fn lookup(&self) -> Lookup {
        let state = self.state.lock().await;
        if state.closed {
            return Lookup::Unavailable;
        }
        if let Some(ref store) = state.store {
            return Lookup::Ready(Arc::clone(store));
        }
        if !self.config.required
            && let Some(failed_at) = state.last_failure
            && failed_at.elapsed() < self.config.reconnect_interval()
        {
            return Lookup::Unavailable;
        }
        Lookup::Connect
    }

    /// Close the shared store at shutdown.
    ///
    /// The manager stays closed: later calls get no store.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(store) = state.store.take() {
            store.close().await;
            tracing::info!("Cache store closed");
        }
    }
}

async fn connect_and_record(
    config: RedisConfig,
    state: Arc<Mutex<ConnectionState>>,
    _connecting: OwnedMutexGuard<()>,
) -> CacheResult<Option<Arc<dyn Store>>> {
    let outcome = connect(&config).await;
    let mut state = state.lock().await;
    match outcome {
        Ok(store) if state.closed => {
            store.close().await;
            Ok(None)
        }
        Ok(store) => {
            tracing::info!(backend = store.backend_name(), "Connected to cache store");
            state.last_failure = None;
            state.store = Some(Arc::clone(&store));
            Ok(Some(store))
        }
        Err(e) if config.required => {
            tracing::error!(error = %e, "Required Redis store is unreachable");
            Err(CacheError::Required(e.to_string()))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                retry_in_secs = config.reconnect_interval_secs,
                "Failed to connect to Redis. Caching disabled until reconnect."
            );
            state.last_failure = Some(Instant::now());
            Ok(None)
        }
    }
}

async fn connect(config: &RedisConfig) -> CacheResult<Arc<dyn Store>> {
    tracing::info!(
        host = %config.host,
        port = config.port,
        db = config.db,
        url_override = config.url.is_some(),
        "Connecting to Redis"
    );
    let store = RedisStore::from_config(config)?;
    match tokio::time::timeout(config.socket_timeout(), store.ping()).await {
        Ok(Ok(())) => Ok(Arc::new(store)),
        Ok(Err(e)) => {
            store.close().await;
            Err(e)
        }
        Err(_) => {
            store.close().await;
            Err(CacheError::Timeout(config.socket_timeout()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn unreachable_config(required: bool) -> RedisConfig {
        RedisConfig {
            enabled: true,
            required,
            url: Some("redis://127.0.0.1:1/0".into()),
            socket_timeout_ms: 500,
            reconnect_interval_secs: 60,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_returns_none() {
        let manager = ConnectionManager::new(RedisConfig::default());
        assert!(manager.store().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_ignores_injected_store() {
        let manager =
            ConnectionManager::with_store(RedisConfig::default(), Arc::new(MemoryStore::new()));
        assert!(manager.store().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_store_is_shared() {
        let config = RedisConfig {
            enabled: true,
            ..Default::default()
        };
        let manager = ConnectionManager::with_store(config, Arc::new(MemoryStore::new()));
        let a = manager.store().await.unwrap().unwrap();
        let b = manager.store().await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_optional_unreachable_degrades() {
        let manager = ConnectionManager::new(unreachable_config(false));
        assert!(manager.store().await.unwrap().is_none());
        // Throttled: second call answers immediately without reconnecting
        let started = std::time::Instant::now();
        assert!(manager.store().await.unwrap().is_none());
        assert!(started.elapsed() < std::time::Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_required_unreachable_errors() {
        let manager = ConnectionManager::new(unreachable_config(true));
        let err = manager.store().await.err().expect("required store must fail");
        assert!(matches!(err, CacheError::Required(_)));
    }

    #[tokio::test]
    async fn test_close_drops_store() {
        let config = RedisConfig {
            enabled: true,
            ..Default::default()
        };
        let manager = ConnectionManager::with_store(config, Arc::new(MemoryStore::new()));
        assert!(manager.store().await.unwrap().is_some());
        manager.close().await;
        assert!(manager.state.lock().await.store.is_none());
    }

    #[tokio::test]
    async fn test_closed_manager_does_not_reconnect() {
        // Required and unreachable: any connect attempt would return an error
        let manager =
            ConnectionManager::with_store(unreachable_config(true), Arc::new(MemoryStore::new()));
        assert!(manager.store().await.unwrap().is_some());
        manager.close().await;
        assert!(manager.store().await.unwrap().is_none());
        assert!(manager.store().await.unwrap().is_none());
    }

    /// Accepts TCP connections and never writes a byte back.
    async fn silent_redis() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        (addr, handle)
    }

    fn silent_config(addr: std::net::SocketAddr) -> RedisConfig {
        RedisConfig {
            enabled: true,
            url: Some(format!("redis://{addr}/0")),
            cache_timeout_ms: 100,
            socket_timeout_ms: 3000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hung_redis_is_bounded_by_cache_timeout() {
        let (addr, server) = silent_redis().await;
        let manager = Arc::new(ConnectionManager::new(silent_config(addr)));
        let cache = crate::cache::JsonCache::new(manager, "query", true);

        let started = std::time::Instant::now();
        assert_eq!(cache.get_json::<i32>(&["k"]).await, None);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        // A second caller does not queue behind the connect still in flight
        let started = std::time::Instant::now();
        assert!(!cache.set_json(&1, 60, &["k"]).await);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        server.abort();
    }

    #[tokio::test]
    async fn test_concurrent_caller_skips_connect_in_progress() {
        let (addr, server) = silent_redis().await;
        let manager = Arc::new(ConnectionManager::new(silent_config(addr)));

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.store().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        assert!(manager.store().await.unwrap().is_none());
        assert!(started.elapsed() < std::time::Duration::from_millis(500));

        first.abort();
        server.abort();
    }
}
