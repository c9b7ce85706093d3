//! Integration tests against a real Redis.
//!
//! Tests use testcontainers to spin up a shared Redis instance. They need a
//! Docker daemon, so they are ignored by default:
//!
//! ```text
//! cargo test -p bsr-cache --test redis_cache -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use bsr_cache::{
    BatchProgressCache, BatchStatus, CacheTtlConfig, ConnectionManager, JsonCache, OwnerRelease,
    ProgressUpdate, RateLimiter, RedisConfig, RedisStore, Store, SyncCache,
};
use futures_util::StreamExt;
use serde_json::{Value, json};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{host_port}");
            (container, url)
        })
        .await;
    url.clone()
}

async fn redis_config(prefix: &str) -> RedisConfig {
    RedisConfig {
        enabled: true,
        url: Some(get_redis_url().await),
        prefix: prefix.to_string(),
        pool_size: 4,
        cache_timeout_ms: 2000,
        ..Default::default()
    }
}

async fn manager(prefix: &str) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(redis_config(prefix).await))
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_connects_and_pings() {
    let manager = manager("ping").await;
    let store = manager.store().await.unwrap().expect("redis store");
    assert_eq!(store.backend_name(), "redis");
    store.ping().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_json_round_trip_and_ttl() {
    let cache = JsonCache::new(manager("rt").await, "query", true);
    let value = json!({"rows": [1, 2, 3]});

    assert!(cache.set_json(&value, 1, &["k"]).await);
    assert_eq!(cache.get_json::<Value>(&["k"]).await, Some(value));

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(cache.get_json::<Value>(&["k"]).await, None);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_set_nx_and_scripted_release() {
    let store = RedisStore::from_config(&redis_config("nx").await).unwrap();
    let record = r#"{"owner":"a","acquired_at":"2030-01-01T00:00:00Z"}"#;

    assert!(store.set_nx_ex("nx:lock", record, Duration::from_secs(30)).await.unwrap());
    assert!(!store.set_nx_ex("nx:lock", record, Duration::from_secs(30)).await.unwrap());

    assert_eq!(
        store.delete_if_owner("nx:lock", "b").await.unwrap(),
        OwnerRelease::HeldByOther
    );
    assert_eq!(
        store.delete_if_owner("nx:lock", "a").await.unwrap(),
        OwnerRelease::Released
    );
    assert_eq!(
        store.delete_if_owner("nx:lock", "a").await.unwrap(),
        OwnerRelease::NotHeld
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_sync_lock_across_managers() {
    let ttls = CacheTtlConfig::default();
    let a = SyncCache::new(manager("lock").await, &ttls).with_owner("a");
    let b = SyncCache::new(manager("lock").await, &ttls).with_owner("b");

    assert!(a.acquire_sync_lock(1, false).await);
    assert!(!b.acquire_sync_lock(1, false).await);
    assert!(!b.release_sync_lock(1).await);
    assert!(a.release_sync_lock(1).await);
    assert!(b.acquire_sync_lock(1, false).await);
    assert!(b.release_sync_lock(1).await);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_pattern_invalidation() {
    let cache = JsonCache::new(manager("scan").await, "query", true);
    for i in 0..5 {
        let name = format!("user_stats:{i}");
        assert!(cache.set_json(&i, 60, &[&name]).await);
    }
    assert!(cache.set_json(&0, 60, &["topic_counts:0"]).await);

    assert_eq!(cache.delete_matching("user_stats:*").await, 5);
    assert_eq!(cache.get_json::<i32>(&["topic_counts:0"]).await, Some(0));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_rate_counter() {
    let limiter = RateLimiter::new(manager("rl").await, &CacheTtlConfig::default());
    assert_eq!(limiter.hit("chat:1").await, Some(1));
    assert_eq!(limiter.hit("chat:1").await, Some(2));
    assert!(!limiter.check("chat:1", 2).await);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_progress_pubsub() {
    let progress = BatchProgressCache::new(manager("ps").await, &CacheTtlConfig::default());
    let mut events = progress.subscribe_updates("s1").await.expect("subscription");

    assert!(
        progress
            .update_and_publish("s1", ProgressUpdate::new(BatchStatus::Processing, 3, 12))
            .await
    );

    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("event within timeout")
        .expect("stream open");
    assert_eq!(event.data["percent"], json!(25.0));
    assert_eq!(progress.get_progress("s1").await.unwrap().processed, 3);
}

#[tokio::test]
async fn test_unreachable_redis_degrades() {
    let config = RedisConfig {
        enabled: true,
        url: Some("redis://127.0.0.1:1/0".into()),
        socket_timeout_ms: 500,
        ..Default::default()
    };
    let cache = JsonCache::new(Arc::new(ConnectionManager::new(config)), "query", true);

    assert!(!cache.set_json(&1, 60, &["k"]).await);
    assert_eq!(cache.get_json::<i32>(&["k"]).await, None);
    assert!(!cache.is_available().await);
}
