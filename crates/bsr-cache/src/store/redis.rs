//! Redis-backed store.
//!
//! Commands run on pooled connections from deadpool-redis. Pub/sub needs a
//! connection of its own, so subscriptions open a dedicated connection from
//! the plain `redis::Client` and keep it for the lifetime of the stream.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Pool, PoolConfig, Runtime};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use super::{OwnerRelease, Store};
use crate::config::RedisConfig;
use crate::error::{CacheError, CacheResult};

/// Number of keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 200;

/// Deletes KEYS[1] only if its JSON `owner` equals ARGV[1].
///
/// Returns 1 when deleted, 0 when the key does not exist, -1 when it is held
/// by someone else (or holds something that is not a lock record).
const RELEASE_IF_OWNER_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
local ok, record = pcall(cjson.decode, current)
if ok and type(record) == 'table' and record['owner'] == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return -1
"#;

/// [`Store`] implementation on top of a deadpool-redis pool.
pub struct RedisStore {
    pool: Pool,
    client: redis::Client,
}

impl RedisStore {
    /// Build the pool and dedicated pub/sub client from configuration.
    ///
    /// No connection is opened here; call [`Store::ping`] to verify liveness.
    pub fn from_config(config: &RedisConfig) -> CacheResult<Self> {
        let url = config.connection_url().map_err(CacheError::Config)?;

        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.socket_timeout());
        pool_config.timeouts.create = Some(config.socket_timeout());
        pool_config.timeouts.recycle = Some(config.socket_timeout());

        let mut redis_config = deadpool_redis::Config::from_url(url.clone());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Pool(e.to_string()))?;
        let client = redis::Client::open(url)?;

        Ok(Self { pool, client })
    }

    async fn conn(&self) -> CacheResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl Store for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(CacheError::unavailable(format!(
                "unexpected PING reply: {pong}"
            )))
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn scan_match(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut cursor = 0u64;
        let mut found = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            found.extend(keys);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        // SCAN may return a key more than once
        found.sort_unstable();
        found.dedup();
        Ok(found)
    }

    async fn incr_expire(&self, key: &str, window: Duration) -> CacheResult<u64> {
        let mut conn = self.conn().await?;
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.publish::<_, _, u64>(channel, message).await?)
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<BoxStream<'static, String>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        tracing::debug!(channel = %channel, "Subscribed to Redis channel");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read pub/sub payload");
                        None
                    }
                }
            });
        Ok(stream.boxed())
    }

    async fn delete_if_owner(&self, key: &str, owner: &str) -> CacheResult<OwnerRelease> {
        let mut conn = self.conn().await?;
        let outcome: i64 = redis::Script::new(RELEASE_IF_OWNER_SCRIPT)
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(match outcome {
            1 => OwnerRelease::Released,
            0 => OwnerRelease::NotHeld,
            _ => OwnerRelease::HeldByOther,
        })
    }

    async fn close(&self) {
        self.pool.close();
    }
}
