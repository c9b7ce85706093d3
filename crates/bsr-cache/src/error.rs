use std::time::Duration;

use thiserror::Error;

/// Result type for cache-layer operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by the store adapters and the connection manager.
///
/// Cache wrappers never hand these to their callers: `JsonCache` converts
/// every variant into a miss or a `false` write. The only place a caller sees
/// one is [`crate::ConnectionManager::store`] with `redis.required = true`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cached payload could not be decoded: {0}")]
    Decode(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("required cache store is unreachable: {0}")]
    Required(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Create a new Decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a new Unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Decode(_) | Self::Serialization(_) => "decode",
            Self::Redis(_) => "redis",
            Self::Pool(_) => "pool",
            Self::Required(_) => "required",
            Self::Config(_) => "config",
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
