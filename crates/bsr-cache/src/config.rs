use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Redis connection and per-consumer switches
    #[serde(default)]
    pub redis: RedisConfig,
    /// TTL for every cache purpose
    #[serde(default)]
    pub cache: CacheTtlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.redis.validate()?;
        self.cache.validate()?;
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Redis configuration.
///
/// Supports two modes:
/// 1. URL mode: set `url` to a full connection string like `redis://:pass@host:6379/0`
/// 2. Separate options mode: set `host`, `port`, `db` and `password` individually
///
/// If `url` is set, it takes precedence. `password` is still applied to a URL
/// that carries none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Fail hard at connection time instead of degrading to cache misses
    #[serde(default)]
    pub required: bool,

    /// Full connection URL, overrides host/port/db
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub db: u8,

    #[serde(default)]
    pub password: Option<String>,

    /// Namespace prefix for every key and channel
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connect/socket timeout in milliseconds
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// Upper bound for a single cache operation in milliseconds
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,

    /// Minimum delay between reconnection attempts after a failure
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Generic response caching (scrapes, LLM responses)
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_true")]
    pub auth_cache_enabled: bool,

    #[serde(default = "default_true")]
    pub embedding_cache_enabled: bool,

    #[serde(default = "default_true")]
    pub query_cache_enabled: bool,

    #[serde(default = "default_true")]
    pub batch_progress_enabled: bool,

    #[serde(default = "default_true")]
    pub sync_cache_enabled: bool,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_host() -> String {
    "localhost".into()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_prefix() -> String {
    "bsr".into()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_socket_timeout_ms() -> u64 {
    5000
}

fn default_cache_timeout_ms() -> u64 {
    300
}

fn default_reconnect_interval_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl RedisConfig {
    /// Returns the connection URL.
    /// If `url` is set, returns it (with `password` applied when the URL has none).
    /// Otherwise, constructs the URL from individual options.
    pub fn connection_url(&self) -> Result<String, String> {
        if let Some(ref raw) = self.url {
            let mut parsed =
                url::Url::parse(raw).map_err(|e| format!("redis.url is invalid: {e}"))?;
            if let Some(ref password) = self.password
                && parsed.password().is_none()
            {
                parsed
                    .set_password(Some(password))
                    .map_err(|_| "redis.url cannot carry a password".to_string())?;
            }
            return Ok(parsed.to_string());
        }

        let password_part = self
            .password
            .as_ref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();

        Ok(format!(
            "redis://{}{}:{}/{}",
            password_part, self.host, self.port, self.db
        ))
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.required && !self.enabled {
            return Err("redis.required=true requires redis.enabled=true".into());
        }
        if self.prefix.is_empty() || self.prefix.contains(char::is_whitespace) {
            return Err("redis.prefix must be a non-empty token without whitespace".into());
        }
        if self.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if !(1..=5000).contains(&self.cache_timeout_ms) {
            return Err("redis.cache_timeout_ms must be within 1..=5000".into());
        }
        if !(100..=60_000).contains(&self.socket_timeout_ms) {
            return Err("redis.socket_timeout_ms must be within 100..=60000".into());
        }
        if self.reconnect_interval_secs > 3600 {
            return Err("redis.reconnect_interval_secs must be <= 3600".into());
        }
        if self.db > 15 {
            return Err("redis.db must be within 0..=15".into());
        }
        self.connection_url().map(|_| ())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            required: false,
            url: None,
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            password: None,
            prefix: default_redis_prefix(),
            pool_size: default_redis_pool_size(),
            socket_timeout_ms: default_socket_timeout_ms(),
            cache_timeout_ms: default_cache_timeout_ms(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            cache_enabled: true,
            auth_cache_enabled: true,
            embedding_cache_enabled: true,
            query_cache_enabled: true,
            batch_progress_enabled: true,
            sync_cache_enabled: true,
        }
    }
}

/// Cache TTLs, one per cache purpose, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_auth_token_ttl")]
    pub auth_token_ttl_secs: u64,

    /// Longest lifetime an access token can have. When set, the auth-token
    /// TTL must cover it.
    #[serde(default)]
    pub token_max_lifetime_secs: Option<u64>,

    #[serde(default = "default_embedding_ttl")]
    pub embedding_ttl_secs: u64,

    #[serde(default = "default_query_ttl")]
    pub query_ttl_secs: u64,

    #[serde(default = "default_batch_progress_ttl")]
    pub batch_progress_ttl_secs: u64,

    #[serde(default = "default_bookmark_index_ttl")]
    pub bookmark_index_ttl_secs: u64,

    #[serde(default = "default_sync_lock_ttl")]
    pub sync_lock_ttl_secs: u64,

    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    #[serde(default = "default_scrape_ttl")]
    pub scrape_ttl_secs: u64,

    #[serde(default = "default_llm_ttl")]
    pub llm_ttl_secs: u64,
}

fn default_auth_token_ttl() -> u64 {
    3600 // 1 hour
}

fn default_embedding_ttl() -> u64 {
    86_400 // 1 day
}

fn default_query_ttl() -> u64 {
    300
}

fn default_batch_progress_ttl() -> u64 {
    3600
}

fn default_bookmark_index_ttl() -> u64 {
    900
}

fn default_sync_lock_ttl() -> u64 {
    600
}

fn default_rate_limit_window() -> u64 {
    60
}

fn default_scrape_ttl() -> u64 {
    21_600 // 6 hours
}

fn default_llm_ttl() -> u64 {
    7200
}

/// `(name, value, min, max)` for every TTL setting.
type TtlBound = (&'static str, u64, u64, u64);

impl CacheTtlConfig {
    fn bounds(&self) -> [TtlBound; 9] {
        [
            ("cache.auth_token_ttl_secs", self.auth_token_ttl_secs, 60, 2_592_000),
            ("cache.embedding_ttl_secs", self.embedding_ttl_secs, 300, 604_800),
            ("cache.query_ttl_secs", self.query_ttl_secs, 10, 86_400),
            ("cache.batch_progress_ttl_secs", self.batch_progress_ttl_secs, 60, 86_400),
            ("cache.bookmark_index_ttl_secs", self.bookmark_index_ttl_secs, 60, 86_400),
            ("cache.sync_lock_ttl_secs", self.sync_lock_ttl_secs, 30, 3600),
            ("cache.rate_limit_window_secs", self.rate_limit_window_secs, 1, 3600),
            ("cache.scrape_ttl_secs", self.scrape_ttl_secs, 60, 604_800),
            ("cache.llm_ttl_secs", self.llm_ttl_secs, 60, 604_800),
        ]
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, value, min, max) in self.bounds() {
            if !(min..=max).contains(&value) {
                return Err(format!("{name} must be within {min}..={max}, got {value}"));
            }
        }
        if let Some(lifetime) = self.token_max_lifetime_secs
            && self.auth_token_ttl_secs < lifetime
        {
            return Err(format!(
                "cache.auth_token_ttl_secs ({}) must be >= cache.token_max_lifetime_secs ({lifetime})",
                self.auth_token_ttl_secs
            ));
        }
        Ok(())
    }
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            auth_token_ttl_secs: default_auth_token_ttl(),
            token_max_lifetime_secs: None,
            embedding_ttl_secs: default_embedding_ttl(),
            query_ttl_secs: default_query_ttl(),
            batch_progress_ttl_secs: default_batch_progress_ttl(),
            bookmark_index_ttl_secs: default_bookmark_index_ttl(),
            sync_lock_ttl_secs: default_sync_lock_ttl(),
            rate_limit_window_secs: default_rate_limit_window(),
            scrape_ttl_secs: default_scrape_ttl(),
            llm_ttl_secs: default_llm_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from("bsr.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., BSR__REDIS__ENABLED=true
        builder = builder.add_source(
            Environment::with_prefix("BSR")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
