//! Query-result cache keyed by call signature.
//!
//! A [`QueryKey`] captures a query name plus its positional and keyword
//! arguments. The signature is hashed into a short digest:
//!
//! ```text
//! sha256(json(name) | json(arg0) | json(arg1) | k1=json(v1) | k2=json(v2))[..16]
//! ```
//!
//! Keyword arguments are held in a `BTreeMap`, so their order of insertion
//! never changes the digest. Values that cannot be encoded as JSON fall back
//! to their `Debug` string.
//!
//! Entries live under `<prefix>:query:<name>:<digest>`, which lets
//! `invalidate_pattern("user_stats*")` drop every cached variant of a query.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cache::JsonCache;
use crate::config::CacheTtlConfig;
use crate::connection::ConnectionManager;

const DOMAIN: &str = "query";
const DIGEST_LEN: usize = 16;
const PART_SEPARATOR: &str = "|";

/// Call signature of a cached query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryKey {
    name: String,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

fn to_stable_value<T: Serialize + fmt::Debug + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| Value::String(format!("{value:?}")))
}

impl QueryKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize + fmt::Debug + ?Sized>(mut self, value: &T) -> Self {
        self.args.push(to_stable_value(value));
        self
    }

    /// Add a keyword argument. A repeated name replaces the earlier value.
    pub fn kwarg<T: Serialize + fmt::Debug + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.kwargs.insert(name.into(), to_stable_value(value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Truncated SHA-256 of the canonical signature.
    pub fn digest(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.args.len() + self.kwargs.len());
        parts.push(Value::String(self.name.clone()).to_string());
        parts.extend(self.args.iter().map(Value::to_string));
        parts.extend(self.kwargs.iter().map(|(k, v)| format!("{k}={v}")));

        let mut hasher = Sha256::new();
        hasher.update(parts.join(PART_SEPARATOR).as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(DIGEST_LEN);
        digest
    }
}

#[derive(Clone)]
pub struct QueryCache {
    cache: JsonCache,
    default_ttl_secs: u64,
}

impl QueryCache {
    pub fn new(manager: Arc<ConnectionManager>, ttls: &CacheTtlConfig) -> Self {
        let enabled = manager.config().query_cache_enabled;
        Self {
            cache: JsonCache::new(manager, DOMAIN, enabled),
            default_ttl_secs: ttls.query_ttl_secs,
        }
    }

    pub fn enabled(&self) -> bool {
        self.cache.enabled()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let digest = key.digest();
        self.cache.get_json(&[key.name(), &digest]).await
    }

    /// Cache `result`; `ttl_secs` defaults to `cache.query_ttl_secs`.
    pub async fn set<T: Serialize + ?Sized>(&self, result: &T, key: &QueryKey, ttl_secs: Option<u64>) -> bool {
        let digest = key.digest();
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        self.cache.set_json(result, ttl, &[key.name(), &digest]).await
    }

    pub async fn invalidate(&self, key: &QueryKey) -> bool {
        let digest = key.digest();
        self.cache.delete(&[key.name(), &digest]).await
    }

    /// Delete every entry matching `<prefix>:query:<pattern>`.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let removed = self.cache.delete_matching(pattern).await;
        tracing::debug!(pattern = %pattern, removed, "query cache entries invalidated");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::memory_manager;
    use serde_json::json;

    #[test]
    fn test_kwargs_order_independent() {
        let a = QueryKey::new("q").arg(&1).kwarg("a", &2).kwarg("b", &3);
        let b = QueryKey::new("q").arg(&1).kwarg("b", &3).kwarg("a", &2);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_positional_args_matter() {
        let a = QueryKey::new("q").arg(&1);
        let b = QueryKey::new("q").arg(&2);
        assert_ne!(a.digest(), b.digest());

        let swapped_a = QueryKey::new("q").arg(&1).arg(&2);
        let swapped_b = QueryKey::new("q").arg(&2).arg(&1);
        assert_ne!(swapped_a.digest(), swapped_b.digest());
    }

    #[test]
    fn test_positional_and_keyword_are_distinct() {
        let positional = QueryKey::new("q").arg(&"a=1");
        let keyword = QueryKey::new("q").kwarg("a", &1);
        assert_ne!(positional.digest(), keyword.digest());
    }

    #[test]
    fn test_digest_is_fixed_length_hex() {
        let digest = QueryKey::new("user_stats").arg(&json!({"z": 1, "a": [1, 2]})).digest();
        assert_eq!(digest.len(), DIGEST_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_non_json_value_falls_back_to_debug() {
        let mut map = std::collections::HashMap::new();
        map.insert((1, 2), "tuple keys are not JSON object keys");
        let key = QueryKey::new("q").arg(&map);
        assert!(matches!(key.args[0], Value::String(_)));
    }

    #[tokio::test]
    async fn test_set_get_invalidate() {
        let (manager, _) = memory_manager();
        let cache = QueryCache::new(manager, &CacheTtlConfig::default());
        let key = QueryKey::new("recent_summaries").arg(&42).kwarg("limit", &10);
        let rows = json!([{"id": 1}, {"id": 2}]);

        assert!(cache.set(&rows, &key, None).await);
        assert_eq!(cache.get::<Value>(&key).await, Some(rows));
        assert!(cache.invalidate(&key).await);
        assert_eq!(cache.get::<Value>(&key).await, None);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_by_query_name() {
        let (manager, _) = memory_manager();
        let cache = QueryCache::new(manager, &CacheTtlConfig::default());
        for user in 1..=3 {
            let key = QueryKey::new("user_stats").arg(&user);
            assert!(cache.set(&user, &key, Some(60)).await);
        }
        let other = QueryKey::new("topic_counts");
        assert!(cache.set(&0, &other, Some(60)).await);

        assert_eq!(cache.invalidate_pattern("user_stats:*").await, 3);
        assert_eq!(cache.get::<i32>(&other).await, Some(0));
    }
}
