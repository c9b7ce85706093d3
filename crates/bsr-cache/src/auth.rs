//! Access-token session cache.
//!
//! Maps a token fingerprint to the session metadata needed to authorize a
//! request, so the token table is only consulted on a miss.
//!
//! ## Cache Key
//!
//! `<prefix>:auth:<fingerprint>`, where the fingerprint is the SHA-256 hex
//! digest of the raw token. The raw token never appears in a key.
//!
//! ## Revocation
//!
//! `mark_revoked` flips the cached flag in place, so a revoked token is
//! rejected on the next cache hit without reaching the token store.
//! `invalidate_token` removes the entry outright.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::cache::JsonCache;
use crate::config::CacheTtlConfig;
use crate::connection::ConnectionManager;

const DOMAIN: &str = "auth";

/// Cached session metadata for one access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub user_id: i64,
    pub client_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(default)]
    pub is_revoked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl TokenRecord {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= OffsetDateTime::now_utc()
    }

    /// Not expired and not revoked.
    pub fn is_usable(&self) -> bool {
        !self.is_revoked && !self.is_expired()
    }
}

/// One-way fingerprint of a raw token, used as the cache key.
#[must_use]
pub fn fingerprint(raw_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Token-fingerprint → session cache.
#[derive(Clone)]
pub struct AuthTokenCache {
    cache: JsonCache,
    ttl_secs: u64,
}

impl AuthTokenCache {
    pub fn new(manager: Arc<ConnectionManager>, ttls: &CacheTtlConfig) -> Self {
        let enabled = manager.config().auth_cache_enabled;
        Self {
            cache: JsonCache::new(manager, DOMAIN, enabled),
            ttl_secs: ttls.auth_token_ttl_secs,
        }
    }

    pub fn enabled(&self) -> bool {
        self.cache.enabled()
    }

    pub async fn get_token(&self, fingerprint: &str) -> Option<TokenRecord> {
        self.cache.get_json(&[fingerprint]).await
    }

    pub async fn set_token(
        &self,
        fingerprint: &str,
        user_id: i64,
        client_id: &str,
        expires_at: OffsetDateTime,
        is_revoked: bool,
        id: Option<i64>,
    ) -> bool {
        let record = TokenRecord {
            user_id,
            client_id: client_id.to_string(),
            expires_at,
            is_revoked,
            id,
        };
        self.set_record(fingerprint, &record).await
    }

    pub async fn set_record(&self, fingerprint: &str, record: &TokenRecord) -> bool {
        self.cache.set_json(record, self.ttl_secs, &[fingerprint]).await
    }

    /// Remove the cached entry.
    pub async fn invalidate_token(&self, fingerprint: &str) -> bool {
        self.cache.delete(&[fingerprint]).await
    }

    /// Flip the cached revocation flag.
    ///
    /// Returns `false` if the token was not cached or the rewrite failed.
    pub async fn mark_revoked(&self, fingerprint: &str) -> bool {
        let Some(mut record) = self.get_token(fingerprint).await else {
            tracing::debug!(fingerprint = %fingerprint, "revoked token not cached, nothing to mark");
            return false;
        };
        record.is_revoked = true;
        let written = self.set_record(fingerprint, &record).await;
        if written {
            tracing::info!(user_id = record.user_id, client_id = %record.client_id, "token marked revoked in cache");
        }
        written
    }
}
