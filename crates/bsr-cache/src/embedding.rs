//! Content-addressed embedding cache.
//!
//! Vectors are keyed by model and by the SHA-256 of the exact text that was
//! embedded, so identical text under the same model always hits the same key.
//!
//! ## Wire Format
//!
//! ```json
//! {"embedding": "<base64 of little-endian f32s>", "dimensions": 768, "model": "m1"}
//! ```
//!
//! The dimension count is derived from the payload length on decode; the stored
//! `dimensions` field is only cross-checked against it.

use std::future::Future;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::JsonCache;
use crate::config::CacheTtlConfig;
use crate::connection::ConnectionManager;
use crate::error::{CacheError, CacheResult};

const DOMAIN: &str = "embed";
const F32_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub embedding: String,
    pub dimensions: usize,
    pub model: String,
}

/// SHA-256 hex digest of `text`.
#[must_use]
pub fn hash_content(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Pack as consecutive little-endian f32 and base64-encode.
pub fn encode_vector(vector: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vector.len() * F32_BYTES);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Reverse of [`encode_vector`]. Rejects empty or misaligned payloads.
pub fn decode_vector(encoded: &str) -> CacheResult<Vec<f32>> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CacheError::decode(format!("embedding is not base64: {e}")))?;
    if bytes.is_empty() {
        return Err(CacheError::decode("embedding payload is empty"));
    }
    if bytes.len() % F32_BYTES != 0 {
        return Err(CacheError::decode(format!(
            "embedding payload of {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(F32_BYTES)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

impl EmbeddingRecord {
    pub fn from_vector(model: &str, vector: &[f32]) -> Self {
        Self {
            embedding: encode_vector(vector),
            dimensions: vector.len(),
            model: model.to_string(),
        }
    }

    /// Decode and validate against the expected model.
    pub fn into_vector(self, expected_model: &str) -> CacheResult<Vec<f32>> {
        if self.model != expected_model {
            return Err(CacheError::decode(format!(
                "embedding model mismatch: cached {}, wanted {expected_model}",
                self.model
            )));
        }
        let vector = decode_vector(&self.embedding)?;
        if vector.len() != self.dimensions {
            return Err(CacheError::decode(format!(
                "embedding carries {} values but claims {} dimensions",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(vector)
    }
}

#[derive(Clone)]
pub struct EmbeddingCache {
    cache: JsonCache,
    ttl_secs: u64,
}

impl EmbeddingCache {
    pub fn new(manager: Arc<ConnectionManager>, ttls: &CacheTtlConfig) -> Self {
        let enabled = manager.config().embedding_cache_enabled;
        Self {
            cache: JsonCache::new(manager, DOMAIN, enabled),
            ttl_secs: ttls.embedding_ttl_secs,
        }
    }

    pub fn enabled(&self) -> bool {
        self.cache.enabled()
    }

    pub fn hash_content(text: &str) -> String {
        hash_content(text)
    }

    pub async fn get(&self, content_hash: &str, model: &str) -> Option<Vec<f32>> {
        let record: EmbeddingRecord = self.cache.get_json(&[model, content_hash]).await?;
        match record.into_vector(model) {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(
                    model = %model,
                    content_hash = %content_hash,
                    error = %e,
                    "discarding undecodable cached embedding"
                );
                None
            }
        }
    }

    pub async fn set(&self, content_hash: &str, model: &str, vector: &[f32]) -> bool {
        if vector.is_empty() {
            tracing::warn!(model = %model, "refusing to cache an empty embedding");
            return false;
        }
        let record = EmbeddingRecord::from_vector(model, vector);
        self.cache
            .set_json(&record, self.ttl_secs, &[model, content_hash])
            .await
    }

    /// Cache-aside lookup.
    ///
    /// `compute` runs only on a miss. Its result is written back best-effort
    /// and returned whether or not the write succeeded. Errors from `compute`
    /// are returned unchanged.
    pub async fn get_or_compute<F, Fut, E>(&self, text: &str, model: &str, compute: F) -> Result<Vec<f32>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<f32>, E>>,
    {
        let content_hash = hash_content(text);
        if let Some(cached) = self.get(&content_hash, model).await {
            return Ok(cached);
        }

        let vector = compute().await?;
        if !self.set(&content_hash, model, &vector).await {
            tracing::debug!(model = %model, "embedding computed but not cached");
        }
        Ok(vector)
    }
}
