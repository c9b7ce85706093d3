//! Cached results of slow upstream calls: scraped pages and LLM responses.
//!
//! ## Keys
//!
//! - `<prefix>:scrape:<sha256(url)>`
//! - `<prefix>:llm:<model>:<sha256(request)>`
//!
//! Both hold arbitrary JSON supplied by the caller.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::cache::JsonCache;
use crate::config::CacheTtlConfig;
use crate::connection::ConnectionManager;

const SCRAPE_DOMAIN: &str = "scrape";
const LLM_DOMAIN: &str = "llm";

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct ResponseCache {
    scrape: JsonCache,
    llm: JsonCache,
    scrape_ttl_secs: u64,
    llm_ttl_secs: u64,
}

impl ResponseCache {
    pub fn new(manager: Arc<ConnectionManager>, ttls: &CacheTtlConfig) -> Self {
        let enabled = manager.config().cache_enabled;
        Self {
            scrape: JsonCache::new(manager.clone(), SCRAPE_DOMAIN, enabled),
            llm: JsonCache::new(manager, LLM_DOMAIN, enabled),
            scrape_ttl_secs: ttls.scrape_ttl_secs,
            llm_ttl_secs: ttls.llm_ttl_secs,
        }
    }

    pub fn enabled(&self) -> bool {
        self.scrape.enabled()
    }

    pub async fn get_scrape<T: DeserializeOwned>(&self, url: &str) -> Option<T> {
        let fingerprint = sha256_hex(url);
        self.scrape.get_json(&[&fingerprint]).await
    }

    pub async fn set_scrape<T: Serialize + ?Sized>(&self, url: &str, value: &T) -> bool {
        let fingerprint = sha256_hex(url);
        self.scrape
            .set_json(value, self.scrape_ttl_secs, &[&fingerprint])
            .await
    }

    /// `request` is the exact prompt or serialized request body.
    pub async fn get_llm<T: DeserializeOwned>(&self, model: &str, request: &str) -> Option<T> {
        let fingerprint = sha256_hex(request);
        self.llm.get_json(&[model, &fingerprint]).await
    }

    pub async fn set_llm<T: Serialize + ?Sized>(&self, model: &str, request: &str, value: &T) -> bool {
        let fingerprint = sha256_hex(request);
        self.llm
            .set_json(value, self.llm_ttl_secs, &[model, &fingerprint])
            .await
    }
}
