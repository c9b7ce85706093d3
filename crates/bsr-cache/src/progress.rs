//! Batch progress state and live progress events.
//!
//! Two separate mechanisms per batch session:
//!
//! - **State**: `<prefix>:batch:progress:<session_id>`, a full progress record
//!   rewritten on every update. Late observers read it with `get_progress`.
//! - **Events**: `<prefix>:batch:updates:<session_id>` pub/sub channel. Only
//!   observers subscribed at publish time see an event.
//!
//! ## Example Flow
//!
//! ```text
//! worker:   update_and_publish(sid, 3/12)  → SET state, PUBLISH event
//! observer: subscribe_updates(sid)         → stream of ProgressEvent
//! late UI:  get_progress(sid)              → {"percent": 25.0, ...}
//! ```

use std::sync::Arc;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::cache::JsonCache;
use crate::config::CacheTtlConfig;
use crate::connection::ConnectionManager;

const DOMAIN: &str = "batch";
const STATE_PART: &str = "progress";
const CHANNEL_PART: &str = "updates";

/// Event name used by [`BatchProgressCache::update_and_publish`].
pub const PROGRESS_EVENT: &str = "progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Pending => write!(f, "pending"),
            BatchStatus::Processing => write!(f, "processing"),
            BatchStatus::Completed => write!(f, "completed"),
            BatchStatus::Failed => write!(f, "failed"),
            BatchStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Stored progress of one batch session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub session_id: String,
    pub status: BatchStatus,
    pub processed: u64,
    pub total: u64,
    pub percent: f64,
    pub successful_count: u64,
    pub failed_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Producer-specific fields, stored alongside the known ones.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Published progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event: String,
    pub data: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Input for [`BatchProgressCache::set_progress`].
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub status: BatchStatus,
    pub processed: u64,
    pub total: u64,
    pub percent: Option<f64>,
    pub successful_count: u64,
    pub failed_count: u64,
    pub current_url: Option<String>,
    pub error_message: Option<String>,
    pub extra: Map<String, Value>,
}

impl ProgressUpdate {
    pub fn new(status: BatchStatus, processed: u64, total: u64) -> Self {
        Self {
            status,
            processed,
            total,
            percent: None,
            successful_count: 0,
            failed_count: 0,
            current_url: None,
            error_message: None,
            extra: Map::new(),
        }
    }

    pub fn with_counts(mut self, successful: u64, failed: u64) -> Self {
        self.successful_count = successful;
        self.failed_count = failed;
        self
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn with_current_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = Some(url.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    fn into_record(self, session_id: &str) -> ProgressRecord {
        let percent = self
            .percent
            .unwrap_or_else(|| percent_of(self.processed, self.total));
        ProgressRecord {
            session_id: session_id.to_string(),
            status: self.status,
            processed: self.processed,
            total: self.total,
            percent,
            successful_count: self.successful_count,
            failed_count: self.failed_count,
            updated_at: OffsetDateTime::now_utc(),
            current_url: self.current_url,
            error_message: self.error_message,
            extra: self.extra,
        }
    }
}

/// `processed / total` as a percentage rounded to one decimal; 0 when total is 0.
pub fn percent_of(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = processed as f64 / total as f64 * 100.0;
    (raw * 10.0).round() / 10.0
}

#[derive(Clone)]
pub struct BatchProgressCache {
    cache: JsonCache,
    ttl_secs: u64,
}

impl BatchProgressCache {
    pub fn new(manager: Arc<ConnectionManager>, ttls: &CacheTtlConfig) -> Self {
        let enabled = manager.config().batch_progress_enabled;
        Self {
            cache: JsonCache::new(manager, DOMAIN, enabled),
            ttl_secs: ttls.batch_progress_ttl_secs,
        }
    }

    pub fn enabled(&self) -> bool {
        self.cache.enabled()
    }

    pub async fn get_progress(&self, session_id: &str) -> Option<ProgressRecord> {
        self.cache.get_json(&[STATE_PART, session_id]).await
    }

    pub async fn set_progress(&self, session_id: &str, update: ProgressUpdate) -> bool {
        let record = update.into_record(session_id);
        self.store_record(&record).await
    }

    async fn store_record(&self, record: &ProgressRecord) -> bool {
        self.cache
            .set_json(record, self.ttl_secs, &[STATE_PART, &record.session_id])
            .await
    }

    pub async fn publish_update(&self, session_id: &str, event: &str, data: Value) -> bool {
        let message = ProgressEvent {
            event: event.to_string(),
            data,
            timestamp: OffsetDateTime::now_utc(),
        };
        self.cache
            .publish_json(&[CHANNEL_PART, session_id], &message)
            .await
    }

    /// Live progress events for a session.
    ///
    /// `None` when the store is unavailable; callers should fall back to
    /// polling `get_progress`. Drop the stream to unsubscribe.
    pub async fn subscribe_updates(&self, session_id: &str) -> Option<BoxStream<'static, ProgressEvent>> {
        self.cache
            .subscribe_json(&[CHANNEL_PART, session_id])
            .await
    }

    /// Store the new state and publish it as a `progress` event.
    ///
    /// Both steps are always attempted; returns `true` only if both succeeded.
    pub async fn update_and_publish(&self, session_id: &str, update: ProgressUpdate) -> bool {
        let record = update.into_record(session_id);
        let stored = self.store_record(&record).await;
        let data = match serde_json::to_value(&record) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "failed to encode progress event");
                return false;
            }
        };
        let published = self.publish_update(session_id, PROGRESS_EVENT, data).await;
        if !(stored && published) {
            tracing::debug!(session_id = %session_id, stored, published, "progress update partially applied");
        }
        stored && published
    }

    pub async fn delete_progress(&self, session_id: &str) -> bool {
        self.cache.delete(&[STATE_PART, session_id]).await
    }
}
