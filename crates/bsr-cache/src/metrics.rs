//! Cache metrics.
//!
//! Counters are emitted through the `metrics` facade; the embedding
//! application decides which recorder (Prometheus, statsd, none) receives them.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
    pub const CACHE_LOCK_ACQUISITIONS_TOTAL: &str = "cache_lock_acquisitions_total";
}

/// Record a cache hit.
pub fn record_cache_hit(cache: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "cache" => cache).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss(cache: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "cache" => cache).increment(1);
}

/// Record an absorbed store failure.
pub fn record_cache_error(cache: &'static str, kind: &'static str) {
    counter!(names::CACHE_ERRORS_TOTAL, "cache" => cache, "kind" => kind).increment(1);
}

/// Record a lock acquisition attempt and its outcome.
pub fn record_lock_acquisition(outcome: &'static str) {
    counter!(names::CACHE_LOCK_ACQUISITIONS_TOTAL, "outcome" => outcome).increment(1);
}
