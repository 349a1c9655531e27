//! Metrics collection for the relay
//!
//! Thread-safe counters updated with relaxed atomics. They track request
//! classification, store hits and misses, upstream fetches with retries, and
//! the degraded paths (fallback hits and offline placeholders).

use crate::router::ContentClass;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the relay
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Request statistics
    total_requests: AtomicU64,
    media_requests: AtomicU64,
    image_requests: AtomicU64,
    api_requests: AtomicU64,
    static_requests: AtomicU64,
    bypassed_requests: AtomicU64,

    // Store statistics
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    store_errors: AtomicU64,
    evictions: AtomicU64,

    // Upstream statistics
    upstream_fetches: AtomicU64,
    retried_fetches: AtomicU64,
    failed_fetches: AtomicU64,

    // Degraded responses
    fallback_hits: AtomicU64,
    offline_responses: AtomicU64,
    partial_responses: AtomicU64,
    unsatisfiable_ranges: AtomicU64,

    // Byte statistics
    bytes_from_origin: AtomicU64,
    bytes_from_cache: AtomicU64,

    total_request_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub media_requests: u64,
    pub image_requests: u64,
    pub api_requests: u64,
    pub static_requests: u64,
    pub bypassed_requests: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub store_errors: u64,
    pub evictions: u64,

    pub upstream_fetches: u64,
    pub retried_fetches: u64,
    pub failed_fetches: u64,

    pub fallback_hits: u64,
    pub offline_responses: u64,
    pub partial_responses: u64,
    pub unsatisfiable_ranges: u64,

    pub bytes_from_origin: u64,
    pub bytes_from_cache: u64,

    pub total_request_duration_us: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one intercepted request under its class
    pub fn record_request(&self, class: ContentClass) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match class {
            ContentClass::Media => &self.media_requests,
            ContentClass::Image => &self.image_requests,
            ContentClass::ApiData => &self.api_requests,
            ContentClass::Static => &self.static_requests,
            ContentClass::Bypass => &self.bypassed_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a store hit and the bytes it served
    pub fn record_cache_hit(&self, bytes: u64) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record one outbound attempt
    pub fn record_upstream_fetch(&self) {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a logical fetch that ended in an error
    pub fn record_failed_fetch(&self) {
        self.failed_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_from_origin(&self, bytes: u64) {
        self.bytes_from_origin.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_fallback_hit(&self) {
        self.fallback_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offline_response(&self) {
        self.offline_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partial_response(&self) {
        self.partial_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsatisfiable_range(&self) {
        self.unsatisfiable_ranges.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent handling one intercepted request
    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are loaded one by one, so a snapshot taken under load is not
    /// perfectly consistent across fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            media_requests: self.media_requests.load(Ordering::Relaxed),
            image_requests: self.image_requests.load(Ordering::Relaxed),
            api_requests: self.api_requests.load(Ordering::Relaxed),
            static_requests: self.static_requests.load(Ordering::Relaxed),
            bypassed_requests: self.bypassed_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            retried_fetches: self.retried_fetches.load(Ordering::Relaxed),
            failed_fetches: self.failed_fetches.load(Ordering::Relaxed),
            fallback_hits: self.fallback_hits.load(Ordering::Relaxed),
            offline_responses: self.offline_responses.load(Ordering::Relaxed),
            partial_responses: self.partial_responses.load(Ordering::Relaxed),
            unsatisfiable_ranges: self.unsatisfiable_ranges.load(Ordering::Relaxed),
            bytes_from_origin: self.bytes_from_origin.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Cache hit rate as a percentage (0.0 to 100.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Average handling time of intercepted requests in milliseconds
    pub fn avg_request_duration_ms(&self) -> f64 {
        let handled = self.total_requests - self.bypassed_requests;
        if handled == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / handled as f64) / 1000.0
        }
    }

    /// Share of logical fetches that failed, as a percentage
    pub fn fetch_failure_rate(&self) -> f64 {
        let logical = self.upstream_fetches - self.retried_fetches.min(self.upstream_fetches);
        if logical == 0 {
            0.0
        } else {
            (self.failed_fetches as f64 / logical as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_request_by_class() {
        let metrics = RelayMetrics::new();

        metrics.record_request(ContentClass::Media);
        metrics.record_request(ContentClass::Media);
        metrics.record_request(ContentClass::Image);
        metrics.record_request(ContentClass::Bypass);

        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.media_requests, 2);
        assert_eq!(stats.image_requests, 1);
        assert_eq!(stats.bypassed_requests, 1);
        assert_eq!(stats.static_requests, 0);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = RelayMetrics::new();
        assert_eq!(metrics.get_stats().cache_hit_rate(), 0.0);

        metrics.record_cache_hit(100);
        metrics.record_cache_hit(100);
        metrics.record_cache_hit(100);
        metrics.record_cache_miss();

        let stats = metrics.get_stats();
        assert_eq!(stats.cache_hit_rate(), 75.0);
        assert_eq!(stats.bytes_from_cache, 300);
    }

    #[test]
    fn test_fetch_failure_rate() {
        let metrics = RelayMetrics::new();

        // One logical fetch of three attempts that failed, one that succeeded
        for _ in 0..3 {
            metrics.record_upstream_fetch();
        }
        metrics.record_retry();
        metrics.record_retry();
        metrics.record_failed_fetch();
        metrics.record_upstream_fetch();

        assert_eq!(metrics.get_stats().fetch_failure_rate(), 50.0);
    }

    #[test]
    fn test_avg_request_duration_excludes_bypass() {
        let metrics = RelayMetrics::new();
        metrics.record_request(ContentClass::Static);
        metrics.record_request(ContentClass::Bypass);
        metrics.record_request_duration(Duration::from_millis(40));

        assert_eq!(metrics.get_stats().avg_request_duration_ms(), 40.0);
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = Arc::new(RelayMetrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let metrics = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    metrics.record_request(ContentClass::Media);
                    metrics.record_cache_miss();
                    metrics.record_evictions(2);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 1000);
        assert_eq!(stats.cache_misses, 1000);
        assert_eq!(stats.evictions, 2000);
    }
}
