//! Cache counters.
//!
//! Counters live on the cache instance (they back the JSON metrics contract) and are mirrored
//! to the process-wide `metrics` recorder.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    sets: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("pressroom_cache_hit_total").increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("pressroom_cache_miss_total").increment(1);
    }

    pub fn record_error(&self, op: &'static str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("pressroom_cache_error_total", "op" => op).increment(1);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("pressroom_cache_set_total").increment(1);
    }

    pub fn snapshot(&self, enabled: bool, connected: bool) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheMetricsSnapshot {
            hits,
            misses,
            total_requests: hits + misses,
            hit_rate_percent: hit_rate_percent(hits, misses),
            errors: self.errors.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            enabled,
            connected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate_percent: f64,
    pub errors: u64,
    pub sets: u64,
    pub enabled: bool,
    pub connected: bool,
}

impl CacheMetricsSnapshot {
    /// Hit ratio in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        self.hit_rate_percent / 100.0
    }
}

/// Percentage rounded to two decimals; zero before any lookup.
fn hit_rate_percent(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        return 0.0;
    }
    let percent = hits as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_counters_report_zero_rate() {
        let counters = CacheCounters::default();
        let snapshot = counters.snapshot(true, true);
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.hit_rate_percent, 0.0);
    }

    #[test]
    fn rate_is_rounded_to_two_decimals() {
        assert_eq!(hit_rate_percent(1, 2), 33.33);
        assert_eq!(hit_rate_percent(2, 1), 66.67);
        assert_eq!(hit_rate_percent(3, 0), 100.0);
    }

    #[test]
    fn errors_do_not_count_as_requests() {
        let counters = CacheCounters::default();
        counters.record_hit();
        counters.record_error("get");
        counters.record_miss();
        let snapshot = counters.snapshot(true, false);
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.hit_rate_percent, 50.0);
        assert!(!snapshot.connected);
    }
}
