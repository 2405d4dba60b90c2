//! Load-adjusted target rate.
//!
//! The request layer publishes a [`SystemMetrics`] record to the shared store with a short TTL;
//! the controller turns it into a per-client requests-per-minute target for the token bucket.
//! A quiet system lets the record expire and the rate falls back to the configured baseline.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicI64, AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::infra::kv::{self, KvStore};
use crate::util::clock::Clock;

use super::config::AdaptiveConfig;

const TARGET: &str = "pressroom::ratelimit::adaptive";
pub const SYSTEM_METRICS_KEY: &str = "system:metrics";
const RESPONSE_TIME_SMOOTHING: f64 = 0.2;
const PUBLISH_INTERVAL_US: i64 = 1_000_000;

/// Aggregate load published by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Seconds.
    pub avg_response_time: f64,
    pub active_requests: u64,
    /// Ratio in `[0, 1]`.
    pub cache_hit_rate: f64,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

#[derive(Clone)]
pub struct AdaptiveController {
    store: Arc<dyn KvStore>,
    config: AdaptiveConfig,
    base_rate: f64,
}

impl AdaptiveController {
    pub fn new(store: Arc<dyn KvStore>, config: AdaptiveConfig, base_rate: f64) -> Self {
        Self {
            store,
            config,
            base_rate,
        }
    }

    pub fn base_rate(&self) -> f64 {
        self.base_rate
    }

    /// Multiplicative load factor; response time, then concurrency, then cache hit rate.
    pub fn load_factor(&self, metrics: &SystemMetrics) -> f64 {
        let c = &self.config;
        let mut factor = 1.0;

        if metrics.avg_response_time > c.response_time_high_secs {
            factor *= c.response_time_high_factor;
        } else if metrics.avg_response_time > c.response_time_medium_secs {
            factor *= c.response_time_medium_factor;
        }

        if metrics.active_requests > c.active_requests_high {
            factor *= c.active_requests_high_factor;
        } else if metrics.active_requests > c.active_requests_medium {
            factor *= c.active_requests_medium_factor;
        }

        if metrics.cache_hit_rate > c.cache_hit_rate_high {
            factor *= c.cache_hit_rate_high_factor;
        } else if metrics.cache_hit_rate > c.cache_hit_rate_medium {
            factor *= c.cache_hit_rate_medium_factor;
        }

        factor
    }

    /// `clamp(base * load_factor, min, max)`; the baseline when no record is available.
    pub fn adjusted_rate(&self, metrics: Option<&SystemMetrics>) -> f64 {
        if !self.config.enabled {
            return self.base_rate;
        }
        match metrics {
            Some(metrics) => (self.base_rate * self.load_factor(metrics))
                .clamp(self.config.min_rate, self.config.max_rate),
            None => self.base_rate,
        }
    }

    /// Read the published record and compute the current target. Store failures fall back to
    /// the baseline.
    pub async fn current_rate(&self) -> f64 {
        if !self.config.enabled {
            return self.base_rate;
        }
        match kv::get_json::<SystemMetrics>(self.store.as_ref(), SYSTEM_METRICS_KEY).await {
            Ok(metrics) => self.adjusted_rate(metrics.as_ref()),
            Err(err) => {
                warn!(
                    target = TARGET,
                    op = "current_rate",
                    result = "fallback",
                    error = %err,
                    "system metrics unavailable; using base rate"
                );
                self.base_rate
            }
        }
    }

    pub async fn publish(&self, metrics: &SystemMetrics) {
        metrics::gauge!("pressroom_active_requests").set(metrics.active_requests as f64);
        metrics::gauge!("pressroom_avg_response_time_seconds").set(metrics.avg_response_time);
        metrics::gauge!("pressroom_target_rate_per_minute")
            .set(self.adjusted_rate(Some(metrics)));

        if let Err(err) = kv::set_json(
            self.store.as_ref(),
            SYSTEM_METRICS_KEY,
            metrics,
            Some(self.config.metrics_ttl),
        )
        .await
        {
            warn!(
                target = TARGET,
                op = "publish",
                result = "store_error",
                error = %err,
                "failed to publish system metrics"
            );
        }
    }
}

/// Request-layer bookkeeping: in-flight count and a moving average of response time.
pub struct LoadTracker {
    clock: Arc<dyn Clock>,
    active: AtomicU64,
    /// `None` until the first request finishes.
    avg_response_secs: Mutex<Option<f64>>,
    last_publish_us: AtomicI64,
}

impl LoadTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            active: AtomicU64::new(0),
            avg_response_secs: Mutex::new(None),
            last_publish_us: AtomicI64::new(i64::MIN),
        }
    }

    /// Count a request as in flight until the guard drops.
    pub fn begin(self: &Arc<Self>) -> RequestGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            tracker: Arc::clone(self),
            started_at: Instant::now(),
        }
    }

    pub fn active_requests(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn avg_response_time(&self) -> f64 {
        let avg = match self.avg_response_secs.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        avg.unwrap_or(0.0)
    }

    fn finish(&self, elapsed: Duration) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.record_response(elapsed);
    }

    fn record_response(&self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64();
        let mut avg = match self.avg_response_secs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *avg = Some(match *avg {
            None => sample,
            Some(prev) => {
                prev * (1.0 - RESPONSE_TIME_SMOOTHING) + sample * RESPONSE_TIME_SMOOTHING
            }
        });
    }

    pub fn snapshot(&self, cache_hit_rate: f64) -> SystemMetrics {
        SystemMetrics {
            avg_response_time: self.avg_response_time(),
            active_requests: self.active_requests(),
            cache_hit_rate,
            timestamp: self.clock.unix_seconds(),
        }
    }

    /// Publish at most once per second across all callers.
    pub async fn maybe_publish(&self, controller: &AdaptiveController, cache_hit_rate: f64) {
        let now = self.clock.unix_micros();
        let last = self.last_publish_us.load(Ordering::SeqCst);
        if now.saturating_sub(last) < PUBLISH_INTERVAL_US {
            return;
        }
        if self
            .last_publish_us
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let snapshot = self.snapshot(cache_hit_rate);
        debug!(
            target = TARGET,
            op = "publish",
            avg_response_time = snapshot.avg_response_time,
            active_requests = snapshot.active_requests,
            cache_hit_rate = snapshot.cache_hit_rate,
            "publishing system metrics"
        );
        controller.publish(&snapshot).await;
    }
}

pub struct RequestGuard {
    tracker: Arc<LoadTracker>,
    started_at: Instant,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.tracker.finish(self.started_at.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::kv::MemoryStore;
    use crate::util::clock::ManualClock;

    fn metrics(avg_response_time: f64, active_requests: u64, cache_hit_rate: f64) -> SystemMetrics {
        SystemMetrics {
            avg_response_time,
            active_requests,
            cache_hit_rate,
            timestamp: 0.0,
        }
    }

    fn controller(store: Arc<dyn KvStore>) -> AdaptiveController {
        AdaptiveController::new(store, AdaptiveConfig::default(), 60.0)
    }

    #[test]
    fn idle_system_keeps_base_rate() {
        let controller = controller(Arc::new(MemoryStore::new()));
        assert_eq!(controller.adjusted_rate(Some(&metrics(0.1, 1, 0.0))), 60.0);
        assert_eq!(controller.adjusted_rate(None), 60.0);
    }

    #[test]
    fn slower_responses_strictly_lower_the_rate() {
        let controller = controller(Arc::new(MemoryStore::new()));
        let fast = controller.adjusted_rate(Some(&metrics(1.0, 5, 0.3)));
        let slow = controller.adjusted_rate(Some(&metrics(6.0, 5, 0.3)));
        assert!(slow < fast);
        assert_eq!(slow, 30.0);
    }

    #[test]
    fn multipliers_compose() {
        let controller = controller(Arc::new(MemoryStore::new()));
        let factor = controller.load_factor(&metrics(3.0, 30, 0.9));
        assert!((factor - 0.7 * 0.8 * 1.2).abs() < 1e-9);
    }

    #[test]
    fn rate_is_clamped() {
        let controller = controller(Arc::new(MemoryStore::new()));
        let config = AdaptiveConfig::default();
        let floor = AdaptiveController::new(Arc::new(MemoryStore::new()), config.clone(), 12.0);
        assert_eq!(floor.adjusted_rate(Some(&metrics(9.0, 100, 0.0))), 10.0);

        let ceiling = AdaptiveController::new(Arc::new(MemoryStore::new()), config, 290.0);
        assert_eq!(ceiling.adjusted_rate(Some(&metrics(0.0, 0, 0.95))), 300.0);
        assert_eq!(controller.base_rate(), 60.0);
    }

    #[tokio::test]
    async fn published_record_drives_current_rate_until_it_expires() {
        let clock = ManualClock::starting_now();
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let controller = controller(store);

        controller.publish(&metrics(6.0, 0, 0.0)).await;
        assert_eq!(controller.current_rate().await, 30.0);

        clock.advance(Duration::from_secs(61));
        assert_eq!(controller.current_rate().await, 60.0);
    }

    #[tokio::test]
    async fn tracker_counts_in_flight_requests() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        let tracker = Arc::new(LoadTracker::new(clock));
        let first = tracker.begin();
        let second = tracker.begin();
        assert_eq!(tracker.active_requests(), 2);
        drop(first);
        drop(second);
        assert_eq!(tracker.active_requests(), 0);
        assert!(tracker.avg_response_time() >= 0.0);
    }

    #[test]
    fn instant_responses_still_feed_the_average() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        let tracker = LoadTracker::new(clock);
        tracker.record_response(Duration::ZERO);
        tracker.record_response(Duration::from_secs(2));

        let expected = 2.0 * RESPONSE_TIME_SMOOTHING;
        assert!((tracker.avg_response_time() - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tracker_publishes_at_most_once_per_interval() {
        let clock = ManualClock::starting_now();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::with_clock(shared.clone()));
        let controller = controller(store.clone());
        let tracker = LoadTracker::new(shared);

        tracker.maybe_publish(&controller, 0.5).await;
        let first: SystemMetrics = kv::get_json(store.as_ref(), SYSTEM_METRICS_KEY)
            .await
            .expect("read")
            .expect("published");
        assert_eq!(first.cache_hit_rate, 0.5);

        tracker.maybe_publish(&controller, 0.9).await;
        let unchanged: SystemMetrics = kv::get_json(store.as_ref(), SYSTEM_METRICS_KEY)
            .await
            .expect("read")
            .expect("published");
        assert_eq!(unchanged.cache_hit_rate, 0.5);

        clock.advance(Duration::from_secs(2));
        tracker.maybe_publish(&controller, 0.9).await;
        let refreshed: SystemMetrics = kv::get_json(store.as_ref(), SYSTEM_METRICS_KEY)
            .await
            .expect("read")
            .expect("published");
        assert_eq!(refreshed.cache_hit_rate, 0.9);
    }
}
