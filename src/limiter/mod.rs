//! Admission control: a shared per-client token bucket whose rate follows system load.

mod adaptive;
mod bucket;
mod config;

pub use adaptive::{
    AdaptiveController, LoadTracker, RequestGuard, SYSTEM_METRICS_KEY, SystemMetrics,
};
pub use bucket::{BucketOutcome, BucketState, RateDecision, RateLimiter, evaluate};
pub use config::{AdaptiveConfig, RateLimitConfig};
