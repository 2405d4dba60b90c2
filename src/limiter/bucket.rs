//! Per-client token bucket backed by the shared store.
//!
//! Each check reads `(tokens, last_refill)`, refills by elapsed time, and either consumes one
//! token (allow) or reports how long until one is available (deny).
//!
//! The read-compute-write sequence is not atomic. Concurrent requests from one client that
//! observe the same stale state can all be admitted, so over-admission is bounded by the
//! client's request concurrency. Deployments that need a hard bound must move the check and
//! decrement into a single server-side scripted transaction on the store.
//!
//! Any store failure admits the request.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::infra::kv::{self, KvStore};
use crate::util::clock::Clock;

use super::config::RateLimitConfig;

const TARGET: &str = "pressroom::ratelimit";
const KEY_PREFIX: &str = "ratelimit:";

/// Persisted bucket for one client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: f64,
    /// Microseconds since the Unix epoch.
    pub last_refill_us: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BucketOutcome {
    Allow { next: BucketState },
    Deny { tokens: f64, retry_after: u64 },
}

/// Pure bucket transition. Missing state starts full; a clock that moved backwards refills
/// nothing.
pub fn evaluate(
    state: Option<BucketState>,
    now_us: i64,
    burst_size: f64,
    refill_rate: f64,
) -> BucketOutcome {
    let state = state.unwrap_or(BucketState {
        tokens: burst_size,
        last_refill_us: now_us,
    });

    let elapsed_secs = (now_us - state.last_refill_us).max(0) as f64 / 1_000_000.0;
    let refilled = (state.tokens + elapsed_secs * refill_rate).min(burst_size);

    if refilled >= 1.0 {
        BucketOutcome::Allow {
            next: BucketState {
                tokens: refilled - 1.0,
                last_refill_us: now_us,
            },
        }
    } else {
        let retry_after = if refill_rate > 0.0 {
            ((1.0 - refilled) / refill_rate).ceil().max(1.0) as u64
        } else {
            u64::MAX
        };
        BucketOutcome::Deny {
            tokens: refilled,
            retry_after,
        }
    }
}

/// Result of one admission check, carried into response metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after: Option<u64>,
}

impl RateDecision {
    fn allow(limit: u32, remaining: f64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: remaining.max(0.0).floor() as u32,
            retry_after: None,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check against the configured rate.
    pub async fn check(&self, client_id: &str) -> RateDecision {
        self.check_at_rate(client_id, f64::from(self.config.requests_per_minute))
            .await
    }

    /// Check against an externally supplied rate (requests per minute), e.g. the adaptive
    /// controller's target.
    pub async fn check_at_rate(&self, client_id: &str, requests_per_minute: f64) -> RateDecision {
        let limit = requests_per_minute.round().max(0.0) as u32;
        let burst_size = f64::from(self.config.burst_size);

        if !self.config.enabled {
            return RateDecision::allow(limit, burst_size);
        }

        let key = format!("{KEY_PREFIX}{client_id}");
        let state = match kv::get_json::<BucketState>(self.store.as_ref(), &key).await {
            Ok(state) => state,
            Err(err) => {
                metrics::counter!("pressroom_ratelimit_store_error_total").increment(1);
                warn!(
                    target = TARGET,
                    op = "check",
                    result = "fail_open",
                    client = client_id,
                    error = %err,
                    "rate limit state unavailable; admitting request"
                );
                return RateDecision::allow(limit, burst_size - 1.0);
            }
        };

        let refill_rate = requests_per_minute / 60.0;
        match evaluate(state, self.clock.unix_micros(), burst_size, refill_rate) {
            BucketOutcome::Allow { next } => {
                if let Err(err) =
                    kv::set_json(self.store.as_ref(), &key, &next, Some(self.config.state_ttl))
                        .await
                {
                    metrics::counter!("pressroom_ratelimit_store_error_total").increment(1);
                    warn!(
                        target = TARGET,
                        op = "persist",
                        result = "fail_open",
                        client = client_id,
                        error = %err,
                        "failed to persist rate limit state"
                    );
                }
                metrics::counter!("pressroom_ratelimit_allowed_total").increment(1);
                RateDecision::allow(limit, next.tokens)
            }
            BucketOutcome::Deny {
                tokens,
                retry_after,
            } => {
                metrics::counter!("pressroom_ratelimit_denied_total").increment(1);
                debug!(
                    target = TARGET,
                    op = "check",
                    result = "denied",
                    client = client_id,
                    tokens,
                    retry_after,
                    "rate limit exceeded"
                );
                RateDecision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    retry_after: Some(retry_after),
                }
            }
        }
    }
}
