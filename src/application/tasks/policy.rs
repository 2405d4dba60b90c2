use std::time::Duration;

use super::types::TaskKind;

/// Exponential backoff bounded by a per-kind retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted,
}

impl RetryPolicy {
    pub fn for_kind(kind: TaskKind, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries: kind.max_retries(),
            base_delay,
            max_delay,
        }
    }

    /// `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide what follows a retryable failure when `retries_so_far` retries already ran.
    pub fn decide(&self, retries_so_far: u32) -> RetryDecision {
        if retries_so_far < self.max_retries {
            RetryDecision::Retry {
                attempt: retries_so_far,
                delay: self.delay_for(retries_so_far),
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}
