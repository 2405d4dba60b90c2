use std::time::Duration;

const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_BURST_SIZE: u32 = 10;
const DEFAULT_STATE_TTL_SECS: u64 = 60;

/// Token bucket parameters.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub burst_size: u32,
    /// Idle window after which a client's bucket is forgotten (and refills to capacity).
    pub state_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            burst_size: DEFAULT_BURST_SIZE,
            state_ttl: Duration::from_secs(DEFAULT_STATE_TTL_SECS),
        }
    }
}

impl From<&crate::config::RateLimitSettings> for RateLimitConfig {
    fn from(settings: &crate::config::RateLimitSettings) -> Self {
        Self {
            enabled: settings.enabled,
            requests_per_minute: settings.requests_per_minute.get(),
            burst_size: settings.burst_size.get(),
            state_ttl: settings.state_ttl,
        }
    }
}

impl RateLimitConfig {
    /// Tokens per second.
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }
}

/// Thresholds and multipliers for the adaptive controller. The values are empirically chosen
/// defaults, not derived constants.
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub min_rate: f64,
    pub max_rate: f64,
    pub response_time_high_secs: f64,
    pub response_time_medium_secs: f64,
    pub response_time_high_factor: f64,
    pub response_time_medium_factor: f64,
    pub active_requests_high: u64,
    pub active_requests_medium: u64,
    pub active_requests_high_factor: f64,
    pub active_requests_medium_factor: f64,
    pub cache_hit_rate_high: f64,
    pub cache_hit_rate_medium: f64,
    pub cache_hit_rate_high_factor: f64,
    pub cache_hit_rate_medium_factor: f64,
    /// Lifetime of the published system-metrics record.
    pub metrics_ttl: Duration,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_rate: 10.0,
            max_rate: 300.0,
            response_time_high_secs: 5.0,
            response_time_medium_secs: 2.0,
            response_time_high_factor: 0.5,
            response_time_medium_factor: 0.7,
            active_requests_high: 50,
            active_requests_medium: 20,
            active_requests_high_factor: 0.6,
            active_requests_medium_factor: 0.8,
            cache_hit_rate_high: 0.8,
            cache_hit_rate_medium: 0.5,
            cache_hit_rate_high_factor: 1.2,
            cache_hit_rate_medium_factor: 1.1,
            metrics_ttl: Duration::from_secs(60),
        }
    }
}

impl From<&crate::config::AdaptiveSettings> for AdaptiveConfig {
    fn from(settings: &crate::config::AdaptiveSettings) -> Self {
        Self {
            enabled: settings.enabled,
            min_rate: settings.min_rate,
            max_rate: settings.max_rate,
            response_time_high_secs: settings.response_time_high_secs,
            response_time_medium_secs: settings.response_time_medium_secs,
            active_requests_high: settings.active_requests_high,
            active_requests_medium: settings.active_requests_medium,
            cache_hit_rate_high: settings.cache_hit_rate_high,
            cache_hit_rate_medium: settings.cache_hit_rate_medium,
            response_time_high_factor: settings.response_time_high_factor,
            response_time_medium_factor: settings.response_time_medium_factor,
            active_requests_high_factor: settings.active_requests_high_factor,
            active_requests_medium_factor: settings.active_requests_medium_factor,
            cache_hit_rate_high_factor: settings.cache_hit_rate_high_factor,
            cache_hit_rate_medium_factor: settings.cache_hit_rate_medium_factor,
            ..Self::default()
        }
    }
}
