//! Wall-clock abstraction shared by TTL expiry and token-bucket refill.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};
use std::time::Duration;

use time::OffsetDateTime;

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;

    /// Current time as fractional seconds since the Unix epoch.
    fn unix_seconds(&self) -> f64 {
        let now = self.now();
        now.unix_timestamp() as f64 + f64::from(now.nanosecond()) / 1_000_000_000.0
    }

    /// Current time as whole microseconds since the Unix epoch.
    fn unix_micros(&self) -> i64 {
        i64::try_from(self.now().unix_timestamp_nanos() / 1_000).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: OffsetDateTime,
    offset_nanos: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(origin: OffsetDateTime) -> Self {
        Self {
            origin,
            offset_nanos: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Starts at the current system time.
    pub fn starting_now() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }

    pub fn advance(&self, by: Duration) {
        let nanos = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        let offset = self.offset_nanos.load(Ordering::SeqCst);
        self.origin + time::Duration::nanoseconds(offset)
    }
}
