use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::util::clock::{Clock, SystemClock};

use super::{KvStore, StoreError};

/// Minimum spacing between full expiry sweeps, which run from inside `set`.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    expires_at: Option<OffsetDateTime>,
}

impl StoredValue {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// In-process store with clock-driven expiry.
///
/// Reads drop the expired entry they touch. Keys that are written once and never read again
/// are reclaimed by a sweep that writes trigger at most once per [`SWEEP_INTERVAL`].
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredValue>>,
    clock: Arc<dyn Clock>,
    last_sweep_micros: Arc<AtomicI64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let started = clock.unix_micros();
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            last_sweep_micros: Arc::new(AtomicI64::new(started)),
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweep if the last one is older than [`SWEEP_INTERVAL`]; one caller wins the race.
    fn maybe_purge(&self) {
        let now = self.clock.unix_micros();
        let interval = i64::try_from(SWEEP_INTERVAL.as_micros()).unwrap_or(i64::MAX);
        let last = self.last_sweep_micros.load(Ordering::Relaxed);
        if now.saturating_sub(last) < interval {
            return;
        }
        if self
            .last_sweep_micros
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.purge_expired();
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<OffsetDateTime> {
        ttl.map(|ttl| {
            let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
            self.clock.now().saturating_add(ttl)
        })
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.maybe_purge();
        let expires_at = self.expiry(ttl);
        self.entries
            .insert(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn delete_prefix(&self, prefixes: &[&str]) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut removed = 0u64;
        self.entries.retain(|key, entry| {
            let matches = prefixes.iter().any(|prefix| key.starts_with(prefix));
            if matches && !entry.is_expired(now) {
                removed += 1;
            }
            !matches
        });
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;

    fn store_with_clock() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::starting_now();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let (store, clock) = store_with_clock();
        store
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(10)))
            .await
            .expect("set");

        clock.advance(Duration::from_secs(9));
        assert_eq!(
            store.get("k").await.expect("get"),
            Some(Bytes::from_static(b"v"))
        );

        clock.advance(Duration::from_secs(1));
        assert!(store.get("k").await.expect("get").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_is_immediately_absent() {
        let (store, _clock) = store_with_clock();
        store
            .set("k", Bytes::from_static(b"v"), Some(Duration::ZERO))
            .await
            .expect("set");
        assert!(store.get("k").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn delete_counts_only_live_entries() {
        let (store, clock) = store_with_clock();
        store
            .set("a", Bytes::from_static(b"1"), None)
            .await
            .expect("set");
        store
            .set("b", Bytes::from_static(b"2"), Some(Duration::from_secs(1)))
            .await
            .expect("set");
        clock.advance(Duration::from_secs(2));

        let removed = store
            .delete(&["a".to_string(), "b".to_string(), "missing".to_string()])
            .await
            .expect("delete");
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn abandoned_keys_are_reclaimed_by_later_writes() {
        let (store, clock) = store_with_clock();
        for n in 0..10_000 {
            store
                .set(
                    &format!("ratelimit:client-{n}"),
                    Bytes::from_static(b"{}"),
                    Some(Duration::from_secs(60)),
                )
                .await
                .expect("set");
        }
        assert_eq!(store.entries.len(), 10_000);

        clock.advance(Duration::from_secs(60 * 60));
        store
            .set("ratelimit:client-new", Bytes::from_static(b"{}"), None)
            .await
            .expect("set");

        assert_eq!(store.entries.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn writes_within_the_sweep_interval_do_not_sweep() {
        let (store, clock) = store_with_clock();
        store
            .set("short", Bytes::from_static(b"v"), Some(Duration::from_secs(1)))
            .await
            .expect("set");
        clock.advance(Duration::from_secs(2));
        store
            .set("other", Bytes::from_static(b"v"), None)
            .await
            .expect("set");

        // Expired but not yet swept; still invisible to readers.
        assert_eq!(store.entries.len(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.entries.len(), 1);
    }

    #[tokio::test]
    async fn delete_prefix_leaves_other_namespaces() {
        let (store, _clock) = store_with_clock();
        for key in ["pdf:a", "pdf:b", "latex:c", "ratelimit:x"] {
            store
                .set(key, Bytes::from_static(b"v"), None)
                .await
                .expect("set");
        }

        let removed = store
            .delete_prefix(&["pdf:", "latex:"])
            .await
            .expect("delete_prefix");
        assert_eq!(removed, 3);
        assert_eq!(store.len(), 1);
        assert!(store.get("ratelimit:x").await.expect("get").is_some());
    }
}
