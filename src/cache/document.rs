//! Artifact cache over the shared key-value store.
//!
//! Store failures never reach callers as errors: reads degrade to a miss, writes report
//! `false`, and both are counted as errors rather than misses. Only key derivation failures
//! (non-serializable input) propagate.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::domain::documents::{Artifact, DocumentRequest};
use crate::domain::types::{ArtifactType, OutputFormat};
use crate::infra::kv::{KvStore, StoreError};

use super::config::CacheConfig;
use super::keys::{CacheKey, CacheKeyer, SerializationError};
use super::metrics::{CacheCounters, CacheMetricsSnapshot};

const TARGET: &str = "pressroom::cache";

pub struct DocumentCache {
    store: Arc<dyn KvStore>,
    keyer: CacheKeyer,
    config: CacheConfig,
    counters: CacheCounters,
}

impl DocumentCache {
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self {
            keyer: CacheKeyer::new(config.schema_version),
            store,
            config,
            counters: CacheCounters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn key_for(&self, request: &DocumentRequest) -> Result<CacheKey, SerializationError> {
        self.keyer.key_for(request)
    }

    pub async fn get(
        &self,
        request: &DocumentRequest,
    ) -> Result<Option<Artifact>, SerializationError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let key = self.keyer.key_for(request)?;
        let started_at = Instant::now();

        match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => match Artifact::from_cached(request.output_format, &bytes) {
                Some(artifact) => {
                    self.counters.record_hit();
                    debug!(
                        target = TARGET,
                        op = "get",
                        result = "hit",
                        key = %key,
                        bytes = bytes.len(),
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        "cache hit"
                    );
                    Ok(Some(artifact))
                }
                None => {
                    self.counters.record_error("decode");
                    warn!(
                        target = TARGET,
                        op = "get",
                        result = "decode_error",
                        key = %key,
                        "cached entry is not valid for its format; treating as miss"
                    );
                    Ok(None)
                }
            },
            Ok(None) => {
                self.counters.record_miss();
                debug!(target = TARGET, op = "get", result = "miss", key = %key, "cache miss");
                Ok(None)
            }
            Err(err) => {
                self.counters.record_error("get");
                warn!(
                    target = TARGET,
                    op = "get",
                    result = "store_error",
                    key = %key,
                    error = %err,
                    "cache store unavailable; treating as miss"
                );
                Ok(None)
            }
        }
    }

    /// Store an artifact under the TTL of its artifact type. Returns `false` when the write
    /// did not happen.
    pub async fn set(
        &self,
        request: &DocumentRequest,
        artifact: &Artifact,
    ) -> Result<bool, SerializationError> {
        if !self.config.enabled {
            return Ok(false);
        }

        let key = self.keyer.key_for(request)?;
        let ttl = self.config.ttl_for(request.output_format.artifact_type());
        let payload = Bytes::copy_from_slice(artifact.as_bytes());

        match self.store.set(key.as_str(), payload, Some(ttl)).await {
            Ok(()) => {
                self.counters.record_set();
                debug!(
                    target = TARGET,
                    op = "set",
                    result = "stored",
                    key = %key,
                    bytes = artifact.len(),
                    ttl_secs = ttl.as_secs(),
                    "artifact cached"
                );
                Ok(true)
            }
            Err(err) => {
                self.counters.record_error("set");
                warn!(
                    target = TARGET,
                    op = "set",
                    result = "store_error",
                    key = %key,
                    error = %err,
                    "failed to cache artifact"
                );
                Ok(false)
            }
        }
    }

    /// Drop every output-format variant of one logical document. Absent keys count as zero.
    pub async fn invalidate(&self, request: &DocumentRequest) -> Result<u64, SerializationError> {
        let keys = OutputFormat::ALL
            .into_iter()
            .map(|format| {
                self.keyer
                    .key_for(&request.with_format(format))
                    .map(CacheKey::into_string)
            })
            .collect::<Result<Vec<_>, _>>()?;

        match self.store.delete(&keys).await {
            Ok(removed) => {
                debug!(
                    target = TARGET,
                    op = "invalidate",
                    document_kind = %request.document_kind,
                    template = %request.template_name,
                    removed,
                    "cache entries invalidated"
                );
                Ok(removed)
            }
            Err(err) => {
                self.counters.record_error("invalidate");
                warn!(
                    target = TARGET,
                    op = "invalidate",
                    result = "store_error",
                    document_kind = %request.document_kind,
                    error = %err,
                    "failed to invalidate cache entries"
                );
                Ok(0)
            }
        }
    }

    /// Flush every artifact namespace. Operational use only.
    pub async fn clear_all(&self) -> Result<u64, StoreError> {
        let prefixes: Vec<String> = ArtifactType::ALL
            .into_iter()
            .map(|artifact| format!("{artifact}:"))
            .collect();
        let prefix_refs: Vec<&str> = prefixes.iter().map(String::as_str).collect();

        warn!(
            target = TARGET,
            op = "clear_all",
            namespaces = ?prefix_refs,
            "flushing all cached artifacts"
        );

        match self.store.delete_prefix(&prefix_refs).await {
            Ok(removed) => {
                warn!(
                    target = TARGET,
                    op = "clear_all",
                    result = "cleared",
                    removed,
                    "artifact cache flushed"
                );
                Ok(removed)
            }
            Err(err) => {
                self.counters.record_error("clear_all");
                warn!(
                    target = TARGET,
                    op = "clear_all",
                    result = "store_error",
                    error = %err,
                    "artifact cache flush failed"
                );
                Err(err)
            }
        }
    }

    /// Hit ratio observed by this process, without touching the store.
    pub fn hit_rate(&self) -> f64 {
        self.counters.snapshot(self.config.enabled, true).hit_rate()
    }

    pub async fn metrics(&self) -> CacheMetricsSnapshot {
        let connected = self.store.ping().await.is_ok();
        self.counters.snapshot(self.config.enabled, connected)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::infra::kv::MemoryStore;
    use crate::util::clock::ManualClock;

    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, StoreError> {
            Err(StoreError::unavailable("get", "connection refused"))
        }

        async fn set(
            &self,
            _key: &str,
            _value: Bytes,
            _ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            Err(StoreError::unavailable("set", "connection refused"))
        }

        async fn delete(&self, _keys: &[String]) -> Result<u64, StoreError> {
            Err(StoreError::unavailable("delete", "connection refused"))
        }

        async fn delete_prefix(&self, _prefixes: &[&str]) -> Result<u64, StoreError> {
            Err(StoreError::unavailable("delete_prefix", "connection refused"))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::unavailable("ping", "connection refused"))
        }
    }

    fn invoice(format: OutputFormat) -> DocumentRequest {
        DocumentRequest::new("invoice", "classic", json!({"total": 42}), format)
    }

    fn cache_with_clock() -> (DocumentCache, ManualClock) {
        let clock = ManualClock::starting_now();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        (
            DocumentCache::new(Arc::new(store), CacheConfig::default()),
            clock,
        )
    }

    #[tokio::test]
    async fn get_after_set_returns_the_same_payload() {
        let (cache, _clock) = cache_with_clock();
        let request = invoice(OutputFormat::Pdf);
        let artifact = Artifact::Binary(b"%PDF-1.7".to_vec());

        assert!(cache.get(&request).await.expect("get").is_none());
        assert!(cache.set(&request, &artifact).await.expect("set"));
        assert_eq!(cache.get(&request).await.expect("get"), Some(artifact));

        let metrics = cache.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.sets, 1);
        assert_eq!(metrics.hit_rate_percent, 50.0);
        assert!(metrics.connected);
    }

    #[tokio::test]
    async fn entries_expire_with_their_artifact_ttl() {
        let (cache, clock) = cache_with_clock();
        let pdf = invoice(OutputFormat::Pdf);
        let latex = invoice(OutputFormat::Latex);
        cache
            .set(&pdf, &Artifact::Binary(vec![1, 2, 3]))
            .await
            .expect("set");
        cache
            .set(&latex, &Artifact::Source("\\begin{document}".into()))
            .await
            .expect("set");

        clock.advance(Duration::from_secs(12 * 60 * 60));
        assert!(cache.get(&latex).await.expect("get").is_none());
        assert!(cache.get(&pdf).await.expect("get").is_some());

        clock.advance(Duration::from_secs(12 * 60 * 60));
        assert!(cache.get(&pdf).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_every_format_variant() {
        let (cache, _clock) = cache_with_clock();
        cache
            .set(&invoice(OutputFormat::Pdf), &Artifact::Binary(vec![1]))
            .await
            .expect("set");
        cache
            .set(&invoice(OutputFormat::Latex), &Artifact::Source("x".into()))
            .await
            .expect("set");

        let removed = cache
            .invalidate(&invoice(OutputFormat::Pdf))
            .await
            .expect("invalidate");
        assert_eq!(removed, 2);
        assert!(
            cache
                .get(&invoice(OutputFormat::Latex))
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn invalidate_of_never_set_selector_is_zero() {
        let (cache, _clock) = cache_with_clock();
        let removed = cache
            .invalidate(&invoice(OutputFormat::Docx))
            .await
            .expect("invalidate");
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn clear_all_keeps_foreign_namespaces() {
        let clock = ManualClock::starting_now();
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock)));
        store
            .set("ratelimit:client", Bytes::from_static(b"{}"), None)
            .await
            .expect("set");
        let cache = DocumentCache::new(store.clone(), CacheConfig::default());
        cache
            .set(&invoice(OutputFormat::Pdf), &Artifact::Binary(vec![1]))
            .await
            .expect("set");

        assert_eq!(cache.clear_all().await.expect("clear"), 1);
        assert!(
            store
                .get("ratelimit:client")
                .await
                .expect("get")
                .is_some()
        );
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let cache = DocumentCache::new(Arc::new(DownStore), CacheConfig::default());
        let request = invoice(OutputFormat::Pdf);

        assert!(cache.get(&request).await.expect("get").is_none());
        assert!(
            !cache
                .set(&request, &Artifact::Binary(vec![1]))
                .await
                .expect("set")
        );
        assert_eq!(cache.invalidate(&request).await.expect("invalidate"), 0);
        assert!(cache.clear_all().await.is_err());

        let metrics = cache.metrics().await;
        assert_eq!(metrics.misses, 0);
        assert_eq!(metrics.errors, 4);
        assert!(!metrics.connected);
    }

    #[tokio::test]
    async fn disabled_cache_never_stores() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let cache = DocumentCache::new(Arc::new(MemoryStore::new()), config);
        let request = invoice(OutputFormat::Pdf);

        assert!(
            !cache
                .set(&request, &Artifact::Binary(vec![1]))
                .await
                .expect("set")
        );
        assert!(cache.get(&request).await.expect("get").is_none());
        assert!(!cache.metrics().await.enabled);
    }
}
