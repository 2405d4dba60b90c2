//! Synchronous build path: cache lookup, build on miss, populate the cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{DocumentCache, SerializationError};
use crate::domain::documents::{Artifact, DocumentRequest};
use crate::domain::error::DomainError;

use super::builder::{BuildBudget, BuildError, Builder, TemplateRegistry};

const TARGET: &str = "pressroom::application::documents";
const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("template `{template_name}` not found for document kind `{document_kind}`")]
    TemplateNotFound {
        document_kind: String,
        template_name: String,
    },
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("build task aborted: {0}")]
    Aborted(String),
}

impl DocumentError {
    /// Whether the pipeline may run the same request again.
    pub fn retryable(&self) -> bool {
        match self {
            DocumentError::Build(err) => err.retryable(),
            DocumentError::Aborted(_) => true,
            DocumentError::Domain(_)
            | DocumentError::TemplateNotFound { .. }
            | DocumentError::Serialization(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltDocument {
    pub artifact: Artifact,
    pub cached: bool,
}

#[derive(Clone)]
pub struct DocumentService {
    cache: Arc<DocumentCache>,
    builder: Arc<dyn Builder>,
    templates: Arc<dyn TemplateRegistry>,
    build_timeout: Duration,
}

impl DocumentService {
    pub fn new(
        cache: Arc<DocumentCache>,
        builder: Arc<dyn Builder>,
        templates: Arc<dyn TemplateRegistry>,
    ) -> Self {
        Self {
            cache,
            builder,
            templates,
            build_timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }

    /// Deadline for builds started by [`DocumentService::build`].
    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    pub fn template_exists(&self, request: &DocumentRequest) -> bool {
        self.templates
            .exists(&request.document_kind, &request.template_name)
    }

    /// Validate the request and check that its template exists.
    pub fn check(&self, request: &DocumentRequest) -> Result<(), DocumentError> {
        request.validate()?;
        if !self.template_exists(request) {
            return Err(DocumentError::TemplateNotFound {
                document_kind: request.document_kind.clone(),
                template_name: request.template_name.clone(),
            });
        }
        Ok(())
    }

    pub async fn build(&self, request: &DocumentRequest) -> Result<BuiltDocument, DocumentError> {
        self.build_within(request, BuildBudget::new(self.build_timeout))
            .await
    }

    /// Like [`DocumentService::build`] under the caller's budget. Dropping the returned future
    /// cancels the budget, which stops the builder.
    pub async fn build_within(
        &self,
        request: &DocumentRequest,
        budget: BuildBudget,
    ) -> Result<BuiltDocument, DocumentError> {
        self.check(request)?;

        if let Some(artifact) = self.cache.get(request).await? {
            return Ok(BuiltDocument {
                artifact,
                cached: true,
            });
        }

        let started_at = Instant::now();
        let builder = Arc::clone(&self.builder);
        let owned = request.clone();
        let _cancel = budget.cancel_on_drop();
        let artifact = tokio::task::spawn_blocking(move || builder.build(&owned, &budget))
            .await
            .map_err(|err| DocumentError::Aborted(err.to_string()))??;

        info!(
            target = TARGET,
            op = "build",
            result = "built",
            document_kind = %request.document_kind,
            template = %request.template_name,
            format = %request.output_format,
            bytes = artifact.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "document built"
        );

        let stored = self.cache.set(request, &artifact).await?;
        debug!(target = TARGET, op = "build", stored, "cache populated");

        Ok(BuiltDocument {
            artifact,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::cache::CacheConfig;
    use crate::domain::types::OutputFormat;
    use crate::infra::kv::MemoryStore;

    struct CountingBuilder {
        calls: AtomicUsize,
    }

    impl Builder for CountingBuilder {
        fn build(
            &self,
            request: &DocumentRequest,
            budget: &BuildBudget,
        ) -> Result<Artifact, BuildError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.data.get("hang").is_some() {
                while !budget.is_spent() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                return Err(BuildError::timed_out("budget spent"));
            }
            if request.data.get("reject").is_some() {
                return Err(BuildError::validation("reject flag set"));
            }
            Ok(Artifact::Binary(b"%PDF-1.7".to_vec()))
        }
    }

    struct OnlyInvoices;

    impl TemplateRegistry for OnlyInvoices {
        fn exists(&self, document_kind: &str, _template_name: &str) -> bool {
            document_kind == "invoice"
        }
    }

    fn service() -> (DocumentService, Arc<CountingBuilder>) {
        let builder = Arc::new(CountingBuilder {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(DocumentCache::new(
            Arc::new(MemoryStore::new()),
            CacheConfig::default(),
        ));
        let service = DocumentService::new(cache, builder.clone(), Arc::new(OnlyInvoices));
        (service, builder)
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_cache() {
        let (service, builder) = service();
        let request = DocumentRequest::new("invoice", "classic", json!({"n": 1}), OutputFormat::Pdf);

        let first = service.build(&request).await.expect("build");
        assert!(!first.cached);
        let second = service.build(&request).await.expect("build");
        assert!(second.cached);
        assert_eq!(first.artifact, second.artifact);
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_builds_stop_at_the_service_timeout() {
        let (service, _) = service();
        let service = service.with_build_timeout(Duration::from_millis(50));
        let request =
            DocumentRequest::new("invoice", "classic", json!({"hang": true}), OutputFormat::Pdf);

        let err = service.build(&request).await.expect_err("timed out");
        assert!(matches!(err, DocumentError::Build(BuildError::TimedOut { .. })));
        assert!(!err.retryable());
        assert!(service.cache().get(&request).await.expect("key").is_none());
    }

    #[tokio::test]
    async fn abandoning_a_build_cancels_its_budget() {
        let (service, _) = service();
        let request =
            DocumentRequest::new("invoice", "classic", json!({"hang": true}), OutputFormat::Pdf);
        let budget = BuildBudget::new(Duration::from_secs(60));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            service.build_within(&request, budget.clone()),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(budget.is_cancelled());
    }

    #[tokio::test]
    async fn unknown_template_is_rejected_before_building() {
        let (service, builder) = service();
        let request = DocumentRequest::new("letter", "plain", json!({}), OutputFormat::Pdf);

        let err = service.build(&request).await.expect_err("missing template");
        assert!(matches!(err, DocumentError::TemplateNotFound { .. }));
        assert!(!err.retryable());
        assert_eq!(builder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validation_failures_are_not_cached_or_retryable() {
        let (service, _) = service();
        let request =
            DocumentRequest::new("invoice", "classic", json!({"reject": true}), OutputFormat::Pdf);

        let err = service.build(&request).await.expect_err("rejected");
        assert!(matches!(err, DocumentError::Build(BuildError::Validation { .. })));
        assert!(!err.retryable());
        assert!(service.cache().get(&request).await.expect("key").is_none());
    }
}
