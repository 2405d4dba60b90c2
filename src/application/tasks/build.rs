use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::application::builder::BuildBudget;
use crate::application::documents::DocumentService;
use crate::domain::documents::{Artifact, DocumentRequest};

use super::registry::{TaskHandler, TaskInvocation};
use super::types::{TaskFailure, TaskState};

const TARGET: &str = "pressroom::tasks::build";

/// Runs `build-artifact` and `render-source` tasks through the synchronous build path.
///
/// Binary artifacts are written to the scratch directory and returned by reference; source
/// text is returned inline.
pub struct BuildHandler {
    documents: Arc<DocumentService>,
    scratch_dir: PathBuf,
}

impl BuildHandler {
    pub fn new(documents: Arc<DocumentService>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            documents,
            scratch_dir: scratch_dir.into(),
        }
    }
}

#[async_trait]
impl TaskHandler for BuildHandler {
    async fn handle(&self, invocation: &TaskInvocation) -> Result<Value, TaskFailure> {
        let request: DocumentRequest = serde_json::from_value(invocation.payload.clone())
            .map_err(|err| TaskFailure::terminal(format!("invalid build payload: {err}")))?;

        let budget = BuildBudget::until(invocation.deadline);
        let built = self
            .documents
            .build_within(&request, budget)
            .await
            .map_err(|err| {
                if err.retryable() {
                    TaskFailure::retryable(err.to_string())
                } else {
                    TaskFailure::terminal(err.to_string())
                }
            })?;

        let mut result = json!({
            "status": TaskState::Success.as_str(),
            "document_kind": request.document_kind,
            "template_name": request.template_name,
            "output_format": request.output_format,
            "task_id": invocation.task_id,
            "cached": built.cached,
        });

        match built.artifact {
            Artifact::Binary(bytes) => {
                let path = self.scratch_dir.join(format!(
                    "{}.{}",
                    invocation.task_id,
                    request.output_format.extension()
                ));
                tokio::fs::create_dir_all(&self.scratch_dir)
                    .await
                    .map_err(|err| TaskFailure::retryable(format!("scratch directory: {err}")))?;
                tokio::fs::write(&path, &bytes)
                    .await
                    .map_err(|err| TaskFailure::retryable(format!("write artifact: {err}")))?;
                debug!(
                    target = TARGET,
                    op = "store_artifact",
                    task_id = %invocation.task_id,
                    path = %path.display(),
                    bytes = bytes.len(),
                    "artifact written to scratch"
                );
                result["artifact_ref"] = json!(path.display().to_string());
                result["size"] = json!(bytes.len());
            }
            Artifact::Source(text) => {
                result["length"] = json!(text.chars().count());
                result["content"] = Value::String(text);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use std::time::{Duration, Instant};

    use crate::application::builder::{BuildError, Builder, TemplateRegistry};
    use crate::application::tasks::types::TaskKind;
    use crate::cache::{CacheConfig, DocumentCache};
    use crate::domain::types::OutputFormat;
    use crate::infra::kv::MemoryStore;

    struct Fixed;

    impl Builder for Fixed {
        fn build(
            &self,
            request: &DocumentRequest,
            budget: &BuildBudget,
        ) -> Result<Artifact, BuildError> {
            if budget.is_spent() {
                return Err(BuildError::timed_out("deadline passed"));
            }
            match request.output_format {
                OutputFormat::Latex => Ok(Artifact::Source("\\section{Total}".into())),
                _ if request.data.get("flaky").is_some() => Err(BuildError::toolchain("exit 1")),
                _ => Ok(Artifact::Binary(vec![1, 2, 3, 4])),
            }
        }
    }

    struct Any;

    impl TemplateRegistry for Any {
        fn exists(&self, _: &str, template_name: &str) -> bool {
            template_name != "missing"
        }
    }

    fn handler(scratch: &std::path::Path) -> BuildHandler {
        let cache = Arc::new(DocumentCache::new(
            Arc::new(MemoryStore::new()),
            CacheConfig::default(),
        ));
        let documents = Arc::new(DocumentService::new(cache, Arc::new(Fixed), Arc::new(Any)));
        BuildHandler::new(documents, scratch)
    }

    fn invocation(request: &DocumentRequest) -> TaskInvocation {
        TaskInvocation {
            task_id: Uuid::new_v4(),
            kind: TaskKind::for_format(request.output_format),
            payload: serde_json::to_value(request).expect("encode"),
            retries: 0,
            deadline: Instant::now() + Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn binary_artifacts_are_written_to_scratch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = handler(dir.path());
        let request = DocumentRequest::new("invoice", "classic", json!({}), OutputFormat::Pdf);
        let invocation = invocation(&request);

        let result = handler.handle(&invocation).await.expect("built");
        assert_eq!(result["status"], "SUCCESS");
        assert_eq!(result["size"], 4);
        let path = result["artifact_ref"].as_str().expect("path");
        assert!(path.ends_with(&format!("{}.pdf", invocation.task_id)));
        assert_eq!(std::fs::read(path).expect("artifact"), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn source_is_returned_inline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = handler(dir.path());
        let request = DocumentRequest::new("invoice", "classic", json!({}), OutputFormat::Latex);

        let result = handler.handle(&invocation(&request)).await.expect("built");
        assert_eq!(result["content"], "\\section{Total}");
        assert_eq!(result["length"], 15);
        assert!(result.get("artifact_ref").is_none());
    }

    #[tokio::test]
    async fn failures_are_classified() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = handler(dir.path());

        let missing = DocumentRequest::new("invoice", "missing", json!({}), OutputFormat::Pdf);
        assert!(matches!(
            handler.handle(&invocation(&missing)).await,
            Err(TaskFailure::Terminal(_))
        ));

        let flaky =
            DocumentRequest::new("invoice", "classic", json!({"flaky": true}), OutputFormat::Pdf);
        assert!(matches!(
            handler.handle(&invocation(&flaky)).await,
            Err(TaskFailure::Retryable(_))
        ));

        let overdue = TaskInvocation {
            deadline: Instant::now(),
            ..invocation(&flaky)
        };
        assert!(matches!(
            handler.handle(&overdue).await,
            Err(TaskFailure::Terminal(message)) if message.contains("deadline passed")
        ));

        let garbage = TaskInvocation {
            payload: json!({"document_kind": 7}),
            ..invocation(&missing)
        };
        assert!(matches!(
            handler.handle(&garbage).await,
            Err(TaskFailure::Terminal(_))
        ));
    }
}
