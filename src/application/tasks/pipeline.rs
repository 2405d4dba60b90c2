//! Task submission and state transitions.
//!
//! Submitters only create records and observe them by id; every transition after
//! `SUBMITTED` is made by the worker that holds the delivery.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::documents::DocumentRequest;
use crate::infra::kv::{KvStore, StoreError};
use crate::util::clock::Clock;

use super::broker::{Broker, Envelope};
use super::policy::RetryPolicy;
use super::store::TaskStore;
use super::types::{PipelineError, TaskExhausted, TaskKind, TaskRecord, TaskState};

const TARGET: &str = "pressroom::tasks::pipeline";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// How long task records, and so results, stay readable.
    pub result_horizon: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(300),
            result_horizon: Duration::from_secs(3600),
        }
    }
}

impl From<&crate::config::TasksSettings> for PipelineConfig {
    fn from(settings: &crate::config::TasksSettings) -> Self {
        Self {
            retry_base_delay: settings.retry_base_delay,
            retry_max_delay: settings.retry_max_delay,
            result_horizon: settings.result_horizon,
        }
    }
}

pub struct TaskPipeline {
    tasks: TaskStore,
    broker: Arc<Broker>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl TaskPipeline {
    pub fn new(
        store: Arc<dyn KvStore>,
        broker: Arc<Broker>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            tasks: TaskStore::new(store, config.result_horizon),
            broker,
            clock,
            config,
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn retry_policy(&self, kind: TaskKind) -> RetryPolicy {
        RetryPolicy::for_kind(
            kind,
            self.config.retry_base_delay,
            self.config.retry_max_delay,
        )
    }

    /// Persist a new record and queue it. Returns as soon as the message is queued.
    pub async fn submit(&self, kind: TaskKind, payload: Value) -> Result<Uuid, PipelineError> {
        let mut record = TaskRecord::submitted(kind, payload, self.clock.now());
        self.tasks.save(&record).await?;
        if let Err(err) = self.broker.publish(Envelope::new(record.id, kind)) {
            // Nothing will ever pick the record up, so it must not read as pending.
            if let Err(store_err) = self.fail(&mut record, format!("not queued: {err}")).await {
                warn!(
                    target = TARGET,
                    op = "submit",
                    result = "store_error",
                    task_id = %record.id,
                    error = %store_err,
                    "unqueued task left in SUBMITTED state"
                );
            }
            return Err(err);
        }

        metrics::counter!("pressroom_task_submitted_total", "kind" => kind.as_str()).increment(1);
        info!(
            target = TARGET,
            op = "submit",
            task_id = %record.id,
            kind = %kind,
            "task submitted"
        );
        Ok(record.id)
    }

    /// Queue a document build on the queue matching its output format.
    pub async fn submit_document(&self, request: &DocumentRequest) -> Result<Uuid, PipelineError> {
        let payload = serde_json::to_value(request)?;
        self.submit(TaskKind::for_format(request.output_format), payload)
            .await
    }

    pub async fn status(&self, id: Uuid) -> Result<TaskRecord, PipelineError> {
        self.tasks
            .load(id)
            .await?
            .ok_or(PipelineError::UnknownTask(id))
    }

    pub(crate) async fn load(&self, id: Uuid) -> Result<Option<TaskRecord>, StoreError> {
        self.tasks.load(id).await
    }

    pub(crate) async fn mark_processing(&self, record: &mut TaskRecord) -> Result<(), StoreError> {
        record.state = TaskState::Processing;
        record.updated_at = self.clock.now();
        self.tasks.save(record).await
    }

    pub(crate) async fn complete(
        &self,
        record: &mut TaskRecord,
        result: Value,
    ) -> Result<(), StoreError> {
        record.state = TaskState::Success;
        record.result = Some(result);
        record.error = None;
        record.updated_at = self.clock.now();
        self.tasks.save(record).await
    }

    pub(crate) async fn fail(
        &self,
        record: &mut TaskRecord,
        error: String,
    ) -> Result<(), StoreError> {
        record.state = TaskState::Failed;
        record.error = Some(error);
        record.updated_at = self.clock.now();
        self.tasks.save(record).await
    }

    pub(crate) async fn exhaust(
        &self,
        record: &mut TaskRecord,
        last_error: String,
    ) -> Result<(), StoreError> {
        let exhausted = TaskExhausted {
            kind: record.kind,
            retries: record.retries,
            last_error,
        };
        self.fail(record, exhausted.to_string()).await
    }

    /// Record the retry and queue the task again after `delay`.
    pub(crate) async fn schedule_retry(
        &self,
        record: &mut TaskRecord,
        error: String,
        delay: Duration,
    ) -> Result<(), PipelineError> {
        record.retries += 1;
        record.state = TaskState::Submitted;
        record.error = Some(error);
        record.updated_at = self.clock.now();
        self.tasks.save(record).await?;

        metrics::counter!("pressroom_task_retry_total", "kind" => record.kind.as_str())
            .increment(1);
        warn!(
            target = TARGET,
            op = "retry",
            task_id = %record.id,
            kind = %record.kind,
            retries = record.retries,
            max_retries = record.max_retries,
            delay_ms = delay.as_millis() as u64,
            "task scheduled for retry"
        );
        self.broker
            .publish_after(Envelope::new(record.id, record.kind), delay)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::types::OutputFormat;
    use crate::infra::kv::MemoryStore;
    use crate::util::clock::SystemClock;

    fn pipeline() -> TaskPipeline {
        TaskPipeline::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Broker::new()),
            Arc::new(SystemClock),
            PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn submission_is_observable_by_id() {
        let pipeline = pipeline();
        let consumer = pipeline
            .broker()
            .consumer(TaskKind::RenderSource)
            .expect("queue");
        let request = DocumentRequest::new("report", "plain", json!({}), OutputFormat::Latex);

        let id = pipeline.submit_document(&request).await.expect("submit");
        let record = pipeline.status(id).await.expect("status");
        assert_eq!(record.state, TaskState::Submitted);
        assert_eq!(record.kind, TaskKind::RenderSource);
        assert_eq!(record.max_retries, 2);

        let delivery = consumer.next().await.expect("queued");
        assert_eq!(delivery.envelope().task_id, id);
        delivery.ack();
    }

    /// Remembers every key written through it.
    #[derive(Default)]
    struct Recording {
        inner: MemoryStore,
        written: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl KvStore for Recording {
        async fn get(&self, key: &str) -> Result<Option<bytes::Bytes>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(
            &self,
            key: &str,
            value: bytes::Bytes,
            ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            self.written.lock().expect("lock").push(key.to_string());
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
            self.inner.delete(keys).await
        }

        async fn delete_prefix(&self, prefixes: &[&str]) -> Result<u64, StoreError> {
            self.inner.delete_prefix(prefixes).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn unqueued_submissions_are_failed() {
        let store = Arc::new(Recording::default());
        let pipeline = TaskPipeline::new(
            store.clone(),
            Arc::new(Broker::for_kinds([TaskKind::Batch])),
            Arc::new(SystemClock),
            PipelineConfig::default(),
        );

        let err = pipeline
            .submit(TaskKind::Cleanup, json!({}))
            .await
            .expect_err("no cleanup queue");
        assert!(matches!(err, PipelineError::QueueClosed(TaskKind::Cleanup)));

        let key = store.written.lock().expect("lock")[0].clone();
        let id: Uuid = key
            .trim_start_matches("task:")
            .parse()
            .expect("task key");
        let record = pipeline.status(id).await.expect("record kept");
        assert_eq!(record.state, TaskState::Failed);
        assert!(
            record
                .error
                .as_deref()
                .is_some_and(|error| error.starts_with("not queued")),
            "{:?}",
            record.error
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let pipeline = pipeline();
        let id = Uuid::new_v4();
        assert!(matches!(
            pipeline.status(id).await,
            Err(PipelineError::UnknownTask(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn exhaustion_is_terminal_and_explained() {
        let pipeline = pipeline();
        let id = pipeline
            .submit(TaskKind::BuildArtifact, json!({}))
            .await
            .expect("submit");
        let mut record = pipeline.status(id).await.expect("status");
        record.retries = 3;

        pipeline
            .exhaust(&mut record, "toolchain crashed".into())
            .await
            .expect("persist");

        let stored = pipeline.status(id).await.expect("status");
        assert_eq!(stored.state, TaskState::Failed);
        let error = stored.error.expect("error recorded");
        assert!(error.contains("exhausted 3 retries"));
        assert!(error.contains("toolchain crashed"));
    }
}
