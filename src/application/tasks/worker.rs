//! Worker slots pulling from the per-kind queues.
//!
//! Each slot runs one task at a time and acknowledges its delivery only after the outcome is
//! persisted. A slot is torn down and replaced after a fixed number of tasks; a panicking
//! handler takes its slot generation down with it and the unacknowledged delivery is
//! redelivered. A task that has crashed more workers than its retry budget allows is failed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::broker::{Consumer, Delivery};
use super::pipeline::TaskPipeline;
use super::policy::RetryDecision;
use super::registry::{HandlerRegistry, TaskInvocation};
use super::types::{TaskFailure, TaskKind, TaskRecord};

const TARGET: &str = "pressroom::tasks::worker";
const STORE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Slots per task kind; kinds missing here get one slot.
    pub concurrency: HashMap<TaskKind, usize>,
    pub max_tasks_per_worker: u32,
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: HashMap::new(),
            max_tasks_per_worker: 50,
            soft_time_limit: Duration::from_secs(240),
            hard_time_limit: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    pub fn slots_for(&self, kind: TaskKind) -> usize {
        self.concurrency.get(&kind).copied().unwrap_or(1)
    }
}

impl From<&crate::config::TasksSettings> for WorkerConfig {
    fn from(settings: &crate::config::TasksSettings) -> Self {
        let concurrency = [
            (TaskKind::BuildArtifact, settings.build_concurrency),
            (TaskKind::RenderSource, settings.render_concurrency),
            (TaskKind::Batch, settings.batch_concurrency),
            (TaskKind::Cleanup, settings.cleanup_concurrency),
        ]
        .into_iter()
        .map(|(kind, slots)| (kind, slots.get() as usize))
        .collect();

        Self {
            concurrency,
            max_tasks_per_worker: settings.max_tasks_per_worker.get(),
            soft_time_limit: settings.soft_time_limit,
            hard_time_limit: settings.hard_time_limit,
        }
    }
}

pub struct WorkerPool {
    pipeline: Arc<TaskPipeline>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
}

/// Running slots. Dropping the handle stops every slot.
pub struct WorkerPoolHandle {
    slots: JoinSet<()>,
}

impl WorkerPoolHandle {
    pub async fn shutdown(mut self) {
        self.slots.shutdown().await;
    }
}

enum Generation {
    Recycled,
    QueueClosed,
}

impl WorkerPool {
    pub fn new(
        pipeline: Arc<TaskPipeline>,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pipeline,
            registry,
            config,
        }
    }

    /// Start slots for every kind that has a registered handler.
    pub fn spawn(self) -> WorkerPoolHandle {
        let mut slots = JoinSet::new();
        let worker = Arc::new(Worker {
            pipeline: self.pipeline,
            registry: self.registry,
            config: self.config,
        });

        let mut kinds: Vec<TaskKind> = worker.registry.kinds().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        for kind in kinds {
            for slot in 0..worker.config.slots_for(kind).max(1) {
                let Some(consumer) = worker.pipeline.broker().consumer(kind) else {
                    continue;
                };
                slots.spawn(Arc::clone(&worker).supervise(kind, slot, Arc::new(consumer)));
            }
        }

        info!(
            target = TARGET,
            op = "spawn",
            slots = slots.len(),
            max_tasks_per_worker = worker.config.max_tasks_per_worker,
            "worker pool started"
        );
        WorkerPoolHandle { slots }
    }
}

struct Worker {
    pipeline: Arc<TaskPipeline>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
}

impl Worker {
    async fn supervise(self: Arc<Self>, kind: TaskKind, slot: usize, consumer: Arc<Consumer>) {
        let mut generation: u64 = 0;
        loop {
            generation += 1;
            let worker = Arc::clone(&self);
            let consumer = Arc::clone(&consumer);
            // Owned by a set so that stopping the supervisor aborts the running generation.
            let mut run = JoinSet::new();
            run.spawn(async move { worker.run_generation(&consumer).await });
            let Some(finished) = run.join_next().await else {
                break;
            };

            match finished {
                Ok(Generation::Recycled) => {
                    debug!(
                        target = TARGET,
                        op = "recycle",
                        kind = %kind,
                        slot,
                        generation,
                        "worker slot recycled"
                    );
                }
                Ok(Generation::QueueClosed) => break,
                Err(err) if err.is_panic() => {
                    error!(
                        target = TARGET,
                        op = "supervise",
                        kind = %kind,
                        slot,
                        generation,
                        "worker slot panicked; restarting"
                    );
                }
                Err(_) => break,
            }
        }
    }

    async fn run_generation(&self, consumer: &Consumer) -> Generation {
        let mut completed: u32 = 0;
        while completed < self.config.max_tasks_per_worker.max(1) {
            let Some(delivery) = consumer.next().await else {
                return Generation::QueueClosed;
            };
            self.process(delivery).await;
            completed += 1;
        }
        Generation::Recycled
    }

    async fn process(&self, delivery: Delivery) {
        let envelope = *delivery.envelope();

        let mut record = match self.pipeline.load(envelope.task_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(
                    target = TARGET,
                    op = "process",
                    result = "missing",
                    task_id = %envelope.task_id,
                    "task record expired or missing; dropping message"
                );
                delivery.ack();
                return;
            }
            Err(err) => {
                warn!(
                    target = TARGET,
                    op = "process",
                    result = "store_error",
                    task_id = %envelope.task_id,
                    error = %err,
                    "task record unavailable; returning message to queue"
                );
                delivery.release(STORE_RETRY_DELAY);
                return;
            }
        };

        // A redelivery of work whose outcome was already persisted.
        if record.state.is_terminal() {
            delivery.ack();
            return;
        }

        // Every earlier delivery took its worker down; stop feeding it to new ones.
        if envelope.redeliveries > record.max_retries {
            let message = format!(
                "{} task abandoned after {} crashed deliveries",
                record.kind, envelope.redeliveries
            );
            match self.pipeline.fail(&mut record, message).await {
                Ok(()) => {
                    self.record_failure(&record, 0);
                    delivery.ack();
                }
                Err(err) => {
                    warn!(
                        target = TARGET,
                        op = "abandon",
                        result = "store_error",
                        task_id = %record.id,
                        error = %err,
                        "could not fail crashing task; returning message to queue"
                    );
                    delivery.release(STORE_RETRY_DELAY);
                }
            }
            return;
        }

        if let Err(err) = self.pipeline.mark_processing(&mut record).await {
            warn!(
                target = TARGET,
                op = "process",
                result = "store_error",
                task_id = %record.id,
                error = %err,
                "could not claim task; returning message to queue"
            );
            delivery.release(STORE_RETRY_DELAY);
            return;
        }

        let started_at = Instant::now();
        let outcome = self.run_handler(&record).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        metrics::histogram!("pressroom_task_duration_ms", "kind" => record.kind.as_str())
            .record(elapsed_ms as f64);

        if self.settle(&mut record, outcome, elapsed_ms).await {
            delivery.ack();
        } else {
            delivery.release(STORE_RETRY_DELAY);
        }
    }

    async fn run_handler(&self, record: &TaskRecord) -> Result<serde_json::Value, TaskFailure> {
        let Some(handler) = self.registry.get(record.kind) else {
            return Err(TaskFailure::terminal(format!(
                "no handler registered for {} tasks",
                record.kind
            )));
        };

        let invocation = TaskInvocation {
            task_id: record.id,
            kind: record.kind,
            payload: record.payload.clone(),
            retries: record.retries,
            deadline: Instant::now() + self.config.hard_time_limit,
        };

        let soft = self.config.soft_time_limit.min(self.config.hard_time_limit);
        let run = handler.handle(&invocation);
        tokio::pin!(run);

        match tokio::time::timeout(soft, &mut run).await {
            Ok(outcome) => return outcome,
            Err(_) => {
                warn!(
                    target = TARGET,
                    op = "run",
                    result = "soft_limit",
                    task_id = %record.id,
                    kind = %record.kind,
                    soft_limit_secs = soft.as_secs_f64(),
                    "task exceeded soft time limit"
                );
            }
        }

        let remaining = self.config.hard_time_limit.saturating_sub(soft);
        match tokio::time::timeout(remaining, &mut run).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskFailure::terminal(format!(
                "hard time limit of {}s exceeded",
                self.config.hard_time_limit.as_secs_f64()
            ))),
        }
    }

    /// Persist the outcome. Returns whether the delivery may be acknowledged.
    async fn settle(
        &self,
        record: &mut TaskRecord,
        outcome: Result<serde_json::Value, TaskFailure>,
        elapsed_ms: u64,
    ) -> bool {
        let kind = record.kind.as_str();
        let persisted = match outcome {
            Ok(result) => {
                let persisted = self.pipeline.complete(record, result).await;
                if persisted.is_ok() {
                    metrics::counter!("pressroom_task_succeeded_total", "kind" => kind)
                        .increment(1);
                    info!(
                        target = TARGET,
                        op = "run",
                        result = "success",
                        task_id = %record.id,
                        kind,
                        retries = record.retries,
                        elapsed_ms,
                        "task succeeded"
                    );
                }
                persisted.map_err(|err| err.to_string())
            }
            Err(TaskFailure::Retryable(message)) => {
                match self.pipeline.retry_policy(record.kind).decide(record.retries) {
                    RetryDecision::Retry { delay, .. } => self
                        .pipeline
                        .schedule_retry(record, message, delay)
                        .await
                        .map_err(|err| err.to_string()),
                    RetryDecision::Exhausted => {
                        let persisted = self.pipeline.exhaust(record, message).await;
                        if persisted.is_ok() {
                            self.record_failure(record, elapsed_ms);
                        }
                        persisted.map_err(|err| err.to_string())
                    }
                }
            }
            Err(TaskFailure::Terminal(message)) => {
                let persisted = self.pipeline.fail(record, message).await;
                if persisted.is_ok() {
                    self.record_failure(record, elapsed_ms);
                }
                persisted.map_err(|err| err.to_string())
            }
        };

        match persisted {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target = TARGET,
                    op = "settle",
                    result = "store_error",
                    task_id = %record.id,
                    kind,
                    error = %err,
                    "task outcome not persisted; message will be redelivered"
                );
                false
            }
        }
    }

    fn record_failure(&self, record: &TaskRecord, elapsed_ms: u64) {
        metrics::counter!("pressroom_task_failed_total", "kind" => record.kind.as_str())
            .increment(1);
        warn!(
            target = TARGET,
            op = "run",
            result = "failed",
            task_id = %record.id,
            kind = %record.kind,
            retries = record.retries,
            elapsed_ms,
            error = record.error.as_deref().unwrap_or_default(),
            "task failed"
        );
    }
}
