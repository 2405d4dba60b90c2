use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::OutputFormat;
use crate::infra::kv::StoreError;

/// Unit of work the pipeline knows how to run. Each kind has its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    BuildArtifact,
    RenderSource,
    Batch,
    Cleanup,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::BuildArtifact,
        TaskKind::RenderSource,
        TaskKind::Batch,
        TaskKind::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::BuildArtifact => "build-artifact",
            TaskKind::RenderSource => "render-source",
            TaskKind::Batch => "batch",
            TaskKind::Cleanup => "cleanup",
        }
    }

    /// Retries allowed after the first attempt.
    pub fn max_retries(self) -> u32 {
        match self {
            TaskKind::BuildArtifact => 3,
            TaskKind::RenderSource => 2,
            TaskKind::Batch | TaskKind::Cleanup => 0,
        }
    }

    /// Build kind for a requested output format. Source-only output is cheaper and retried
    /// less.
    pub fn for_format(format: OutputFormat) -> Self {
        if format.artifact_type().is_binary() {
            TaskKind::BuildArtifact
        } else {
            TaskKind::RenderSource
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Submitted,
    Processing,
    Success,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Submitted => "SUBMITTED",
            TaskState::Processing => "PROCESSING",
            TaskState::Success => "SUCCESS",
            TaskState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted view of one task, owned by the worker that runs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub kind: TaskKind,
    pub payload: Value,
    pub state: TaskState,
    pub retries: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TaskRecord {
    pub fn submitted(kind: TaskKind, payload: Value, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            state: TaskState::Submitted,
            retries: 0,
            max_retries: kind.max_retries(),
            result: None,
            error: None,
            submitted_at: now,
            updated_at: now,
        }
    }

    /// What a poller sees: the handler's result on success, `{status, error}` on failure.
    pub fn outcome(&self) -> Option<Value> {
        match self.state {
            TaskState::Success => self.result.clone(),
            TaskState::Failed => Some(json!({
                "status": TaskState::Failed.as_str(),
                "error": self.error.clone().unwrap_or_default(),
            })),
            TaskState::Submitted | TaskState::Processing => None,
        }
    }
}

/// Outcome of a failed handler run; the pipeline decides between retry and failure from the
/// variant alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Terminal(String),
}

impl TaskFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }
}

/// Recorded once a retryable failure has used up the kind's retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} task exhausted {retries} retries: {last_error}")]
pub struct TaskExhausted {
    pub kind: TaskKind,
    pub retries: u32,
    pub last_error: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("task {0} not found")]
    UnknownTask(Uuid),
    #[error("no queue for {0} tasks")]
    QueueClosed(TaskKind),
    #[error("invalid task payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_as_queue_names() {
        for kind in TaskKind::ALL {
            let encoded = serde_json::to_value(kind).expect("encode");
            assert_eq!(encoded, Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn retry_budgets_follow_build_cost() {
        assert_eq!(TaskKind::BuildArtifact.max_retries(), 3);
        assert_eq!(TaskKind::RenderSource.max_retries(), 2);
        assert_eq!(TaskKind::for_format(OutputFormat::Docx), TaskKind::BuildArtifact);
        assert_eq!(TaskKind::for_format(OutputFormat::Latex), TaskKind::RenderSource);
    }

    #[test]
    fn failed_outcome_carries_error() {
        let mut record = TaskRecord::submitted(TaskKind::Batch, json!({}), OffsetDateTime::UNIX_EPOCH);
        assert!(record.outcome().is_none());

        record.state = TaskState::Failed;
        record.error = Some("boom".into());
        assert_eq!(
            record.outcome(),
            Some(json!({"status": "FAILED", "error": "boom"}))
        );
    }
}
