//! Batch fan-out: one child build task per request.
//!
//! The report describes submission only. Children run independently and must be polled by
//! their own ids.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::domain::documents::DocumentRequest;

use super::pipeline::TaskPipeline;
use super::registry::{TaskHandler, TaskInvocation};
use super::types::TaskFailure;

const TARGET: &str = "pressroom::tasks::batch";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPayload {
    pub requests: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub index: usize,
    pub task_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub submitted: usize,
    pub failed: Vec<BatchFailure>,
    pub results: Vec<BatchSubmission>,
}

/// Submit every request as its own task. A bad entry is reported at its index and does not
/// affect the others.
pub async fn fan_out(pipeline: &TaskPipeline, requests: &[Value]) -> BatchReport {
    let mut failed = Vec::new();
    let mut results = Vec::new();

    for (index, raw) in requests.iter().enumerate() {
        let submitted = match serde_json::from_value::<DocumentRequest>(raw.clone()) {
            Ok(request) => match request.validate() {
                Ok(()) => pipeline
                    .submit_document(&request)
                    .await
                    .map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            },
            Err(err) => Err(format!("malformed request: {err}")),
        };

        match submitted {
            Ok(task_id) => results.push(BatchSubmission { index, task_id }),
            Err(error) => failed.push(BatchFailure { index, error }),
        }
    }

    BatchReport {
        total: requests.len(),
        submitted: results.len(),
        failed,
        results,
    }
}

pub struct BatchHandler {
    pipeline: Arc<TaskPipeline>,
}

impl BatchHandler {
    pub fn new(pipeline: Arc<TaskPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl TaskHandler for BatchHandler {
    async fn handle(&self, invocation: &TaskInvocation) -> Result<Value, TaskFailure> {
        let payload: BatchPayload = serde_json::from_value(invocation.payload.clone())
            .map_err(|err| TaskFailure::terminal(format!("invalid batch payload: {err}")))?;

        let report = fan_out(&self.pipeline, &payload.requests).await;
        info!(
            target = TARGET,
            op = "fan_out",
            task_id = %invocation.task_id,
            total = report.total,
            submitted = report.submitted,
            failed = report.failed.len(),
            "batch submitted"
        );

        serde_json::to_value(&report)
            .map_err(|err| TaskFailure::terminal(format!("encode batch report: {err}")))
    }
}
