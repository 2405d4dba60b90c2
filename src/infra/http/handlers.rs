use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::tasks::{BatchPayload, PipelineError, TaskKind, TaskRecord, TaskState};
use crate::domain::documents::{Artifact, DocumentRequest};
use crate::domain::types::OutputFormat;

use super::state::AppState;

pub const CACHE_STATUS_HEADER: &str = "x-cache";

fn content_type(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Pdf => "application/pdf",
        OutputFormat::Docx => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        OutputFormat::Latex => "application/x-tex; charset=utf-8",
    }
}

/// Build synchronously, serving from the cache when possible.
pub async fn build_document(
    State(state): State<AppState>,
    Json(request): Json<DocumentRequest>,
) -> Result<Response, AppError> {
    let built = state.documents.build(&request).await?;

    let body = match built.artifact {
        Artifact::Binary(bytes) => bytes,
        Artifact::Source(text) => text.into_bytes(),
    };
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type(request.output_format)),
    );
    headers.insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(if built.cached { "HIT" } else { "MISS" }),
    );
    Ok(response)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmittedTask {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub state: TaskState,
}

pub async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<DocumentRequest>,
) -> Result<(StatusCode, Json<SubmittedTask>), AppError> {
    state.documents.check(&request)?;
    let task_id = state.pipeline.submit_document(&request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmittedTask {
            task_id,
            kind: TaskKind::for_format(request.output_format),
            state: TaskState::Submitted,
        }),
    ))
}

pub async fn submit_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchPayload>,
) -> Result<(StatusCode, Json<SubmittedTask>), AppError> {
    if payload.requests.is_empty() {
        return Err(AppError::validation("batch must contain at least one request"));
    }
    let payload = serde_json::to_value(&payload).map_err(PipelineError::from)?;
    let task_id = state.pipeline.submit(TaskKind::Batch, payload).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmittedTask {
            task_id,
            kind: TaskKind::Batch,
            state: TaskState::Submitted,
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub state: TaskState,
    pub retries: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl From<TaskRecord> for TaskStatus {
    fn from(record: TaskRecord) -> Self {
        Self {
            result: record.outcome(),
            task_id: record.id,
            kind: record.kind,
            state: record.state,
            retries: record.retries,
            max_retries: record.max_retries,
        }
    }
}

pub async fn task_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskStatus>, AppError> {
    let record = state.pipeline.status(id).await?;
    Ok(Json(record.into()))
}

pub async fn cache_metrics(State(state): State<AppState>) -> Response {
    Json(state.cache.metrics().await).into_response()
}

/// Selector for every format of one logical document.
#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub document_kind: String,
    pub template_name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub layout_variant: Option<String>,
}

pub async fn invalidate_cache(
    State(state): State<AppState>,
    Json(selector): Json<InvalidateRequest>,
) -> Result<Json<Value>, AppError> {
    let mut request = DocumentRequest::new(
        selector.document_kind,
        selector.template_name,
        selector.data,
        OutputFormat::Pdf,
    );
    if let Some(layout) = selector.layout_variant {
        request = request.with_layout(layout);
    }
    request.validate()?;

    let removed = state.cache.invalidate(&request).await?;
    Ok(Json(json!({ "removed": removed })))
}

pub async fn clear_cache(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let removed = state.cache.clear_all().await?;
    Ok(Json(json!({ "removed": removed })))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let metrics = state.cache.metrics().await;
    Json(json!({
        "status": "ok",
        "cache": {
            "enabled": metrics.enabled,
            "connected": metrics.connected,
        },
    }))
}
