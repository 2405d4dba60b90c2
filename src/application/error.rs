use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    application::{
        builder::BuildError,
        documents::DocumentError,
        tasks::PipelineError,
    },
    cache::SerializationError,
    domain::error::DomainError,
    infra::{error::InfraError, kv::StoreError},
};

/// Error detail attached to a response for the response-logging middleware. Never sent to
/// the client.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("template `{template_name}` not found for document kind `{document_kind}`")]
    TemplateNotFound {
        document_kind: String,
        template_name: String,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<DocumentError> for AppError {
    fn from(error: DocumentError) -> Self {
        match error {
            DocumentError::Domain(err) => AppError::Domain(err),
            DocumentError::TemplateNotFound {
                document_kind,
                template_name,
            } => AppError::TemplateNotFound {
                document_kind,
                template_name,
            },
            DocumentError::Serialization(err) => AppError::Serialization(err),
            DocumentError::Build(err) => AppError::Build(err),
            DocumentError::Aborted(message) => AppError::Unexpected(message),
        }
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Validation(_)
            | AppError::Serialization(_) => StatusCode::BAD_REQUEST,
            AppError::TemplateNotFound { .. } | AppError::Pipeline(PipelineError::UnknownTask(_)) => {
                StatusCode::NOT_FOUND
            }
            AppError::Build(BuildError::Validation { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Build(BuildError::TimedOut { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Build(_) => StatusCode::BAD_GATEWAY,
            AppError::Pipeline(PipelineError::Payload(_)) => StatusCode::BAD_REQUEST,
            AppError::Pipeline(PipelineError::Store(_))
            | AppError::Pipeline(PipelineError::QueueClosed(_))
            | AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> String {
        match self {
            AppError::Domain(_)
            | AppError::Validation(_)
            | AppError::Serialization(_)
            | AppError::TemplateNotFound { .. }
            | AppError::Build(BuildError::Validation { .. })
            | AppError::Pipeline(PipelineError::UnknownTask(_))
            | AppError::Pipeline(PipelineError::Payload(_)) => self.to_string(),
            AppError::Build(BuildError::TimedOut { .. }) => "Document build timed out".to_string(),
            AppError::Build(_) => "Document build failed".to_string(),
            AppError::Pipeline(_) | AppError::Store(_) => {
                "Service temporarily unavailable".to_string()
            }
            AppError::Infra(_) | AppError::Unexpected(_) => "Unexpected error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, Json(json!({ "error": message }))).into_response();
        report.attach(&mut response);
        response
    }
}
