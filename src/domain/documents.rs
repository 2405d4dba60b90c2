//! Document build requests and artifacts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DomainError;
use super::types::OutputFormat;

pub const DEFAULT_LAYOUT_VARIANT: &str = "normal";

fn default_layout_variant() -> String {
    DEFAULT_LAYOUT_VARIANT.to_string()
}

/// One logical document: the inputs that identify a build and its cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub document_kind: String,
    pub template_name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "default_layout_variant")]
    pub layout_variant: String,
    pub output_format: OutputFormat,
}

impl DocumentRequest {
    pub fn new(
        document_kind: impl Into<String>,
        template_name: impl Into<String>,
        data: Value,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            document_kind: document_kind.into(),
            template_name: template_name.into(),
            data,
            layout_variant: default_layout_variant(),
            output_format,
        }
    }

    pub fn with_layout(mut self, layout_variant: impl Into<String>) -> Self {
        self.layout_variant = layout_variant.into();
        self
    }

    /// Same document rendered in another format.
    pub fn with_format(&self, output_format: OutputFormat) -> Self {
        Self {
            output_format,
            ..self.clone()
        }
    }

    /// Reject requests that can never build. Cache keys embed the kind, so it must be a
    /// plain identifier.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.document_kind.trim().is_empty() {
            return Err(DomainError::validation("document_kind must not be empty"));
        }
        if self.document_kind.contains(':') {
            return Err(DomainError::validation(
                "document_kind must not contain `:`",
            ));
        }
        if self.template_name.trim().is_empty() {
            return Err(DomainError::validation("template_name must not be empty"));
        }
        if self.layout_variant.trim().is_empty() {
            return Err(DomainError::validation("layout_variant must not be empty"));
        }
        Ok(())
    }
}

/// Output of a build: compiled bytes or intermediate source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Binary(Vec<u8>),
    Source(String),
}

impl Artifact {
    pub fn len(&self) -> usize {
        match self {
            Artifact::Binary(bytes) => bytes.len(),
            Artifact::Source(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Artifact::Binary(bytes) => bytes,
            Artifact::Source(text) => text.as_bytes(),
        }
    }

    /// Rebuild an artifact from cached bytes for the given format.
    pub fn from_cached(format: OutputFormat, bytes: &[u8]) -> Option<Self> {
        if format.artifact_type().is_binary() {
            Some(Artifact::Binary(bytes.to_vec()))
        } else {
            String::from_utf8(bytes.to_vec()).ok().map(Artifact::Source)
        }
    }
}
