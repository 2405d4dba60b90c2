//! Shared enumerations for artifacts and output formats.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What the builder emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Pdf,
    Docx,
    Latex,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Pdf, OutputFormat::Docx, OutputFormat::Latex];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Docx => "docx",
            OutputFormat::Latex => "latex",
        }
    }

    /// File extension used for artifacts written to the scratch directory.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Docx => "docx",
            OutputFormat::Latex => "tex",
        }
    }

    /// Cache namespace the format is stored under.
    pub fn artifact_type(self) -> ArtifactType {
        match self {
            OutputFormat::Pdf => ArtifactType::Pdf,
            OutputFormat::Docx => ArtifactType::Docx,
            OutputFormat::Latex => ArtifactType::Latex,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key prefix. Binary artifacts (pdf, docx) are expensive to reproduce and live longer
/// than intermediate source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Pdf,
    Latex,
    Docx,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 3] = [ArtifactType::Pdf, ArtifactType::Latex, ArtifactType::Docx];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::Pdf => "pdf",
            ArtifactType::Latex => "latex",
            ArtifactType::Docx => "docx",
        }
    }

    pub fn is_binary(self) -> bool {
        !matches!(self, ArtifactType::Latex)
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
