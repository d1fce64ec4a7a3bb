//! Source records, file references, and projects.

mod status;

pub use status::{
    SourceStatus, Stage, StatusEvent, TransitionError, UnknownStatus, next_status,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use uuid::Uuid;

/// MIME type attached to extracted text and summaries.
pub const TEXT_PLAIN: &str = "text/plain";

/// Opaque handle to stored content, owned by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Unique identifier of the stored file.
    pub id: Uuid,
    /// Display name, usually the original file name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type reported at upload or assigned by the pipeline.
    pub mime_type: String,
    /// Storage location; relative locations are resolved by the storage collaborator.
    pub location: PathBuf,
}

impl FileRef {
    /// Build a reference with a fresh identifier.
    pub fn new(
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            location: location.into(),
        }
    }

    /// Whether the content is already plain text or markdown and needs no OCR.
    pub fn is_plain_text(&self) -> bool {
        let mime = self.mime_type.trim().to_ascii_lowercase();
        if mime.starts_with("text/plain") || mime.starts_with("text/markdown") {
            return true;
        }
        has_extension(&self.name, &["txt", "md", "markdown"])
    }
}

fn has_extension(name: &str, candidates: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| candidates.iter().any(|c| ext.eq_ignore_ascii_case(c)))
        .unwrap_or(false)
}

/// Unit of document content moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Immutable identifier assigned at creation.
    pub id: Uuid,
    /// Owning project.
    pub project_id: String,
    /// Current pipeline status.
    pub status: SourceStatus,
    /// Original upload.
    pub source_file_ref: Option<FileRef>,
    /// Extracted plain text.
    pub text_file_ref: Option<FileRef>,
    /// Generated summary.
    pub summary_file_ref: Option<FileRef>,
    /// Topic labels produced by summarization.
    pub themes: Vec<String>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Time of the last state-affecting write.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Embedding of the extracted text, used only for retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_embedding: Option<Vec<f32>>,
}

impl Source {
    /// Create a `pending` source for the given project.
    pub fn new(project_id: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            status: SourceStatus::Pending,
            source_file_ref: None,
            text_file_ref: None,
            summary_file_ref: None,
            themes: Vec::new(),
            created_at: now,
            updated_at: now,
            text_embedding: None,
        }
    }
}

/// Project grouping sources; only its display name is managed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier.
    pub id: String,
    /// Display name, replaced by the title aggregator.
    pub name: String,
    /// Time of the last rename.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Project {
    /// Create a project record.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_detection_uses_mime_and_extension() {
        assert!(FileRef::new("notes.md", 1, "application/octet-stream", "notes.md").is_plain_text());
        assert!(FileRef::new("blob", 1, "text/plain; charset=utf-8", "blob").is_plain_text());
        assert!(!FileRef::new("paper.pdf", 1, "application/pdf", "paper.pdf").is_plain_text());
    }

    #[test]
    fn new_source_starts_pending_without_artifacts() {
        let source = Source::new("project-1");
        assert_eq!(source.status, SourceStatus::Pending);
        assert!(source.source_file_ref.is_none());
        assert!(source.themes.is_empty());
        assert_eq!(source.created_at, source.updated_at);
    }

    #[test]
    fn source_serializes_status_lowercase() {
        let source = Source::new("p");
        let json = serde_json::to_value(&source).expect("serialize");
        assert_eq!(json["status"], "pending");
        assert!(json.get("text_embedding").is_none());
    }
}
