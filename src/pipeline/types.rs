//! Error taxonomy and shared result types for the pipeline.

use crate::{
    embedding::EmbeddingClientError,
    llm::GenerationClientError,
    retrieval::SimilarityError,
    source::{FileRef, Source, SourceStatus, Stage, TransitionError},
    storage::StorageError,
    store::StoreError,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source id is unknown.
    #[error("source {0} not found")]
    SourceNotFound(Uuid),
    /// Project id is unknown.
    #[error("project {0} not found")]
    ProjectNotFound(String),
    /// Stage attempted from a status that does not allow it.
    #[error("cannot start {stage} for source {source_id}: status is '{status}'")]
    InvalidTransition {
        /// Affected source.
        source_id: Uuid,
        /// Stage that was attempted.
        stage: Stage,
        /// Status found on the record.
        status: SourceStatus,
    },
    /// Status write rejected by the state machine.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// Another caller is running the same stage for this source.
    #[error("{stage} already in progress for source {source_id}")]
    AlreadyInProgress {
        /// Affected source.
        source_id: Uuid,
        /// Stage already running.
        stage: Stage,
    },
    /// The stage already completed for this source.
    #[error("{stage} already completed for source {source_id}")]
    AlreadyDone {
        /// Affected source.
        source_id: Uuid,
        /// Stage that already ran.
        stage: Stage,
    },
    /// OCR was requested for an upload that already is plain text.
    #[error("source {0} is plain text and needs no OCR")]
    OcrNotApplicable(Uuid),
    /// A file reference the stage needs is absent.
    #[error("source {source_id} has no {missing}")]
    MissingPrerequisite {
        /// Affected source.
        source_id: Uuid,
        /// Name of the absent reference.
        missing: &'static str,
    },
    /// OCR process failed, exited non-zero, wrote to stderr, or timed out.
    #[error("OCR process failed: {0}")]
    ProcessFailure(String),
    /// OCR process produced more output than allowed.
    #[error("OCR process output exceeded {limit} bytes")]
    ProcessOutputOverflow {
        /// Configured cap in bytes.
        limit: usize,
    },
    /// Text-generation or embedding service failed or answered malformed.
    #[error("service call failed: {0}")]
    ServiceFailure(String),
    /// Theme extraction returned no themes.
    #[error("theme extraction returned no themes")]
    MissingThemes,
    /// Context assembly found no user message.
    #[error("conversation contains no user message")]
    NoUserMessage,
    /// Vectors of different dimensionality were compared.
    #[error(transparent)]
    DimensionMismatch(#[from] SimilarityError),
    /// Persistence layer failed.
    #[error("store error: {0}")]
    Store(StoreError),
    /// Storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<StoreError> for PipelineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::SourceNotFound(id) => Self::SourceNotFound(id),
            StoreError::ProjectNotFound(id) => Self::ProjectNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl From<GenerationClientError> for PipelineError {
    fn from(error: GenerationClientError) -> Self {
        Self::ServiceFailure(error.to_string())
    }
}

impl From<EmbeddingClientError> for PipelineError {
    fn from(error: EmbeddingClientError) -> Self {
        Self::ServiceFailure(error.to_string())
    }
}

/// Artifact written when a stage completes.
#[derive(Debug, Clone, PartialEq)]
pub enum StageArtifact {
    /// Extracted text produced by OCR.
    Ocr {
        /// Reference to the extracted plain text.
        text_file_ref: FileRef,
    },
    /// Summary and themes produced by summarization.
    Summarization {
        /// Reference to the stored summary.
        summary_file_ref: FileRef,
        /// Extracted topic labels.
        themes: Vec<String>,
    },
}

impl StageArtifact {
    /// Stage that produced this artifact.
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Ocr { .. } => Stage::Ocr,
            Self::Summarization { .. } => Stage::Summarization,
        }
    }
}

/// Result of asking the controller to enter a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEntry {
    /// The caller won the status swap and must run the stage.
    Started(Source),
    /// The stage is already running under another caller; nothing was changed.
    AlreadyRunning,
}

/// Result of a project title request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TitleOutcome {
    /// Project renamed.
    Renamed {
        /// New display name.
        title: String,
    },
    /// Project has no sources or some are not yet summarized; nothing was called.
    NotReady {
        /// Sources in the project.
        total: usize,
        /// Sources that reached `summarized`.
        summarized: usize,
    },
    /// Every source is summarized but none carries a theme; nothing was called.
    NoThemes,
}
