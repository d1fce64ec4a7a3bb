//! Persistence collaborator for sources and projects.
//!
//! The pipeline only needs record CRUD plus one atomic primitive,
//! [`SourceStore::compare_and_swap_status`], which every stage entry and exit goes through.

mod memory;

pub use memory::InMemoryStore;

use crate::source::{FileRef, Project, Source, SourceStatus};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No source with the given id.
    #[error("source {0} not found")]
    SourceNotFound(Uuid),
    /// No project with the given id.
    #[error("project {0} not found")]
    ProjectNotFound(String),
    /// A record with the same id already exists.
    #[error("record {0} already exists")]
    Duplicate(String),
    /// Backend failure outside the pipeline's control.
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Field changes written together with a status swap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePatch {
    /// New original-upload reference.
    pub source_file_ref: Option<FileRef>,
    /// New extracted-text reference.
    pub text_file_ref: Option<FileRef>,
    /// New summary reference.
    pub summary_file_ref: Option<FileRef>,
    /// Replacement theme list.
    pub themes: Option<Vec<String>>,
}

impl SourcePatch {
    /// Apply the populated fields to a source.
    pub fn apply(self, source: &mut Source) {
        if let Some(file) = self.source_file_ref {
            source.source_file_ref = Some(file);
        }
        if let Some(file) = self.text_file_ref {
            source.text_file_ref = Some(file);
        }
        if let Some(file) = self.summary_file_ref {
            source.summary_file_ref = Some(file);
        }
        if let Some(themes) = self.themes {
            source.themes = themes;
        }
    }
}

/// Result of an atomic status swap.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The status matched and the write was applied; carries the updated record.
    Applied(Source),
    /// The status had changed; nothing was written.
    Conflict {
        /// Status found on the record.
        actual: SourceStatus,
    },
}

/// CRUD over source and project records plus the atomic status swap.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Persist a new source.
    async fn insert_source(&self, source: Source) -> Result<(), StoreError>;

    /// Fetch a source by id.
    async fn get_source(&self, id: Uuid) -> Result<Option<Source>, StoreError>;

    /// Enumerate the sources of one project, oldest first.
    async fn list_project_sources(&self, project_id: &str) -> Result<Vec<Source>, StoreError>;

    /// Atomically move `id` from `expected` to `next`, applying `patch` and bumping
    /// `updated_at` in the same write. No write happens when the stored status differs.
    async fn compare_and_swap_status(
        &self,
        id: Uuid,
        expected: SourceStatus,
        next: SourceStatus,
        patch: SourcePatch,
    ) -> Result<CasOutcome, StoreError>;

    /// Replace the retrieval embedding of a source.
    async fn set_embedding(&self, id: Uuid, embedding: Vec<f32>) -> Result<(), StoreError>;

    /// Persist a project, replacing any record with the same id.
    async fn upsert_project(&self, project: Project) -> Result<(), StoreError>;

    /// Fetch a project by id.
    async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError>;

    /// Change a project's display name.
    async fn rename_project(&self, id: &str, name: &str) -> Result<Project, StoreError>;
}
