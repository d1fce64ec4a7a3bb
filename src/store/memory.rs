//! In-memory [`SourceStore`] used by the server binary and tests.
//!
//! Records live in `HashMap`s behind `tokio::sync::RwLock`. The status swap checks and writes
//! under one write guard, so concurrent swaps on the same source serialize and exactly one of
//! them observes the expected status.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::source::{Project, Source, SourceStatus};

use super::{CasOutcome, SourcePatch, SourceStore, StoreError};

/// Process-local store.
#[derive(Default)]
pub struct InMemoryStore {
    sources: RwLock<HashMap<Uuid, Source>>,
    projects: RwLock<HashMap<String, Project>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SourceStore for InMemoryStore {
    async fn insert_source(&self, source: Source) -> Result<(), StoreError> {
        let mut sources = self.sources.write().await;
        if sources.contains_key(&source.id) {
            return Err(StoreError::Duplicate(source.id.to_string()));
        }
        sources.insert(source.id, source);
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>, StoreError> {
        Ok(self.sources.read().await.get(&id).cloned())
    }

    async fn list_project_sources(&self, project_id: &str) -> Result<Vec<Source>, StoreError> {
        let sources = self.sources.read().await;
        let mut matching: Vec<Source> = sources
            .values()
            .filter(|source| source.project_id == project_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn compare_and_swap_status(
        &self,
        id: Uuid,
        expected: SourceStatus,
        next: SourceStatus,
        patch: SourcePatch,
    ) -> Result<CasOutcome, StoreError> {
        let mut sources = self.sources.write().await;
        let source = sources.get_mut(&id).ok_or(StoreError::SourceNotFound(id))?;
        if source.status != expected {
            return Ok(CasOutcome::Conflict {
                actual: source.status,
            });
        }
        patch.apply(source);
        source.status = next;
        source.updated_at = OffsetDateTime::now_utc();
        Ok(CasOutcome::Applied(source.clone()))
    }

    async fn set_embedding(&self, id: Uuid, embedding: Vec<f32>) -> Result<(), StoreError> {
        let mut sources = self.sources.write().await;
        let source = sources.get_mut(&id).ok_or(StoreError::SourceNotFound(id))?;
        source.text_embedding = Some(embedding);
        Ok(())
    }

    async fn upsert_project(&self, project: Project) -> Result<(), StoreError> {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project);
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn rename_project(&self, id: &str, name: &str) -> Result<Project, StoreError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| StoreError::ProjectNotFound(id.to_string()))?;
        project.name = name.to_string();
        project.updated_at = OffsetDateTime::now_utc();
        Ok(project.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileRef;
    use std::sync::Arc;

    #[tokio::test]
    async fn swap_applies_patch_and_bumps_updated_at() {
        let store = InMemoryStore::new();
        let source = Source::new("p1");
        let id = source.id;
        let created = source.updated_at;
        store.insert_source(source).await.expect("insert");

        let file = FileRef::new("a.pdf", 10, "application/pdf", "a.pdf");
        let outcome = store
            .compare_and_swap_status(
                id,
                SourceStatus::Pending,
                SourceStatus::Uploaded,
                SourcePatch {
                    source_file_ref: Some(file.clone()),
                    ..SourcePatch::default()
                },
            )
            .await
            .expect("swap");

        let CasOutcome::Applied(updated) = outcome else {
            panic!("expected applied swap");
        };
        assert_eq!(updated.status, SourceStatus::Uploaded);
        assert_eq!(updated.source_file_ref, Some(file));
        assert!(updated.updated_at >= created);
    }

    #[tokio::test]
    async fn swap_reports_conflict_without_writing() {
        let store = InMemoryStore::new();
        let source = Source::new("p1");
        let id = source.id;
        store.insert_source(source).await.expect("insert");

        let outcome = store
            .compare_and_swap_status(
                id,
                SourceStatus::Uploaded,
                SourceStatus::Processing,
                SourcePatch::default(),
            )
            .await
            .expect("swap");

        assert_eq!(
            outcome,
            CasOutcome::Conflict {
                actual: SourceStatus::Pending
            }
        );
        let stored = store.get_source(id).await.expect("get").expect("present");
        assert_eq!(stored.status, SourceStatus::Pending);
    }

    #[tokio::test]
    async fn concurrent_swaps_have_a_single_winner() {
        let store = Arc::new(InMemoryStore::new());
        let source = Source::new("p1");
        let id = source.id;
        store.insert_source(source).await.expect("insert");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_swap_status(
                        id,
                        SourceStatus::Pending,
                        SourceStatus::Uploaded,
                        SourcePatch::default(),
                    )
                    .await
                    .expect("swap")
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.expect("join"), CasOutcome::Applied(_)) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn swap_on_missing_source_is_an_error() {
        let store = InMemoryStore::new();
        let error = store
            .compare_and_swap_status(
                Uuid::new_v4(),
                SourceStatus::Pending,
                SourceStatus::Uploaded,
                SourcePatch::default(),
            )
            .await
            .expect_err("missing source");
        assert!(matches!(error, StoreError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn rename_requires_existing_project() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.rename_project("nope", "Title").await,
            Err(StoreError::ProjectNotFound(_))
        ));

        store
            .upsert_project(Project::new("p1", "Untitled"))
            .await
            .expect("upsert");
        let renamed = store.rename_project("p1", "Machine Learning").await.expect("rename");
        assert_eq!(renamed.name, "Machine Learning");
    }

    #[tokio::test]
    async fn project_listing_filters_by_project() {
        let store = InMemoryStore::new();
        store.insert_source(Source::new("a")).await.expect("insert");
        store.insert_source(Source::new("a")).await.expect("insert");
        store.insert_source(Source::new("b")).await.expect("insert");

        assert_eq!(store.list_project_sources("a").await.expect("list").len(), 2);
        assert!(store.list_project_sources("c").await.expect("list").is_empty());
    }
}
