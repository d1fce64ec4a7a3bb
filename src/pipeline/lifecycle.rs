//! Guarded status transitions for pipeline stages.
//!
//! Every stage entry, exit, and failure runs through one compare-and-swap on the store, so
//! concurrent callers racing for the same source see exactly one winner and statuses only ever
//! move forward through [`next_status`].

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    source::{FileRef, Source, SourceStatus, Stage, StatusEvent, TransitionError, next_status},
    store::{CasOutcome, SourcePatch, SourceStore},
};

use super::types::{PipelineError, StageArtifact, StageEntry};

/// Applies lifecycle events to sources through the store's atomic status swap.
#[derive(Clone)]
pub struct LifecycleController {
    store: Arc<dyn SourceStore>,
}

impl LifecycleController {
    /// Wrap the store used for all status writes.
    pub fn new(store: Arc<dyn SourceStore>) -> Self {
        Self { store }
    }

    async fn load(&self, id: Uuid) -> Result<Source, PipelineError> {
        self.store
            .get_source(id)
            .await?
            .ok_or(PipelineError::SourceNotFound(id))
    }

    /// Record the uploaded binary on a `pending` source.
    pub async fn record_upload(
        &self,
        id: Uuid,
        patch: SourcePatch,
    ) -> Result<Source, PipelineError> {
        self.apply_event(id, StatusEvent::Upload, patch).await
    }

    /// Record a plain-text upload on a `pending` source and move it straight to `processed`.
    ///
    /// The upload doubles as the extracted text; both references land in one status write, so
    /// no OCR trigger can observe the source in `uploaded`.
    pub async fn record_text_upload(&self, id: Uuid, file: FileRef) -> Result<Source, PipelineError> {
        let patch = SourcePatch {
            source_file_ref: Some(file.clone()),
            text_file_ref: Some(file),
            ..SourcePatch::default()
        };
        self.apply_event(id, StatusEvent::UploadText, patch).await
    }

    async fn apply_event(
        &self,
        id: Uuid,
        event: StatusEvent,
        patch: SourcePatch,
    ) -> Result<Source, PipelineError> {
        let current = self.load(id).await?;
        let next = next_status(current.status, event)?;
        match self
            .store
            .compare_and_swap_status(id, current.status, next, patch)
            .await?
        {
            CasOutcome::Applied(source) => {
                tracing::info!(source_id = %id, from = %current.status, to = %next, %event, "Source status changed");
                Ok(source)
            }
            CasOutcome::Conflict { actual } => Err(TransitionError {
                from: actual,
                event,
            }
            .into()),
        }
    }

    /// Enter `stage`, moving the source from the stage's required status to its running status.
    ///
    /// Returns [`StageEntry::AlreadyRunning`] without writing when another caller holds the
    /// stage. Completed stages yield [`PipelineError::AlreadyDone`]; any other status mismatch,
    /// including `failed`, yields [`PipelineError::InvalidTransition`].
    pub async fn begin_stage(&self, id: Uuid, stage: Stage) -> Result<StageEntry, PipelineError> {
        let source = self.load(id).await?;
        let required = stage.required_status();
        let running = stage.running_status();

        if source.status == running {
            return Ok(StageEntry::AlreadyRunning);
        }
        if source.status != required {
            return Err(mismatch(id, stage, source.status));
        }
        if stage == Stage::Ocr
            && source
                .source_file_ref
                .as_ref()
                .is_some_and(FileRef::is_plain_text)
        {
            return Err(PipelineError::OcrNotApplicable(id));
        }
        if let Some(missing) = missing_prerequisite(&source, stage) {
            return Err(PipelineError::MissingPrerequisite {
                source_id: id,
                missing,
            });
        }

        let next = next_status(required, StatusEvent::Begin(stage))?;
        match self
            .store
            .compare_and_swap_status(id, required, next, SourcePatch::default())
            .await?
        {
            CasOutcome::Applied(source) => {
                tracing::info!(source_id = %id, %stage, "Stage started");
                Ok(StageEntry::Started(source))
            }
            CasOutcome::Conflict { actual } if actual == running => {
                tracing::debug!(source_id = %id, %stage, "Stage claimed by a concurrent caller");
                Ok(StageEntry::AlreadyRunning)
            }
            CasOutcome::Conflict { actual } => Err(mismatch(id, stage, actual)),
        }
    }

    /// Leave the running status of the artifact's stage, persisting the artifact in the same
    /// write.
    pub async fn complete_stage(
        &self,
        id: Uuid,
        artifact: StageArtifact,
    ) -> Result<Source, PipelineError> {
        let stage = artifact.stage();
        let running = stage.running_status();
        let next = next_status(running, StatusEvent::Complete(stage))?;
        let patch = match artifact {
            StageArtifact::Ocr { text_file_ref } => SourcePatch {
                text_file_ref: Some(text_file_ref),
                ..SourcePatch::default()
            },
            StageArtifact::Summarization {
                summary_file_ref,
                themes,
            } => SourcePatch {
                summary_file_ref: Some(summary_file_ref),
                themes: Some(themes),
                ..SourcePatch::default()
            },
        };

        match self
            .store
            .compare_and_swap_status(id, running, next, patch)
            .await?
        {
            CasOutcome::Applied(source) => {
                tracing::info!(source_id = %id, %stage, status = %next, "Stage completed");
                Ok(source)
            }
            CasOutcome::Conflict { actual } => Err(TransitionError {
                from: actual,
                event: StatusEvent::Complete(stage),
            }
            .into()),
        }
    }

    /// Move a source to `failed`, logging `cause`.
    ///
    /// Idempotent for sources already `failed`. A `summarized` source cannot fail.
    pub async fn fail_stage(&self, id: Uuid, cause: &PipelineError) -> Result<Source, PipelineError> {
        tracing::error!(source_id = %id, error = %cause, "Pipeline stage failed");
        loop {
            let current = self.load(id).await?;
            if current.status == SourceStatus::Failed {
                return Ok(current);
            }
            let next = next_status(current.status, StatusEvent::Fail)?;
            match self
                .store
                .compare_and_swap_status(id, current.status, next, SourcePatch::default())
                .await?
            {
                CasOutcome::Applied(source) => {
                    tracing::warn!(source_id = %id, from = %current.status, "Source marked failed");
                    return Ok(source);
                }
                CasOutcome::Conflict { actual } => {
                    tracing::debug!(source_id = %id, %actual, "Status moved while failing; retrying");
                }
            }
        }
    }
}

fn mismatch(id: Uuid, stage: Stage, status: SourceStatus) -> PipelineError {
    let reached_completion = status != SourceStatus::Failed
        && status
            .progress()
            .zip(stage.completed_status().progress())
            .is_some_and(|(actual, done)| actual >= done);
    if reached_completion {
        PipelineError::AlreadyDone {
            source_id: id,
            stage,
        }
    } else {
        PipelineError::InvalidTransition {
            source_id: id,
            stage,
            status,
        }
    }
}

fn missing_prerequisite(source: &Source, stage: Stage) -> Option<&'static str> {
    match stage {
        Stage::Ocr if source.source_file_ref.is_none() => Some("source file"),
        Stage::Summarization if source.text_file_ref.is_none() => Some("extracted text"),
        _ => None,
    }
}
