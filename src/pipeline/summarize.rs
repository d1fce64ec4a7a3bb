//! Summarization stage: one free-text summary call followed by one structured theme call.
//!
//! Nothing is persisted unless both calls succeed; the summary file is written and the stage is
//! completed in one step at the end.

mod prompt;
mod themes;

pub use themes::{ParsedThemes, parse_themes};

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    config::Config,
    llm::{GenerationClient, GenerationRequest},
    metrics::PipelineMetrics,
    source::{FileRef, Source, Stage, TEXT_PLAIN},
    storage::{FileStorage, read_text},
};

use super::{
    lifecycle::LifecycleController,
    types::{PipelineError, StageArtifact, StageEntry},
};
use prompt::{SUMMARY_SYSTEM, THEMES_SYSTEM, build_summary_prompt, build_themes_prompt};
use themes::{themes_schema, within_word_bounds};

/// Models and bounds used by the summarization stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarySettings {
    /// Model writing the summary.
    pub summary_model: String,
    /// Model extracting themes.
    pub theme_model: String,
    /// Sentence budget requested for the summary.
    pub max_sentences: usize,
    /// Lower word bound requested per theme.
    pub theme_min_words: usize,
    /// Upper word bound requested per theme.
    pub theme_max_words: usize,
}

impl SummarySettings {
    /// Derive settings from the runtime configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            summary_model: config.summary_model.clone(),
            theme_model: config.theme_model.clone(),
            max_sentences: config.summary_max_sentences,
            theme_min_words: config.theme_min_words,
            theme_max_words: config.theme_max_words,
        }
    }
}

/// Runs the summarization stage.
pub struct SummarizationRunner {
    settings: SummarySettings,
    lifecycle: LifecycleController,
    storage: Arc<dyn FileStorage>,
    llm: Arc<dyn GenerationClient>,
    metrics: Arc<PipelineMetrics>,
}

impl SummarizationRunner {
    /// Assemble a runner from its collaborators.
    pub fn new(
        settings: SummarySettings,
        lifecycle: LifecycleController,
        storage: Arc<dyn FileStorage>,
        llm: Arc<dyn GenerationClient>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            settings,
            lifecycle,
            storage,
            llm,
            metrics,
        }
    }

    /// Enter the summarization stage and produce the summary and themes.
    ///
    /// Any failure after the stage was entered moves the source to `failed` before the error is
    /// returned.
    pub async fn run(&self, source_id: Uuid) -> Result<Source, PipelineError> {
        let source = match self
            .lifecycle
            .begin_stage(source_id, Stage::Summarization)
            .await?
        {
            StageEntry::Started(source) => source,
            StageEntry::AlreadyRunning => {
                return Err(PipelineError::AlreadyInProgress {
                    source_id,
                    stage: Stage::Summarization,
                });
            }
        };

        let outcome = async {
            let artifact = self.summarize(&source).await?;
            self.lifecycle.complete_stage(source_id, artifact).await
        };
        match outcome.await {
            Ok(source) => {
                self.metrics.record_summary();
                Ok(source)
            }
            Err(error) => {
                self.metrics.record_failure();
                self.lifecycle.fail_stage(source_id, &error).await?;
                Err(error)
            }
        }
    }

    async fn summarize(&self, source: &Source) -> Result<StageArtifact, PipelineError> {
        let text_file = source
            .text_file_ref
            .as_ref()
            .ok_or(PipelineError::MissingPrerequisite {
                source_id: source.id,
                missing: "extracted text",
            })?;
        let text = read_text(self.storage.as_ref(), text_file).await?;

        tracing::info!(source_id = %source.id, chars = text.len(), model = %self.settings.summary_model, "Generating summary");
        let summary = self
            .llm
            .generate(GenerationRequest::text(
                &self.settings.summary_model,
                SUMMARY_SYSTEM,
                build_summary_prompt(&text, self.settings.max_sentences),
            ))
            .await?
            .into_text();
        if summary.trim().is_empty() {
            return Err(PipelineError::ServiceFailure(
                "summary model returned an empty answer".into(),
            ));
        }

        let themes = self.extract_themes(source.id, &text).await?;

        let summary_file_ref = self
            .storage
            .write(&summary_file_name(text_file), TEXT_PLAIN, summary.as_bytes())
            .await?;

        Ok(StageArtifact::Summarization {
            summary_file_ref,
            themes,
        })
    }

    async fn extract_themes(&self, source_id: Uuid, text: &str) -> Result<Vec<String>, PipelineError> {
        tracing::info!(%source_id, model = %self.settings.theme_model, "Extracting themes");
        let content = self
            .llm
            .generate(GenerationRequest::structured(
                &self.settings.theme_model,
                THEMES_SYSTEM,
                build_themes_prompt(
                    text,
                    self.settings.theme_min_words,
                    self.settings.theme_max_words,
                ),
                themes_schema(),
            ))
            .await?;

        match parse_themes(content) {
            ParsedThemes::Themes(themes) => {
                for theme in &themes {
                    if !within_word_bounds(
                        theme,
                        self.settings.theme_min_words,
                        self.settings.theme_max_words,
                    ) {
                        tracing::debug!(%source_id, theme = %theme, "Theme outside requested word bounds");
                    }
                }
                Ok(themes)
            }
            ParsedThemes::Empty => Err(PipelineError::MissingThemes),
            ParsedThemes::Malformed(reason) => Err(PipelineError::ServiceFailure(format!(
                "malformed theme response: {reason}"
            ))),
        }
    }
}

fn summary_file_name(text_file: &FileRef) -> String {
    let stem = Path::new(&text_file.name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("source");
    format!("{stem}_summary.txt")
}
