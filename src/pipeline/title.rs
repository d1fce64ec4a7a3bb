//! Project title derived from the themes of all its summarized sources.

use std::collections::BTreeSet;
use std::sync::Arc;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::Config,
    llm::{GenerationClient, GenerationRequest, parse_structured},
    source::SourceStatus,
    store::SourceStore,
};

use super::types::{PipelineError, TitleOutcome};

const TITLE_SYSTEM: &str =
    "You name research projects and answer strictly with JSON matching the provided schema.";

/// Model and bounds for title generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleSettings {
    /// Model proposing the title.
    pub model: String,
    /// Maximum title length in characters.
    pub max_chars: usize,
}

impl TitleSettings {
    /// Derive settings from the runtime configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.title_model.clone(),
            max_chars: config.title_max_chars,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TitleResponse {
    /// Descriptive project title.
    title: String,
}

/// Collects project themes and asks the model for one descriptive title.
pub struct TitleAggregator {
    settings: TitleSettings,
    store: Arc<dyn SourceStore>,
    llm: Arc<dyn GenerationClient>,
}

impl TitleAggregator {
    /// Assemble an aggregator from its collaborators.
    pub fn new(
        settings: TitleSettings,
        store: Arc<dyn SourceStore>,
        llm: Arc<dyn GenerationClient>,
    ) -> Self {
        Self {
            settings,
            store,
            llm,
        }
    }

    /// Rename the project after its themes once every source is summarized.
    ///
    /// Empty or partially summarized projects and projects without any theme are left unchanged
    /// and no model call is made.
    pub async fn generate_title(&self, project_id: &str) -> Result<TitleOutcome, PipelineError> {
        if self.store.get_project(project_id).await?.is_none() {
            return Err(PipelineError::ProjectNotFound(project_id.to_string()));
        }

        let sources = self.store.list_project_sources(project_id).await?;
        let summarized = sources
            .iter()
            .filter(|source| source.status == SourceStatus::Summarized)
            .count();
        if sources.is_empty() || summarized < sources.len() {
            tracing::debug!(project_id, total = sources.len(), summarized, "Project not ready for a title");
            return Ok(TitleOutcome::NotReady {
                total: sources.len(),
                summarized,
            });
        }

        let themes: BTreeSet<&str> = sources
            .iter()
            .flat_map(|source| source.themes.iter())
            .map(|theme| theme.trim())
            .filter(|theme| !theme.is_empty())
            .collect();
        if themes.is_empty() {
            tracing::info!(project_id, "No themes collected; keeping project name");
            return Ok(TitleOutcome::NoThemes);
        }

        let prompt = build_title_prompt(&themes, self.settings.max_chars);
        tracing::info!(project_id, themes = themes.len(), model = %self.settings.model, "Generating project title");
        let content = self
            .llm
            .generate(GenerationRequest::structured(
                &self.settings.model,
                TITLE_SYSTEM,
                prompt,
                title_schema(),
            ))
            .await?;
        let response: TitleResponse = parse_structured(content).map_err(|error| {
            PipelineError::ServiceFailure(format!("malformed title response: {error}"))
        })?;

        let title = truncate_chars(response.title.trim(), self.settings.max_chars);
        if title.is_empty() {
            return Err(PipelineError::ServiceFailure(
                "title model returned an empty title".into(),
            ));
        }

        self.store.rename_project(project_id, &title).await?;
        tracing::info!(project_id, title = %title, "Project renamed");
        Ok(TitleOutcome::Renamed { title })
    }
}

fn title_schema() -> Value {
    serde_json::to_value(schema_for!(TitleResponse)).unwrap_or(Value::Null)
}

fn build_title_prompt(themes: &BTreeSet<&str>, max_chars: usize) -> String {
    let listed = themes.iter().copied().collect::<Vec<_>>().join(", ");
    format!(
        "A project contains documents about these themes: {listed}.\n\
         Propose one descriptive project title of at most {max_chars} characters, in the language \
         of the themes. Answer with a JSON object of the form {{\"title\": \"...\"}}."
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect::<String>().trim_end().to_string()
}
