//! Pipeline service wiring the lifecycle controller, stage runners, title aggregator, and
//! retrieval behind one facade.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    config::Config,
    embedding::{EmbeddingClient, OllamaEmbeddingClient, embed_text},
    llm::{ChatMessage, GenerationClient, OllamaGenerationClient},
    metrics::{MetricsSnapshot, PipelineMetrics},
    retrieval::{ContextAssembler, RetrievalSettings},
    source::{FileRef, Project, Source, StatusEvent, next_status},
    storage::{FileStorage, LocalStorage, read_text},
    store::{InMemoryStore, SourcePatch, SourceStore},
};

use super::{
    lifecycle::LifecycleController,
    ocr::{OcrRunner, OcrSettings},
    summarize::{SummarizationRunner, SummarySettings},
    title::{TitleAggregator, TitleSettings},
    types::{PipelineError, TitleOutcome},
};

/// Settings for every pipeline component.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// OCR process invocation.
    pub ocr: OcrSettings,
    /// Summary and theme generation.
    pub summary: SummarySettings,
    /// Project title generation.
    pub title: TitleSettings,
    /// Relevance threshold and embedding bounds.
    pub retrieval: RetrievalSettings,
    /// Model answering chat conversations.
    pub chat_model: String,
}

impl PipelineSettings {
    /// Derive all component settings from the runtime configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            ocr: OcrSettings::from_config(config),
            summary: SummarySettings::from_config(config),
            title: TitleSettings::from_config(config),
            retrieval: RetrievalSettings::from_config(config),
            chat_model: config.chat_model.clone(),
        }
    }
}

/// Binary content handed over at upload time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Original file name.
    pub name: String,
    /// Reported MIME type.
    pub mime_type: String,
    /// File content.
    pub bytes: Vec<u8>,
}

/// Collaborators the service is built from.
pub struct PipelineDeps {
    /// Source and project persistence.
    pub store: Arc<dyn SourceStore>,
    /// File content storage.
    pub storage: Arc<dyn FileStorage>,
    /// Text-generation provider.
    pub llm: Arc<dyn GenerationClient>,
    /// Embedding provider.
    pub embedder: Arc<dyn EmbeddingClient>,
}

/// Drives sources through upload, OCR, and summarization and serves retrieval.
///
/// Construct once at startup and share through an `Arc`; every operation is safe to call
/// concurrently, including for the same source.
pub struct PipelineService {
    store: Arc<dyn SourceStore>,
    storage: Arc<dyn FileStorage>,
    llm: Arc<dyn GenerationClient>,
    embedder: Arc<dyn EmbeddingClient>,
    lifecycle: LifecycleController,
    ocr: OcrRunner,
    summarizer: SummarizationRunner,
    titles: TitleAggregator,
    assembler: ContextAssembler,
    metrics: Arc<PipelineMetrics>,
    settings: PipelineSettings,
}

/// Operations exposed to the HTTP surface.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Create or replace a project record.
    async fn create_project(&self, id: &str, name: &str) -> Result<Project, PipelineError>;

    /// Create a `pending` source in an existing project.
    async fn create_source(&self, project_id: &str) -> Result<Source, PipelineError>;

    /// Fetch a source.
    async fn get_source(&self, id: Uuid) -> Result<Source, PipelineError>;

    /// Record an already stored binary and advance the source.
    async fn mark_uploaded(&self, id: Uuid, file: FileRef) -> Result<Source, PipelineError>;

    /// Store upload content and advance the source.
    async fn store_upload(&self, id: Uuid, upload: Upload) -> Result<Source, PipelineError>;

    /// Run the OCR stage.
    async fn begin_ocr(&self, id: Uuid) -> Result<Source, PipelineError>;

    /// Run the summarization stage.
    async fn begin_summarization(&self, id: Uuid) -> Result<Source, PipelineError>;

    /// Rename a fully summarized project after its themes.
    async fn generate_project_title(&self, project_id: &str) -> Result<TitleOutcome, PipelineError>;

    /// Sources of a project relevant to `query`.
    async fn relevant_project_sources(
        &self,
        project_id: &str,
        query: &str,
    ) -> Result<Vec<Source>, PipelineError>;

    /// Answer a conversation using the project's relevant sources as context.
    async fn project_chat(
        &self,
        project_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatMessage, PipelineError>;

    /// Models offered by the text-generation provider.
    async fn list_models(&self) -> Result<Vec<String>, PipelineError>;

    /// Current pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl PipelineService {
    /// Build the service from explicit collaborators.
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        let PipelineDeps {
            store,
            storage,
            llm,
            embedder,
        } = deps;
        let metrics = Arc::new(PipelineMetrics::new());
        let lifecycle = LifecycleController::new(store.clone());

        let ocr = OcrRunner::new(
            settings.ocr.clone(),
            lifecycle.clone(),
            storage.clone(),
            metrics.clone(),
        );
        let summarizer = SummarizationRunner::new(
            settings.summary.clone(),
            lifecycle.clone(),
            storage.clone(),
            llm.clone(),
            metrics.clone(),
        );
        let titles = TitleAggregator::new(settings.title.clone(), store.clone(), llm.clone());
        let assembler = ContextAssembler::new(
            storage.clone(),
            embedder.clone(),
            settings.retrieval.relevance_threshold,
        );

        Self {
            store,
            storage,
            llm,
            embedder,
            lifecycle,
            ocr,
            summarizer,
            titles,
            assembler,
            metrics,
            settings,
        }
    }

    /// Build the service with in-memory records, local file storage, and Ollama clients.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let timeout = Duration::from_secs(config.llm_timeout_secs);
        tracing::info!(ollama = %config.ollama_url, upload_dir = %config.upload_dir, "Initializing pipeline");
        let llm = OllamaGenerationClient::new(&config.ollama_url, timeout)?;
        let embedder =
            OllamaEmbeddingClient::new(&config.ollama_url, &config.embedding_model, timeout)?;
        let deps = PipelineDeps {
            store: Arc::new(InMemoryStore::new()),
            storage: Arc::new(LocalStorage::new(&config.upload_dir)),
            llm: Arc::new(llm),
            embedder: Arc::new(embedder),
        };
        Ok(Self::new(deps, PipelineSettings::from_config(config)))
    }

    async fn load_source(&self, id: Uuid) -> Result<Source, PipelineError> {
        self.store
            .get_source(id)
            .await?
            .ok_or(PipelineError::SourceNotFound(id))
    }

    /// Create or replace a project record.
    pub async fn create_project(&self, id: &str, name: &str) -> Result<Project, PipelineError> {
        let project = Project::new(id, name);
        self.store.upsert_project(project.clone()).await?;
        tracing::info!(project_id = id, "Project saved");
        Ok(project)
    }

    /// Create a `pending` source in an existing project.
    pub async fn create_source(&self, project_id: &str) -> Result<Source, PipelineError> {
        if self.store.get_project(project_id).await?.is_none() {
            return Err(PipelineError::ProjectNotFound(project_id.to_string()));
        }
        let source = Source::new(project_id);
        self.store.insert_source(source.clone()).await?;
        tracing::info!(source_id = %source.id, project_id, "Source created");
        Ok(source)
    }

    /// Fetch a source.
    pub async fn get_source(&self, id: Uuid) -> Result<Source, PipelineError> {
        self.load_source(id).await
    }

    /// Sources of one project, oldest first.
    pub async fn project_sources(&self, project_id: &str) -> Result<Vec<Source>, PipelineError> {
        if self.store.get_project(project_id).await?.is_none() {
            return Err(PipelineError::ProjectNotFound(project_id.to_string()));
        }
        Ok(self.store.list_project_sources(project_id).await?)
    }

    /// Record an already stored binary and move the source to `uploaded`.
    ///
    /// Plain-text and markdown uploads skip OCR: the upload doubles as the extracted text and
    /// the source lands on `processed` in the same write.
    pub async fn mark_uploaded(&self, id: Uuid, file: FileRef) -> Result<Source, PipelineError> {
        if !file.is_plain_text() {
            let source = self
                .lifecycle
                .record_upload(
                    id,
                    SourcePatch {
                        source_file_ref: Some(file),
                        ..SourcePatch::default()
                    },
                )
                .await?;
            self.metrics.record_upload();
            return Ok(source);
        }

        tracing::info!(source_id = %id, mime_type = %file.mime_type, "Plain-text upload; skipping OCR");
        let source = self.lifecycle.record_text_upload(id, file).await?;
        self.metrics.record_upload();
        self.metrics.record_ocr_skip();
        Ok(self.embed_best_effort(source).await)
    }

    /// Write upload content to storage, then record it like [`Self::mark_uploaded`].
    ///
    /// The written file is removed again when recording the upload fails, e.g. because a
    /// concurrent upload for the same source won.
    pub async fn store_upload(&self, id: Uuid, upload: Upload) -> Result<Source, PipelineError> {
        let current = self.load_source(id).await?;
        next_status(current.status, StatusEvent::Upload)?;

        let file = self
            .storage
            .write(&upload.name, &upload.mime_type, &upload.bytes)
            .await?;
        match self.mark_uploaded(id, file.clone()).await {
            Ok(source) => Ok(source),
            Err(error) => {
                if let Err(cleanup) = self.storage.delete(&file).await {
                    tracing::warn!(source_id = %id, error = %cleanup, "Failed to remove rejected upload");
                }
                Err(error)
            }
        }
    }

    /// Run the OCR stage, then refresh the retrieval embedding.
    pub async fn begin_ocr(&self, id: Uuid) -> Result<Source, PipelineError> {
        let source = self.ocr.run(id).await?;
        Ok(self.embed_best_effort(source).await)
    }

    /// Run the summarization stage.
    pub async fn begin_summarization(&self, id: Uuid) -> Result<Source, PipelineError> {
        self.summarizer.run(id).await
    }

    /// Rename a fully summarized project after its themes.
    pub async fn generate_project_title(
        &self,
        project_id: &str,
    ) -> Result<TitleOutcome, PipelineError> {
        let outcome = self.titles.generate_title(project_id).await?;
        if matches!(outcome, TitleOutcome::Renamed { .. }) {
            self.metrics.record_title();
        }
        Ok(outcome)
    }

    /// Recompute the retrieval embedding from the source's extracted text.
    pub async fn refresh_embedding(&self, id: Uuid) -> Result<Source, PipelineError> {
        let source = self.load_source(id).await?;
        let text_file = source
            .text_file_ref
            .as_ref()
            .ok_or(PipelineError::MissingPrerequisite {
                source_id: id,
                missing: "extracted text",
            })?;
        let text = read_text(self.storage.as_ref(), text_file).await?;
        let prefix: String = text
            .chars()
            .take(self.settings.retrieval.embedding_max_chars)
            .collect();
        let embedding = embed_text(self.embedder.as_ref(), &prefix).await?;
        tracing::debug!(source_id = %id, dimension = embedding.len(), "Embedding stored");
        self.store.set_embedding(id, embedding).await?;
        self.load_source(id).await
    }

    async fn embed_best_effort(&self, source: Source) -> Source {
        match self.refresh_embedding(source.id).await {
            Ok(updated) => updated,
            Err(error) => {
                tracing::warn!(source_id = %source.id, %error, "Embedding refresh failed; source stays unembedded");
                source
            }
        }
    }

    /// Candidates relevant to `query`, in input order.
    pub async fn select_relevant_sources(
        &self,
        query: &str,
        candidates: &[Source],
    ) -> Result<Vec<Source>, PipelineError> {
        Ok(self
            .assembler
            .select(query, candidates)
            .await?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Prefix the conversation with the extracted text of relevant candidates.
    pub async fn assemble_chat_context(
        &self,
        messages: &[ChatMessage],
        candidates: &[Source],
    ) -> Result<Vec<ChatMessage>, PipelineError> {
        self.assembler.assemble(messages, candidates).await
    }

    /// Answer a conversation with relevant candidate text injected as context.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        candidates: &[Source],
    ) -> Result<ChatMessage, PipelineError> {
        let context = self.assemble_chat_context(messages, candidates).await?;
        Ok(self.llm.chat(&self.settings.chat_model, &context).await?)
    }

    /// Models offered by the text-generation provider.
    pub async fn list_models(&self) -> Result<Vec<String>, PipelineError> {
        Ok(self.llm.list_models().await?)
    }

    /// Current pipeline counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl PipelineApi for PipelineService {
    async fn create_project(&self, id: &str, name: &str) -> Result<Project, PipelineError> {
        PipelineService::create_project(self, id, name).await
    }

    async fn create_source(&self, project_id: &str) -> Result<Source, PipelineError> {
        PipelineService::create_source(self, project_id).await
    }

    async fn get_source(&self, id: Uuid) -> Result<Source, PipelineError> {
        PipelineService::get_source(self, id).await
    }

    async fn mark_uploaded(&self, id: Uuid, file: FileRef) -> Result<Source, PipelineError> {
        PipelineService::mark_uploaded(self, id, file).await
    }

    async fn store_upload(&self, id: Uuid, upload: Upload) -> Result<Source, PipelineError> {
        PipelineService::store_upload(self, id, upload).await
    }

    async fn begin_ocr(&self, id: Uuid) -> Result<Source, PipelineError> {
        PipelineService::begin_ocr(self, id).await
    }

    async fn begin_summarization(&self, id: Uuid) -> Result<Source, PipelineError> {
        PipelineService::begin_summarization(self, id).await
    }

    async fn generate_project_title(&self, project_id: &str) -> Result<TitleOutcome, PipelineError> {
        PipelineService::generate_project_title(self, project_id).await
    }

    async fn relevant_project_sources(
        &self,
        project_id: &str,
        query: &str,
    ) -> Result<Vec<Source>, PipelineError> {
        let candidates = self.project_sources(project_id).await?;
        self.select_relevant_sources(query, &candidates).await
    }

    async fn project_chat(
        &self,
        project_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatMessage, PipelineError> {
        let candidates = self.project_sources(project_id).await?;
        self.chat(&messages, &candidates).await
    }

    async fn list_models(&self) -> Result<Vec<String>, PipelineError> {
        PipelineService::list_models(self).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        PipelineService::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GeneratedContent;
    use crate::source::{SourceStatus, TEXT_PLAIN};
    use crate::test_support::{KeywordEmbeddingClient, ScriptedGenerationClient};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        service: PipelineService,
        llm: Arc<ScriptedGenerationClient>,
    }

    fn fixture(answers: Vec<GeneratedContent>) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let llm = Arc::new(ScriptedGenerationClient::new(answers));
        let settings = PipelineSettings::from_config(&Config::default());
        let deps = PipelineDeps {
            store: Arc::new(InMemoryStore::new()),
            storage: Arc::new(LocalStorage::new(dir.path())),
            llm: llm.clone(),
            embedder: Arc::new(KeywordEmbeddingClient::new(["klima", "recht"])),
        };
        Fixture {
            dir,
            service: PipelineService::new(deps, settings),
            llm,
        }
    }

    fn text_upload(name: &str, body: &str) -> Upload {
        Upload {
            name: name.into(),
            mime_type: TEXT_PLAIN.into(),
            bytes: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn plain_text_upload_skips_ocr_and_gets_embedded() {
        let fixture = fixture(Vec::new());
        fixture.service.create_project("p1", "Projekt").await.expect("project");
        let source = fixture.service.create_source("p1").await.expect("source");

        let source = fixture
            .service
            .store_upload(source.id, text_upload("notes.md", "Klima und Recht"))
            .await
            .expect("upload");

        assert_eq!(source.status, SourceStatus::Processed);
        assert_eq!(source.text_file_ref, source.source_file_ref);
        assert_eq!(source.text_embedding, Some(vec![1.0, 1.0]));
        let snapshot = fixture.service.metrics_snapshot();
        assert_eq!(snapshot.sources_uploaded, 1);
        assert_eq!(snapshot.ocr_skipped, 1);
        assert_eq!(snapshot.ocr_completed, 0);
    }

    #[tokio::test]
    async fn second_upload_is_rejected_before_writing() {
        let fixture = fixture(Vec::new());
        fixture.service.create_project("p1", "Projekt").await.expect("project");
        let source = fixture.service.create_source("p1").await.expect("source");
        fixture
            .service
            .store_upload(source.id, text_upload("a.txt", "a"))
            .await
            .expect("first");

        let error = fixture
            .service
            .store_upload(source.id, text_upload("b.txt", "b"))
            .await
            .expect_err("second");
        assert!(matches!(error, PipelineError::Transition(_)));
    }

    #[tokio::test]
    async fn racing_uploads_keep_only_the_winning_file() {
        let fixture = fixture(Vec::new());
        fixture.service.create_project("p1", "Projekt").await.expect("project");
        let source = fixture.service.create_source("p1").await.expect("source");

        let (first, second) = tokio::join!(
            fixture.service.store_upload(source.id, text_upload("a.txt", "a")),
            fixture.service.store_upload(source.id, text_upload("b.txt", "b"))
        );

        let winner = match (first, second) {
            (Ok(source), Err(_)) | (Err(_), Ok(source)) => source,
            other => panic!("expected one winner, got {other:?}"),
        };
        let stored: Vec<_> = std::fs::read_dir(fixture.dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(stored.len(), 1);
        let kept = winner.source_file_ref.expect("source file");
        assert_eq!(stored[0].as_os_str(), kept.location.as_os_str());
    }

    #[tokio::test]
    async fn create_source_requires_project() {
        let fixture = fixture(Vec::new());
        let error = fixture.service.create_source("nope").await.expect_err("missing");
        assert!(matches!(error, PipelineError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn chat_injects_context_and_uses_chat_model() {
        let fixture = fixture(vec![GeneratedContent::Text("Antwort".into())]);
        fixture.service.create_project("p1", "Projekt").await.expect("project");
        let source = fixture.service.create_source("p1").await.expect("source");
        fixture
            .service
            .store_upload(source.id, text_upload("klima.txt", "Klima"))
            .await
            .expect("upload");

        let reply = fixture
            .service
            .project_chat("p1", vec![ChatMessage::user("Was gibt es zum Klima?")])
            .await
            .expect("chat");

        assert_eq!(reply, ChatMessage::assistant("Antwort"));
        let chats = fixture.llm.chats();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].0, "llama3");
        assert_eq!(chats[0].1.len(), 2);
        assert!(chats[0].1[0].content.ends_with("\nKlima"));
    }

    #[tokio::test]
    async fn relevant_sources_are_scoped_to_project() {
        let fixture = fixture(Vec::new());
        fixture.service.create_project("p1", "Eins").await.expect("project");
        fixture.service.create_project("p2", "Zwei").await.expect("project");
        let own = fixture.service.create_source("p1").await.expect("source");
        let other = fixture.service.create_source("p2").await.expect("source");
        for id in [own.id, other.id] {
            fixture
                .service
                .store_upload(id, text_upload("recht.txt", "Recht"))
                .await
                .expect("upload");
        }

        let relevant = fixture
            .service
            .relevant_project_sources("p1", "Recht")
            .await
            .expect("relevant");

        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].id, own.id);
    }

    #[tokio::test]
    async fn title_rename_is_counted() {
        let fixture = fixture(vec![
            GeneratedContent::Text("Zusammenfassung.".into()),
            GeneratedContent::Text(r#"{"themes":["Klima"]}"#.into()),
            GeneratedContent::Text(r#"{"title":"Klimaprojekt"}"#.into()),
        ]);
        fixture.service.create_project("p1", "Projekt").await.expect("project");
        let source = fixture.service.create_source("p1").await.expect("source");
        fixture
            .service
            .store_upload(source.id, text_upload("k.txt", "Klima"))
            .await
            .expect("upload");
        fixture
            .service
            .begin_summarization(source.id)
            .await
            .expect("summarize");

        let outcome = fixture
            .service
            .generate_project_title("p1")
            .await
            .expect("title");

        assert_eq!(outcome, TitleOutcome::Renamed { title: "Klimaprojekt".into() });
        assert_eq!(fixture.service.metrics_snapshot().titles_generated, 1);
    }
}
