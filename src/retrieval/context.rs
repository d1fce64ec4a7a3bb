//! Chat context assembly: prepends the extracted text of relevant sources to a conversation.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    embedding::{EmbeddingClient, embed_text},
    llm::{ChatMessage, ChatRole},
    pipeline::PipelineError,
    source::Source,
    storage::{FileStorage, read_text},
};

use super::similarity::relevant_sources;

/// Picks relevant sources for a query and injects their extracted text into conversations.
pub struct ContextAssembler {
    storage: Arc<dyn FileStorage>,
    embedder: Arc<dyn EmbeddingClient>,
    threshold: f64,
}

/// Marker prefixed to injected source text, used to avoid injecting the same source twice.
pub fn source_marker(id: Uuid) -> String {
    format!("[source:{id}]")
}

impl ContextAssembler {
    /// Assemble with the relevance `threshold` (exclusive).
    pub fn new(
        storage: Arc<dyn FileStorage>,
        embedder: Arc<dyn EmbeddingClient>,
        threshold: f64,
    ) -> Self {
        Self {
            storage,
            embedder,
            threshold,
        }
    }

    /// Embed `query` and return the candidates above the threshold, in input order.
    pub async fn select<'a>(
        &self,
        query: &str,
        candidates: &'a [Source],
    ) -> Result<Vec<&'a Source>, PipelineError> {
        let query_embedding = embed_text(self.embedder.as_ref(), query).await?;
        let selected = relevant_sources(&query_embedding, candidates, self.threshold)?;
        tracing::debug!(
            candidates = candidates.len(),
            selected = selected.len(),
            threshold = self.threshold,
            "Selected relevant sources"
        );
        Ok(selected)
    }

    /// Prepend the extracted text of relevant sources as system messages.
    ///
    /// Relevance is judged against the last user message. Sources whose marker already appears
    /// in the conversation, sources without extracted text, and unreadable texts are skipped.
    pub async fn assemble(
        &self,
        messages: &[ChatMessage],
        candidates: &[Source],
    ) -> Result<Vec<ChatMessage>, PipelineError> {
        let query = messages
            .iter()
            .rev()
            .find(|message| message.role == ChatRole::User)
            .ok_or(PipelineError::NoUserMessage)?;

        let selected = self.select(&query.content, candidates).await?;

        let mut injected = HashSet::new();
        let mut context = Vec::new();
        for source in selected {
            let marker = source_marker(source.id);
            if messages.iter().any(|message| message.content.contains(&marker))
                || !injected.insert(source.id)
            {
                continue;
            }
            let Some(text_file) = source.text_file_ref.as_ref() else {
                tracing::warn!(source_id = %source.id, "Relevant source has no extracted text; skipping");
                continue;
            };
            match read_text(self.storage.as_ref(), text_file).await {
                Ok(text) => context.push(ChatMessage::system(format!("{marker}\n{text}"))),
                Err(error) => {
                    tracing::warn!(source_id = %source.id, %error, "Failed to read source text; skipping");
                }
            }
        }

        tracing::info!(injected = context.len(), messages = messages.len(), "Assembled chat context");
        context.extend(messages.iter().cloned());
        Ok(context)
    }
}
