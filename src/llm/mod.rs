//! Text-generation collaborator and its Ollama adapter.
//!
//! Three calls are used by the pipeline: free-text or schema-constrained generation
//! (`/api/generate`), chat completion (`/api/chat`), and model listing (`/api/tags`). Structured
//! answers may arrive as a JSON-encoded string or as an already decoded object; both are folded
//! into one path by [`parse_structured`].

mod ollama;

pub use ollama::OllamaGenerationClient;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by text-generation providers.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    /// Provider was unreachable, timed out, or the endpoint does not exist.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// JSON schema constraining the answer; `None` requests free text.
    pub format: Option<Value>,
}

impl GenerationRequest {
    /// Free-text request.
    pub fn text(model: impl Into<String>, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: Some(system.into()),
            prompt: prompt.into(),
            format: None,
        }
    }

    /// Schema-constrained request.
    pub fn structured(
        model: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
        schema: Value,
    ) -> Self {
        Self {
            format: Some(schema),
            ..Self::text(model, system, prompt)
        }
    }
}

/// Answer of a generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedContent {
    /// Raw text as produced by the model.
    Text(String),
    /// Answer the provider already decoded into JSON.
    Structured(Value),
}

impl GeneratedContent {
    /// Text form of the answer; structured answers are re-encoded as JSON.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(Value::String(text)) => text,
            Self::Structured(value) => value.to_string(),
        }
    }
}

/// Why a structured answer could not be used.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("structured response did not match the expected shape: {0}")]
pub struct StructuredParseError(pub String);

/// Decode a structured answer, accepting JSON text, decoded JSON, or JSON text wrapped in a
/// JSON string.
pub fn parse_structured<T: DeserializeOwned>(
    content: GeneratedContent,
) -> Result<T, StructuredParseError> {
    let value = match content {
        GeneratedContent::Text(text) => decode_json_text(&text)?,
        GeneratedContent::Structured(Value::String(text)) => decode_json_text(&text)?,
        GeneratedContent::Structured(value) => value,
    };
    let value = match value {
        Value::String(inner) => decode_json_text(&inner)?,
        other => other,
    };
    serde_json::from_value(value).map_err(|error| StructuredParseError(error.to_string()))
}

fn decode_json_text(text: &str) -> Result<Value, StructuredParseError> {
    serde_json::from_str(text.trim()).map_err(|error| StructuredParseError(error.to_string()))
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions and injected context.
    System,
    /// The human side of the conversation.
    User,
    /// Model replies.
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author.
    pub role: ChatRole,
    /// Message body.
    pub content: String,
}

impl ChatMessage {
    /// System-role message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// User-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Assistant-role message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Interface implemented by text-generation providers.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate free text or a schema-constrained answer.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GeneratedContent, GenerationClientError>;

    /// Produce the next assistant message for a conversation.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatMessage, GenerationClientError>;

    /// Names of the models the provider can serve.
    async fn list_models(&self) -> Result<Vec<String>, GenerationClientError>;
}
