use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ChatMessage, GeneratedContent, GenerationClient, GenerationClientError, GenerationRequest};

/// Ollama-backed generation client issuing plain HTTP requests.
pub struct OllamaGenerationClient {
    http: Client,
    base_url: String,
}

impl OllamaGenerationClient {
    /// Build a client for `base_url`; every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GenerationClientError> {
        let http = Client::builder()
            .user_agent("sourceflow/llm")
            .timeout(timeout)
            .build()
            .map_err(|error| {
                GenerationClientError::ProviderUnavailable(format!(
                    "failed to construct HTTP client: {error}"
                ))
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<reqwest::Response, GenerationClientError> {
        let endpoint = self.endpoint(path);
        let response = self
            .http
            .post(&endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|error| self.unreachable(error))?;
        check_status(response, &endpoint).await
    }

    fn unreachable(&self, error: reqwest::Error) -> GenerationClientError {
        if error.is_timeout() {
            GenerationClientError::ProviderUnavailable(format!(
                "Ollama at {} timed out: {error}",
                self.base_url
            ))
        } else {
            GenerationClientError::ProviderUnavailable(format!(
                "failed to reach Ollama at {}: {error}",
                self.base_url
            ))
        }
    }
}

async fn check_status(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, GenerationClientError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(GenerationClientError::ProviderUnavailable(format!(
            "Ollama endpoint {endpoint} returned 404"
        )));
    }

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationClientError::GenerationFailed(format!(
            "Ollama returned {status}: {body}"
        )));
    }

    Ok(response)
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Value,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GeneratedContent, GenerationClientError> {
        let mut payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                // Low temperature keeps summaries and labels stable between runs.
                "temperature": 0.1,
            }
        });
        if let Some(system) = request.system {
            payload["system"] = Value::String(system);
        }
        if let Some(schema) = request.format {
            payload["format"] = schema;
        }

        tracing::debug!(model = %request.model, structured = payload.get("format").is_some(), "Requesting generation");
        let response = self.post_json("generate", &payload).await?;

        let body: GenerateResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        if !body.done {
            return Err(GenerationClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(match body.response {
            Value::String(text) => GeneratedContent::Text(text),
            other => GeneratedContent::Structured(other),
        })
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatMessage, GenerationClientError> {
        let payload = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });

        tracing::debug!(model, messages = messages.len(), "Requesting chat completion");
        let response = self.post_json("chat", &payload).await?;

        let body: ChatResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode Ollama chat response: {error}"
            ))
        })?;

        if !body.done {
            return Err(GenerationClientError::InvalidResponse(
                "Ollama chat response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.message)
    }

    async fn list_models(&self) -> Result<Vec<String>, GenerationClientError> {
        let endpoint = self.endpoint("tags");
        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .map_err(|error| self.unreachable(error))?;
        let response = check_status(response, &endpoint).await?;

        let body: TagsResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode Ollama model list: {error}"
            ))
        })?;
        Ok(body.models.into_iter().map(|model| model.name).collect())
    }
}
