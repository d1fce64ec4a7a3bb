//! HTTP surface for the pipeline.
//!
//! A compact Axum router mapping one endpoint onto each pipeline operation:
//!
//! - `POST /projects` – Create or replace a project (`{ "id", "name" }`).
//! - `POST /projects/:id/title` – Rename a fully summarized project after its themes.
//! - `POST /sources` – Create a `pending` source in a project.
//! - `GET /sources/:id` – Fetch a source with its status and file references.
//! - `POST /sources/:id/upload` – Record an already stored file reference; plain text skips OCR.
//! - `PUT /sources/:id/content?name=` – Store the request body as the upload, then record it.
//! - `POST /sources/:id/ocr` – Run the OCR stage.
//! - `POST /sources/:id/summarize` – Run the summarization stage.
//! - `POST /retrieval/relevant` – Project sources relevant to a query.
//! - `POST /chat` – Answer a conversation with relevant sources injected as context.
//! - `GET /models` – Models installed on the text-generation provider.
//! - `GET /metrics` – Pipeline counters.
//!
//! Stage endpoints block until the stage finished; concurrent triggers for the same source get
//! `409 Conflict`.

use crate::llm::ChatMessage;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{PipelineApi, PipelineError, TitleOutcome, Upload};
use crate::source::{FileRef, Project, Source};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build the HTTP router exposing the pipeline operations.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: PipelineApi + 'static,
{
    Router::new()
        .route("/projects", post(create_project::<S>))
        .route("/projects/:id/title", post(generate_title::<S>))
        .route("/sources", post(create_source::<S>))
        .route("/sources/:id", get(get_source::<S>))
        .route("/sources/:id/upload", post(mark_uploaded::<S>))
        .route(
            "/sources/:id/content",
            put(store_upload::<S>).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/sources/:id/ocr", post(begin_ocr::<S>))
        .route("/sources/:id/summarize", post(begin_summarization::<S>))
        .route("/retrieval/relevant", post(relevant_sources::<S>))
        .route("/chat", post(chat::<S>))
        .route("/models", get(list_models::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for `POST /projects`.
#[derive(Deserialize)]
struct CreateProjectRequest {
    id: String,
    name: String,
}

async fn create_project<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), AppError>
where
    S: PipelineApi,
{
    let project = service.create_project(&request.id, &request.name).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// Request body for `POST /sources`.
#[derive(Deserialize)]
struct CreateSourceRequest {
    project_id: String,
}

async fn create_source<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<CreateSourceRequest>,
) -> Result<(StatusCode, Json<Source>), AppError>
where
    S: PipelineApi,
{
    let source = service.create_source(&request.project_id).await?;
    Ok((StatusCode::CREATED, Json(source)))
}

async fn get_source<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Source>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.get_source(id).await?))
}

/// Request body for `POST /sources/:id/upload`: a file the storage layer already holds.
#[derive(Deserialize)]
struct UploadedFileRequest {
    name: String,
    mime_type: String,
    #[serde(default)]
    size: u64,
    location: PathBuf,
}

async fn mark_uploaded<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
    Json(request): Json<UploadedFileRequest>,
) -> Result<Json<Source>, AppError>
where
    S: PipelineApi,
{
    let file = FileRef::new(request.name, request.size, request.mime_type, request.location);
    Ok(Json(service.mark_uploaded(id, file).await?))
}

/// Query string for `PUT /sources/:id/content`.
#[derive(Deserialize)]
struct ContentQuery {
    name: String,
}

async fn store_upload<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ContentQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Source>, AppError>
where
    S: PipelineApi,
{
    let mime_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    tracing::debug!(source_id = %id, name = %query.name, %mime_type, size = body.len(), "Upload received");
    let upload = Upload {
        name: query.name,
        mime_type,
        bytes: body.to_vec(),
    };
    Ok(Json(service.store_upload(id, upload).await?))
}

async fn begin_ocr<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Source>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.begin_ocr(id).await?))
}

async fn begin_summarization<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Source>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.begin_summarization(id).await?))
}

async fn generate_title<S>(
    State(service): State<Arc<S>>,
    Path(project_id): Path<String>,
) -> Result<Json<TitleOutcome>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.generate_project_title(&project_id).await?))
}

/// Request body for `POST /retrieval/relevant`.
#[derive(Deserialize)]
struct RelevantRequest {
    project_id: String,
    query: String,
}

/// Response body for `POST /retrieval/relevant`.
#[derive(Serialize)]
struct RelevantResponse {
    sources: Vec<Source>,
}

async fn relevant_sources<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<RelevantRequest>,
) -> Result<Json<RelevantResponse>, AppError>
where
    S: PipelineApi,
{
    let sources = service
        .relevant_project_sources(&request.project_id, &request.query)
        .await?;
    Ok(Json(RelevantResponse { sources }))
}

/// Request body for `POST /chat`.
#[derive(Deserialize)]
struct ChatRequest {
    project_id: String,
    messages: Vec<ChatMessage>,
}

/// Response body for `POST /chat`.
#[derive(Serialize)]
struct ChatResponse {
    message: ChatMessage,
}

async fn chat<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError>
where
    S: PipelineApi,
{
    let message = service
        .project_chat(&request.project_id, request.messages)
        .await?;
    Ok(Json(ChatResponse { message }))
}

/// Response body for `GET /models`.
#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

async fn list_models<S>(State(service): State<Arc<S>>) -> Result<Json<ModelsResponse>, AppError>
where
    S: PipelineApi,
{
    let models = service.list_models().await?;
    Ok(Json(ModelsResponse { models }))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: PipelineApi,
{
    Json(service.metrics_snapshot())
}

struct AppError(PipelineError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::SourceNotFound(_) | PipelineError::ProjectNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            PipelineError::InvalidTransition { .. }
            | PipelineError::Transition(_)
            | PipelineError::AlreadyInProgress { .. }
            | PipelineError::AlreadyDone { .. }
            | PipelineError::OcrNotApplicable(_) => StatusCode::CONFLICT,
            PipelineError::MissingPrerequisite { .. } | PipelineError::NoUserMessage => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self(inner)
    }
}
