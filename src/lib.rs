#![deny(missing_docs)]

//! Document ingestion and enrichment pipeline: OCR, summaries, themes, project titles, and
//! retrieval of relevant sources for chat context.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and the Ollama adapter.
pub mod embedding;
/// Text-generation client abstraction and the Ollama adapter.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Source lifecycle, stage runners, and the service facade.
pub mod pipeline;
/// Similarity matching and chat context assembly.
pub mod retrieval;
/// Source and project data model, including the status state machine.
pub mod source;
/// File content storage.
pub mod storage;
/// Source and project persistence.
pub mod store;
