//! Staged processing of sources: lifecycle guards, OCR, summarization, and project titles.
//!
//! [`PipelineService`] is the entry point; the runners and the controller are public so they can
//! be composed with other stores or storage backends.

mod lifecycle;
mod ocr;
mod service;
mod summarize;
mod title;
mod types;

pub use lifecycle::LifecycleController;
pub use ocr::{OcrRunner, OcrSettings};
pub use service::{PipelineApi, PipelineDeps, PipelineService, PipelineSettings, Upload};
pub use summarize::{ParsedThemes, SummarizationRunner, SummarySettings, parse_themes};
pub use title::{TitleAggregator, TitleSettings};
pub use types::{PipelineError, StageArtifact, StageEntry, TitleOutcome};
