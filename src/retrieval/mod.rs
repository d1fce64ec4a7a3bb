//! Similarity matching and chat context assembly over embedded sources.

mod context;
mod similarity;

pub use context::{ContextAssembler, source_marker};
pub use similarity::{Embedded, SimilarityError, cosine_similarity, relevant_sources};

use crate::config::Config;

/// Threshold and embedding bounds used by retrieval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalSettings {
    /// Minimum cosine similarity (exclusive) for a source to count as relevant.
    pub relevance_threshold: f64,
    /// Prefix of the extracted text, in characters, that is embedded per source.
    pub embedding_max_chars: usize,
}

impl RetrievalSettings {
    /// Derive settings from the runtime configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            relevance_threshold: config.relevance_threshold,
            embedding_max_chars: config.embedding_max_chars,
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
