//! Structured theme responses: schema, parsing, and normalization.

use std::collections::HashSet;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{GeneratedContent, StructuredParseError, parse_structured};

/// Shape requested from the model for theme extraction.
#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct ThemesResponse {
    /// Short topic labels.
    #[serde(default)]
    pub themes: Vec<String>,
}

/// Result of reading a structured theme answer.
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedThemes {
    /// At least one usable theme.
    Themes(Vec<String>),
    /// The answer was well formed but carried no themes.
    Empty,
    /// The answer did not match the expected shape.
    Malformed(String),
}

/// JSON schema passed as the structured-output format.
pub(crate) fn themes_schema() -> Value {
    serde_json::to_value(schema_for!(ThemesResponse)).unwrap_or(Value::Null)
}

/// Decode a theme answer, trimming labels and dropping blanks and repeats while keeping order.
pub fn parse_themes(content: GeneratedContent) -> ParsedThemes {
    let response: ThemesResponse = match parse_structured(content) {
        Ok(response) => response,
        Err(StructuredParseError(reason)) => return ParsedThemes::Malformed(reason),
    };

    let mut seen = HashSet::new();
    let themes: Vec<String> = response
        .themes
        .into_iter()
        .map(|theme| theme.trim().to_string())
        .filter(|theme| !theme.is_empty())
        .filter(|theme| seen.insert(theme.clone()))
        .collect();

    if themes.is_empty() {
        ParsedThemes::Empty
    } else {
        ParsedThemes::Themes(themes)
    }
}

/// Whether a theme's word count falls inside the requested bounds.
pub(crate) fn within_word_bounds(theme: &str, min_words: usize, max_words: usize) -> bool {
    let words = theme.split_whitespace().count();
    (min_words..=max_words).contains(&words)
}
