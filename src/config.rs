use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the ingestion pipeline and its HTTP surface.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Ollama runtime serving generation and embeddings.
    pub ollama_url: String,
    /// Model used to write source summaries.
    pub summary_model: String,
    /// Model used for structured theme extraction.
    pub theme_model: String,
    /// Model used to name projects from their themes.
    pub title_model: String,
    /// Model used for conversational completions.
    pub chat_model: String,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Upper bound for a single LLM or embedding HTTP call, in seconds.
    pub llm_timeout_secs: u64,
    /// Program launched for OCR.
    pub ocr_command: String,
    /// Leading arguments passed to the OCR program before the per-source ones.
    pub ocr_args: Vec<String>,
    /// Language hint handed to the OCR process.
    pub ocr_language: String,
    /// Upper bound for one OCR process run, in seconds.
    pub ocr_timeout_secs: u64,
    /// Cap on the combined stdout/stderr bytes accepted from the OCR process.
    pub ocr_max_output_bytes: usize,
    /// Root directory of the local file storage.
    pub upload_dir: String,
    /// Minimum cosine similarity (exclusive) for a source to be considered relevant.
    pub relevance_threshold: f64,
    /// Lower word bound for a single theme.
    pub theme_min_words: usize,
    /// Upper word bound for a single theme.
    pub theme_max_words: usize,
    /// Sentence budget requested from the summary model.
    pub summary_max_sentences: usize,
    /// Maximum length of a generated project title, in characters.
    pub title_max_chars: usize,
    /// Prefix length of extracted text sent to the embedding model, in characters.
    pub embedding_max_chars: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_GENERATION_MODEL: &str = "llama3";
const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.into(),
            summary_model: DEFAULT_GENERATION_MODEL.into(),
            theme_model: DEFAULT_GENERATION_MODEL.into(),
            title_model: DEFAULT_GENERATION_MODEL.into(),
            chat_model: DEFAULT_GENERATION_MODEL.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            llm_timeout_secs: 300,
            ocr_command: "python3".into(),
            ocr_args: vec!["ocr.py".into()],
            ocr_language: "de".into(),
            ocr_timeout_secs: 600,
            ocr_max_output_bytes: 10 * 1024 * 1024,
            upload_dir: "uploads".into(),
            relevance_threshold: 0.8,
            theme_min_words: 1,
            theme_max_words: 3,
            summary_max_sentences: 10,
            title_max_chars: 128,
            embedding_max_chars: 8000,
            server_port: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            ollama_url: load_env_or("OLLAMA_URL", defaults.ollama_url),
            summary_model: load_env_or("SUMMARY_MODEL", defaults.summary_model),
            theme_model: load_env_or("THEME_MODEL", defaults.theme_model),
            title_model: load_env_or("TITLE_MODEL", defaults.title_model),
            chat_model: load_env_or("CHAT_MODEL", defaults.chat_model),
            embedding_model: load_env_or("EMBEDDING_MODEL", defaults.embedding_model),
            llm_timeout_secs: parse_env_or("LLM_TIMEOUT_SECS", defaults.llm_timeout_secs)?,
            ocr_command: load_env_or("OCR_COMMAND", defaults.ocr_command),
            ocr_args: load_env_optional("OCR_ARGS")
                .map(|value| value.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.ocr_args),
            ocr_language: load_env_or("OCR_LANGUAGE", defaults.ocr_language),
            ocr_timeout_secs: parse_env_or("OCR_TIMEOUT_SECS", defaults.ocr_timeout_secs)?,
            ocr_max_output_bytes: parse_env_or(
                "OCR_MAX_OUTPUT_BYTES",
                defaults.ocr_max_output_bytes,
            )?,
            upload_dir: load_env_or("UPLOAD_DIR", defaults.upload_dir),
            relevance_threshold: parse_env_or("RELEVANCE_THRESHOLD", defaults.relevance_threshold)?,
            theme_min_words: parse_env_or("THEME_MIN_WORDS", defaults.theme_min_words)?,
            theme_max_words: parse_env_or("THEME_MAX_WORDS", defaults.theme_max_words)?,
            summary_max_sentences: parse_env_or(
                "SUMMARY_MAX_SENTENCES",
                defaults.summary_max_sentences,
            )?,
            title_max_chars: parse_env_or("TITLE_MAX_CHARS", defaults.title_max_chars)?,
            embedding_max_chars: parse_env_or(
                "EMBEDDING_MAX_CHARS",
                defaults.embedding_max_chars,
            )?,
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ocr_command.trim().is_empty() {
            return Err(ConfigError::MissingVariable("OCR_COMMAND".into()));
        }
        if !(-1.0..=1.0).contains(&self.relevance_threshold) {
            return Err(ConfigError::InvalidValue("RELEVANCE_THRESHOLD".into()));
        }
        if self.theme_min_words == 0 || self.theme_min_words > self.theme_max_words {
            return Err(ConfigError::InvalidValue("THEME_MIN_WORDS".into()));
        }
        if self.title_max_chars == 0 {
            return Err(ConfigError::InvalidValue("TITLE_MAX_CHARS".into()));
        }
        if self.ocr_max_output_bytes == 0 {
            return Err(ConfigError::InvalidValue("OCR_MAX_OUTPUT_BYTES".into()));
        }
        Ok(())
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: String) -> String {
    load_env_optional(key).unwrap_or(default)
}

fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        ollama_url = %config.ollama_url,
        summary_model = %config.summary_model,
        theme_model = %config.theme_model,
        ocr_command = %config.ocr_command,
        upload_dir = %config.upload_dir,
        relevance_threshold = config.relevance_threshold,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
