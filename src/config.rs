//! TOML configuration.
//!
//! Every section has defaults so a minimal file only needs the settings that
//! differ. [`load_config`] validates the parsed values and reports problems
//! as [`RagError::Configuration`], which callers treat as fatal before any
//! request is served.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::RagError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/rag.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length, in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks of one document.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Split points, coarsest first. `""` means a hard character cut.
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            separators: default_separators(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    150
}
fn default_separators() -> Vec<String> {
    ["\n\n", "\n", "。", ". ", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: Option<f32>,
    /// Tag context passages with `[i]` markers and return a bibliography.
    #[serde(default = "default_citations")]
    pub citations: bool,
    /// Entries written per insert statement during ingestion.
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            citations: default_citations(),
            batch_size: default_index_batch_size(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_score_threshold() -> Option<f32> {
    Some(0.5)
}
fn default_citations() -> bool {
    true
}
fn default_index_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the endpoint. Provider-specific default when unset.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the bearer key for `openai`.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_embed_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_embed_batch_size() -> usize {
    25
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_llm_retries() -> u32 {
    2
}
fn default_llm_timeout_secs() -> u64 {
    120
}

/// Where session histories live.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    /// Process-lifetime only.
    #[default]
    Memory,
    /// One JSON file per session under [`MemoryConfig::dir`].
    File,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    /// Maximum turns returned per session.
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default)]
    pub backend: MemoryBackend,
    #[serde(default = "default_memory_dir")]
    pub dir: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            backend: MemoryBackend::default(),
            dir: default_memory_dir(),
        }
    }
}

fn default_window() -> usize {
    10
}
fn default_memory_dir() -> PathBuf {
    PathBuf::from("./data/chat_history")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_chat_timeout_secs")]
    pub chat_timeout_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            chat_timeout_secs: default_chat_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    120
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory for the rolling `rag.log` file. Stderr only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config, RagError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::Configuration(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| RagError::Configuration(format!("failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<(), RagError> {
    let bad = |msg: String| Err(RagError::Configuration(msg));

    // Chunking
    if config.chunking.chunk_size == 0 {
        return bad("chunking.chunk_size must be > 0".into());
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        return bad(format!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap, config.chunking.chunk_size
        ));
    }

    // Retrieval
    if config.retrieval.top_k == 0 {
        return bad("retrieval.top_k must be >= 1".into());
    }
    if let Some(t) = config.retrieval.score_threshold {
        if !(0.0..=1.0).contains(&t) {
            return bad("retrieval.score_threshold must be in [0.0, 1.0]".into());
        }
    }
    if config.retrieval.batch_size == 0 {
        return bad("retrieval.batch_size must be >= 1".into());
    }

    // Memory
    if config.memory.window == 0 {
        return bad("memory.window must be >= 1".into());
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => {
            return bad(format!(
                "unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ))
        }
    }
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            return bad(format!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            ));
        }
        if config.embedding.dims == Some(0) {
            return bad("embedding.dims must be > 0".into());
        }
        if config.embedding.batch_size == 0 {
            return bad("embedding.batch_size must be >= 1".into());
        }
    }

    // Completion model
    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => {
            return bad(format!(
                "unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ))
        }
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        return bad(format!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        ));
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        return bad("llm.temperature must be in [0.0, 2.0]".into());
    }

    Ok(())
}
