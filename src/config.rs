use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_index_path(),
            collection: default_collection(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_index_path() -> PathBuf {
    PathBuf::from("./data/orange.sqlite")
}
fn default_collection() -> String {
    "documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL for the `openai` and `ollama` providers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
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
            model: default_embedding_model(),
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "multilingual-e5-small".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:1234/v1".to_string()
}
fn default_llm_model() -> String {
    "qwen3-4b-2507".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_llm_max_retries() -> u32 {
    2
}

impl LlmConfig {
    /// API key from `ORANGE_API_KEY`, then the config file, then the
    /// placeholder local inference servers accept.
    pub fn resolved_api_key(&self) -> String {
        std::env::var("ORANGE_API_KEY")
            .ok()
            .or_else(|| self.api_key.clone())
            .unwrap_or_else(|| "not-needed".to_string())
    }

    /// Apply `ORANGE_BASE_URL` / `ORANGE_MODEL` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ORANGE_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(model) = std::env::var("ORANGE_MODEL") {
            self.model = model;
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_temperature() -> f32 {
    0.4
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_history_turns() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_enabled")]
    pub enabled: bool,
    #[serde(default = "default_languages")]
    pub languages: String,
    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,
    #[serde(default = "default_pdftoppm_cmd")]
    pub pdftoppm_cmd: String,
    #[serde(default = "default_render_scale")]
    pub render_scale: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: default_ocr_enabled(),
            languages: default_languages(),
            tesseract_cmd: default_tesseract_cmd(),
            pdftoppm_cmd: default_pdftoppm_cmd(),
            render_scale: default_render_scale(),
        }
    }
}

fn default_ocr_enabled() -> bool {
    true
}
fn default_languages() -> String {
    "kor+eng".to_string()
}
fn default_tesseract_cmd() -> String {
    "tesseract".to_string()
}
fn default_pdftoppm_cmd() -> String {
    "pdftoppm".to_string()
}
fn default_render_scale() -> f32 {
    2.0
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.llm.apply_env_overrides();
    Ok(config)
}

/// Parse and validate a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.index.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown index backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if config.generation.max_tokens == 0 {
        anyhow::bail!("generation.max_tokens must be > 0");
    }

    if config.ocr.render_scale <= 0.0 {
        anyhow::bail!("ocr.render_scale must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.retrieval.k, 3);
        assert_eq!(config.embedding.model, "multilingual-e5-small");
        assert_eq!(config.llm.base_url, "http://127.0.0.1:1234/v1");
        assert_eq!(config.generation.history_turns, 10);
        assert_eq!(config.ocr.languages, "kor+eng");
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = parse_config("[chunking]\nchunk_size = 50\nchunk_overlap = 50\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(parse_config("[index]\nbackend = \"chroma\"\n").is_err());
    }

    #[test]
    fn unknown_embedding_provider_is_rejected() {
        assert!(parse_config("[embedding]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        assert!(parse_config("[generation]\ntemperature = 3.5\n").is_err());
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
[index]
backend = "memory"

[retrieval]
k = 5

[llm]
model = "llama3"
"#,
        )
        .unwrap();
        assert_eq!(config.index.backend, "memory");
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.llm.model, "llama3");
    }
}
