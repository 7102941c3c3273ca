//! TOML configuration.
//!
//! Every section except `[server]` has defaults, so a minimal config file is:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:7340"
//! ```
//!
//! See `config/cw.example.toml` for every option.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use coursewright_core::chunk::DEFAULT_CHUNK_WORDS;
use coursewright_core::generation::FallbackPolicy;
use coursewright_core::index::IndexSettings;
use coursewright_core::search::DEFAULT_SIMILARITY_THRESHOLD;
use coursewright_core::text::DEFAULT_MAX_CONTENT_CHARS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Defaults for every section, with a loopback bind address.
    pub fn minimal() -> Self {
        Self {
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            workflow: WorkflowConfig::default(),
            strategy: StrategyConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:7340".to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl IndexConfig {
    pub fn settings(&self) -> IndexSettings {
        IndexSettings {
            max_content_chars: self.max_content_chars,
            similarity_threshold: self.similarity_threshold,
        }
    }
}

fn default_max_content_chars() -> usize {
    DEFAULT_MAX_CONTENT_CHARS
}
fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_openai_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
            backoff_ms: default_backoff_ms(),
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
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Applied to every provider request.
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// In priority order.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            providers: Vec::new(),
        }
    }
}

fn default_generation_timeout_secs() -> u64 {
    60
}

/// One entry of `[[generation.providers]]`.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// `openai` (any OpenAI-compatible chat completions API) or `ollama`.
    pub kind: String,
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key. Empty disables auth.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub fallback_policy: FallbackPolicy,
    /// Completed workflows are evicted after this many seconds.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_max_materials")]
    pub max_materials: usize,
    /// Per-query result limit during retrieval.
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
    /// Materials quoted in the planning prompt.
    #[serde(default = "default_plan_materials")]
    pub plan_materials: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            fallback_policy: FallbackPolicy::FailFast,
            retention_secs: default_retention_secs(),
            max_materials: default_max_materials(),
            query_limit: default_query_limit(),
            plan_materials: default_plan_materials(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

impl WorkflowConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

fn default_retention_secs() -> u64 {
    3600
}
fn default_max_materials() -> usize {
    10
}
fn default_query_limit() -> usize {
    5
}
fn default_plan_materials() -> usize {
    5
}
fn default_excerpt_chars() -> usize {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    #[serde(default = "default_strategy_policy")]
    pub fallback_policy: FallbackPolicy,
    #[serde(default = "default_max_materials")]
    pub max_materials: usize,
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            fallback_policy: default_strategy_policy(),
            max_materials: default_max_materials(),
            query_limit: default_query_limit(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_strategy_policy() -> FallbackPolicy {
    FallbackPolicy::Synthesize
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Default directory for `cw ingest` when none is given.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_chunk_words")]
    pub chunk_words: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: None,
            chunk_words: default_chunk_words(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_chunk_words() -> usize {
    DEFAULT_CHUNK_WORDS
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.index.max_content_chars == 0 {
        bail!("index.max_content_chars must be > 0");
    }
    if !(-1.0..=1.0).contains(&config.index.similarity_threshold) {
        bail!("index.similarity_threshold must be in [-1.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0 when set");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.generation.timeout_secs == 0 {
        bail!("generation.timeout_secs must be > 0");
    }
    for (i, p) in config.generation.providers.iter().enumerate() {
        match p.kind.as_str() {
            "openai" | "ollama" => {}
            other => bail!(
                "generation.providers[{}]: unknown kind '{}'. Must be openai or ollama.",
                i,
                other
            ),
        }
        if p.model.trim().is_empty() {
            bail!("generation.providers[{}].model must not be empty", i);
        }
    }

    if config.workflow.max_materials == 0 {
        bail!("workflow.max_materials must be >= 1");
    }
    if config.workflow.query_limit == 0 {
        bail!("workflow.query_limit must be >= 1");
    }
    if config.strategy.max_materials == 0 {
        bail!("strategy.max_materials must be >= 1");
    }
    if config.ingest.chunk_words == 0 {
        bail!("ingest.chunk_words must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = parse_config("[server]\nbind = \"0.0.0.0:8080\"\n").unwrap();
        assert_eq!(cfg.index.max_content_chars, 8000);
        assert_eq!(cfg.workflow.fallback_policy, FallbackPolicy::FailFast);
        assert_eq!(cfg.strategy.fallback_policy, FallbackPolicy::Synthesize);
        assert_eq!(cfg.workflow.max_materials, 10);
        assert_eq!(cfg.workflow.retention(), Duration::from_secs(3600));
        assert_eq!(cfg.generation.timeout_secs, 60);
        assert_eq!(cfg.ingest.chunk_words, 1000);
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn providers_parse_in_order() {
        let cfg = parse_config(
            r#"
[server]
bind = "127.0.0.1:7340"

[workflow]
fallback_policy = "synthesize"

[[generation.providers]]
kind = "openai"
model = "gpt-4o-mini"
api_key_env = "MY_KEY"

[[generation.providers]]
kind = "ollama"
model = "llama3"
url = "http://gpu-box:11434"
"#,
        )
        .unwrap();
        assert_eq!(cfg.workflow.fallback_policy, FallbackPolicy::Synthesize);
        let kinds: Vec<&str> = cfg
            .generation
            .providers
            .iter()
            .map(|p| p.kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["openai", "ollama"]);
        assert_eq!(cfg.generation.providers[0].api_key_env.as_deref(), Some("MY_KEY"));
    }

    #[test]
    fn rejects_unknown_provider_kind() {
        let err = parse_config(
            "[server]\nbind = \"x\"\n[[generation.providers]]\nkind = \"bard\"\nmodel = \"m\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown kind"));
    }

    #[test]
    fn rejects_embedding_without_model() {
        let err = parse_config("[server]\nbind = \"x\"\n[embedding]\nprovider = \"openai\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn example_config_is_valid() {
        let cfg = parse_config(include_str!("../config/cw.example.toml")).unwrap();
        assert_eq!(cfg.generation.providers.len(), 2);
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
    }

    #[test]
    fn server_section_is_required() {
        assert!(parse_config("[index]\nmax_content_chars = 10\n").is_err());
    }
}
