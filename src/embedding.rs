//! Remote embedding providers.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`OpenAIEmbedder`]**: `POST {url}/embeddings` on any OpenAI-compatible API.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama instance.
//!
//! `provider = "disabled"` yields no embedder at all; the index then runs
//! in keyword mode only.
//!
//! ```rust,no_run
//! # use coursewright::config::EmbeddingConfig;
//! # use coursewright::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! assert!(create_embedder(&config).unwrap().is_none());
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use coursewright_core::embedding::Embedder;
use coursewright_core::Error;

use crate::config::EmbeddingConfig;
use crate::http::{api_key_from_env, build_client, send_json, RetryPolicy};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            model,
            dims: config.dims.unwrap_or(0),
            api_key: api_key_from_env(&config.api_key_env)?,
            retry: RetryPolicy::new(config.max_retries, config.backoff_ms),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> coursewright_core::Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "input": [text] });
        let resp = send_json("openai-embeddings", self.retry, || {
            let req = self.client.post(&url).json(&body);
            match &self.api_key {
                Some(key) => req.bearer_auth(key),
                None => req,
            }
        })
        .await?;
        let vec = parse_openai_response(&resp)?;
        check_dims("openai-embeddings", vec, self.dims)
    }
}

/// Extract `data[0].embedding`.
fn parse_openai_response(json: &Value) -> coursewright_core::Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::parse("openai-embeddings", "missing data[0].embedding"))?;
    Ok(to_f32(embedding))
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            model,
            dims: config.dims.unwrap_or(0),
            retry: RetryPolicy::new(config.max_retries, config.backoff_ms),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> coursewright_core::Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "input": [text] });
        let resp = send_json("ollama-embeddings", self.retry, || {
            self.client.post(&url).json(&body)
        })
        .await?;
        let vec = parse_ollama_response(&resp)?;
        check_dims("ollama-embeddings", vec, self.dims)
    }
}

/// Extract `embeddings[0]`.
fn parse_ollama_response(json: &Value) -> coursewright_core::Result<Vec<f32>> {
    let embedding = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::parse("ollama-embeddings", "missing embeddings[0]"))?;
    Ok(to_f32(embedding))
}

// ============ Shared ============

fn to_f32(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Reject vectors of the wrong size when `dims` is configured.
fn check_dims(provider: &str, vec: Vec<f32>, dims: usize) -> coursewright_core::Result<Vec<f32>> {
    if dims > 0 && vec.len() != dims {
        return Err(Error::parse(
            provider,
            format!("expected {dims} dimensions, got {}", vec.len()),
        ));
    }
    Ok(vec)
}

/// Create the configured embedder, or `None` when embeddings are disabled.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | none |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAIEmbedder::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaEmbedder::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
