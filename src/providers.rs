//! Remote generation providers and chain construction.
//!
//! | Kind | Endpoint | Response field |
//! |------|----------|----------------|
//! | `openai` | `POST {url}/chat/completions` | `choices[0].message.content` |
//! | `ollama` | `POST {url}/api/generate` (`stream: false`) | `response` |
//!
//! Both apply the uniform `[generation] timeout_secs` and retry policy.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use coursewright_core::generation::{GenerationProvider, ProviderChain};
use coursewright_core::Error;

use crate::config::{GenerationConfig, ProviderConfig};
use crate::http::{api_key_from_env, build_client, send_json, RetryPolicy};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Chat-completions provider for OpenAI and compatible servers.
pub struct OpenAIChatProvider {
    name: String,
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    retry: RetryPolicy,
}

impl OpenAIChatProvider {
    pub fn new(provider: &ProviderConfig, generation: &GenerationConfig) -> Result<Self> {
        let key_env = provider.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
        Ok(Self {
            name: format!("openai:{}", provider.model),
            client: build_client(generation.timeout_secs)?,
            url: provider
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            model: provider.model.clone(),
            api_key: api_key_from_env(key_env)?,
            temperature: provider.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            retry: RetryPolicy::new(generation.max_retries, generation.backoff_ms),
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> coursewright_core::Result<String> {
        let url = format!("{}/chat/completions", self.url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
        });
        let resp = send_json(&self.name, self.retry, || {
            let req = self.client.post(&url).json(&body);
            match &self.api_key {
                Some(key) => req.bearer_auth(key),
                None => req,
            }
        })
        .await?;

        resp.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::transport(&self.name, "response missing choices[0].message.content"))
    }
}

/// Non-streaming `/api/generate` provider for a local Ollama instance.
pub struct OllamaProvider {
    name: String,
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(provider: &ProviderConfig, generation: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            name: format!("ollama:{}", provider.model),
            client: build_client(generation.timeout_secs)?,
            url: provider
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            model: provider.model.clone(),
            temperature: provider.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            retry: RetryPolicy::new(generation.max_retries, generation.backoff_ms),
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> coursewright_core::Result<String> {
        let url = format!("{}/api/generate", self.url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let resp = send_json(&self.name, self.retry, || self.client.post(&url).json(&body)).await?;

        resp.get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::transport(&self.name, "response missing 'response' field"))
    }
}

/// Build the ranked provider chain from `[[generation.providers]]`.
pub fn build_chain(config: &GenerationConfig) -> Result<ProviderChain> {
    let mut providers: Vec<Arc<dyn GenerationProvider>> = Vec::new();
    for p in &config.providers {
        let provider: Arc<dyn GenerationProvider> = match p.kind.as_str() {
            "openai" => Arc::new(OpenAIChatProvider::new(p, config)?),
            "ollama" => Arc::new(OllamaProvider::new(p, config)?),
            other => bail!("Unknown generation provider kind: {}", other),
        };
        providers.push(provider);
    }
    Ok(ProviderChain::new(providers))
}
