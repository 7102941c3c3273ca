//! Shared HTTP plumbing for remote embedding and generation providers.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors (including timeouts) → retry
//! - Backoff: `backoff × 2^(attempt-1)`, exponent capped at 5
//!
//! Failures map onto the core error taxonomy: anything that prevents a
//! usable response is [`Error::Transport`], a 2xx body that is not JSON is
//! [`Error::Parse`].

use std::time::Duration;

use coursewright_core::{Error, Result};
use serde_json::Value;
use tracing::debug;

/// Retry settings for one provider.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff: Duration::from_millis(backoff_ms),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff * (1u32 << (attempt - 1).min(5))
    }
}

/// Build a client with the uniform request timeout.
pub fn build_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a request built by `build` and decode the JSON body, retrying
/// transient failures.
///
/// `build` is called once per attempt since a `RequestBuilder` is consumed
/// by sending.
pub async fn send_json<F>(provider: &str, retry: RetryPolicy, build: F) -> Result<Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=retry.max_retries {
        if attempt > 0 {
            let delay = retry.delay(attempt);
            debug!(provider, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| Error::parse(provider, format!("invalid JSON body: {e}")));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = Error::transport(provider, format!("API error {status}: {body_text}"));

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }

                // Client error (not 429): don't retry
                return Err(err);
            }
            Err(e) => {
                last_err = Some(Error::transport(provider, format!("request failed: {e}")));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::transport(provider, "request failed after retries")))
}

/// Resolve an API key from an environment variable. Empty name means no auth.
pub fn api_key_from_env(var: &str) -> anyhow::Result<Option<String>> {
    if var.is_empty() {
        return Ok(None);
    }
    match std::env::var(var) {
        Ok(key) => Ok(Some(key)),
        Err(_) => anyhow::bail!("{} environment variable not set", var),
    }
}
