//! Generation provider abstraction and the ranked fallback chain.
//!
//! Every backend implements [`GenerationProvider`]. The [`ProviderChain`]
//! tries providers in priority order:
//!
//! | Failure                 | `complete_text`   | `complete_json`                         |
//! |-------------------------|-------------------|-----------------------------------------|
//! | Transport               | next provider     | next provider                           |
//! | Parse                   | n/a               | one corrective retry, then next provider |
//! | anything else           | propagated        | propagated                              |
//!
//! When the whole chain is exhausted the caller's [`FallbackPolicy`] decides
//! between a fatal [`Error::Exhausted`] and a locally synthesized value.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::extract::parse_json;

/// Provider name recorded when a value was synthesized locally.
pub const SYNTHESIZED_PROVIDER: &str = "synthesized";

/// A remote text-completion service.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Stable name used in logs and provenance (e.g. `"openai:gpt-4o-mini"`).
    fn name(&self) -> &str;

    /// Complete a prompt. Network or status failures are [`Error::Transport`].
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// What a pipeline does once every provider has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Surface [`Error::Exhausted`] to the caller.
    #[default]
    FailFast,
    /// Substitute a deterministic value built by the pipeline.
    Synthesize,
}

impl FallbackPolicy {
    /// Apply the policy to a chain result.
    ///
    /// Only exhaustion is subject to the policy; any other error passes through.
    pub fn resolve<T>(
        self,
        result: Result<Completion<T>>,
        synthesize: impl FnOnce() -> T,
    ) -> Result<Completion<T>> {
        match (self, result) {
            (_, Ok(c)) => Ok(c),
            (FallbackPolicy::Synthesize, Err(Error::Exhausted { attempts })) => {
                warn!(attempts = attempts.len(), "all providers failed, synthesizing locally");
                Ok(Completion {
                    value: synthesize(),
                    provider: SYNTHESIZED_PROVIDER.to_string(),
                })
            }
            (_, Err(e)) => Err(e),
        }
    }
}

/// A successful completion and the provider that produced it.
#[derive(Debug, Clone)]
pub struct Completion<T> {
    pub value: T,
    pub provider: String,
}

/// Providers in fixed priority order.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn GenerationProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn GenerationProvider>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Free-text completion with provider fallback.
    pub async fn complete_text(&self, prompt: &str) -> Result<Completion<String>> {
        let mut attempts = Vec::new();
        for provider in &self.providers {
            match provider.complete(prompt).await {
                Ok(text) => {
                    debug!(provider = provider.name(), "completion succeeded");
                    return Ok(Completion {
                        value: text,
                        provider: provider.name().to_string(),
                    });
                }
                Err(e) if e.is_retryable_by_fallback() => {
                    warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                    attempts.push(format!("{}: {e}", provider.name()));
                }
                Err(e) => return Err(e),
            }
        }
        Err(exhausted(attempts))
    }

    /// Free-text completion from the named provider alone, with no fallback.
    /// Used to send a corrective prompt back to the provider that earned it.
    pub async fn complete_on(&self, name: &str, prompt: &str) -> Result<Completion<String>> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| Error::not_found(format!("generation provider {name}")))?;
        let value = provider.complete(prompt).await?;
        Ok(Completion {
            value,
            provider: name.to_string(),
        })
    }

    /// Structured completion with provider fallback.
    ///
    /// A response that does not deserialize into `T` earns the same provider
    /// exactly one corrective retry before the chain moves on. The next
    /// provider always receives the original prompt.
    pub async fn complete_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<Completion<T>> {
        let mut attempts = Vec::new();
        for provider in &self.providers {
            let name = provider.name();
            let first = provider
                .complete(prompt)
                .await
                .and_then(|text| parse_json::<T>(name, &text));

            let outcome = match first {
                Err(Error::Parse { message, .. }) => {
                    debug!(provider = name, error = %message, "unparseable response, retrying with correction");
                    provider
                        .complete(&corrective_prompt(prompt, &message))
                        .await
                        .and_then(|text| parse_json::<T>(name, &text))
                }
                other => other,
            };

            match outcome {
                Ok(value) => {
                    return Ok(Completion {
                        value,
                        provider: name.to_string(),
                    })
                }
                Err(e) if e.is_retryable_by_fallback() => {
                    warn!(provider = name, error = %e, "provider failed, trying next");
                    attempts.push(format!("{name}: {e}"));
                }
                Err(e) => return Err(e),
            }
        }
        Err(exhausted(attempts))
    }
}

/// Prompt sent after a reply that did not parse.
pub fn corrective_prompt(original: &str, problem: &str) -> String {
    format!(
        "{original}\n\nYour previous reply could not be used ({problem}). \
         Reply again with exactly one valid JSON object and nothing else: \
         no prose, no markdown fences."
    )
}

fn exhausted(mut attempts: Vec<String>) -> Error {
    if attempts.is_empty() {
        attempts.push("no generation providers configured".to_string());
    }
    Error::Exhausted { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records every prompt it receives.
    struct Scripted {
        name: String,
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(name: &str, replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationProvider for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::transport(&self.name, "script exhausted")))
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        answer: u32,
    }

    fn chain(providers: Vec<Arc<Scripted>>) -> ProviderChain {
        ProviderChain::new(
            providers
                .into_iter()
                .map(|p| p as Arc<dyn GenerationProvider>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn text_falls_back_on_transport_error() {
        let a = Scripted::new("a", vec![Err(Error::transport("a", "down"))]);
        let b = Scripted::new("b", vec![Ok("hello".into())]);
        let c = chain(vec![a.clone(), b.clone()]);

        let out = c.complete_text("p").await.unwrap();
        assert_eq!(out.value, "hello");
        assert_eq!(out.provider, "b");
        assert_eq!(b.prompts(), vec!["p"]);
    }

    #[tokio::test]
    async fn text_exhaustion_lists_every_attempt() {
        let a = Scripted::new("a", vec![Err(Error::transport("a", "down"))]);
        let b = Scripted::new("b", vec![Err(Error::transport("b", "503"))]);
        let err = chain(vec![a, b]).complete_text("p").await.unwrap_err();
        match err {
            Error::Exhausted { attempts } => assert_eq!(attempts.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_fallback_errors_propagate_immediately() {
        let a = Scripted::new("a", vec![Err(Error::Cancelled("t".into()))]);
        let b = Scripted::new("b", vec![Ok("unused".into())]);
        let err = chain(vec![a, b.clone()]).complete_text("p").await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(b.prompts().is_empty());
    }

    #[tokio::test]
    async fn json_corrective_retry_on_same_provider() {
        let a = Scripted::new(
            "a",
            vec![Ok("Sure! here you go".into()), Ok(r#"{"answer": 42}"#.into())],
        );
        let out = chain(vec![a.clone()])
            .complete_json::<Answer>("give json")
            .await
            .unwrap();
        assert_eq!(out.value, Answer { answer: 42 });

        let prompts = a.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("give json"));
        assert!(prompts[1].contains("valid JSON object"));
    }

    #[tokio::test]
    async fn json_retries_once_then_next_provider_gets_original_prompt() {
        let a = Scripted::new("a", vec![Ok("nope".into()), Ok("still nope".into())]);
        let b = Scripted::new("b", vec![Ok(r#"{"answer": 7}"#.into())]);
        let out = chain(vec![a.clone(), b.clone()])
            .complete_json::<Answer>("give json")
            .await
            .unwrap();
        assert_eq!(out.provider, "b");
        assert_eq!(a.prompts().len(), 2);
        assert_eq!(b.prompts(), vec!["give json"]);
    }

    #[tokio::test]
    async fn json_transport_error_skips_corrective_retry() {
        let a = Scripted::new("a", vec![Err(Error::transport("a", "timeout"))]);
        let b = Scripted::new("b", vec![Ok(r#"{"answer": 1}"#.into())]);
        chain(vec![a.clone(), b])
            .complete_json::<Answer>("p")
            .await
            .unwrap();
        assert_eq!(a.prompts().len(), 1);
    }

    #[tokio::test]
    async fn complete_on_targets_one_provider() {
        let a = Scripted::new("a", vec![Err(Error::transport("a", "down"))]);
        let b = Scripted::new("b", vec![Ok("unused".into())]);
        let c = chain(vec![a.clone(), b.clone()]);

        let err = c.complete_on("a", "fix it").await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(a.prompts(), vec!["fix it"]);
        assert!(b.prompts().is_empty());

        assert!(matches!(c.complete_on("zz", "p").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn empty_chain_is_exhausted() {
        let err = ProviderChain::default().complete_text("p").await.unwrap_err();
        assert!(err.to_string().contains("no generation providers configured"));
    }

    #[test]
    fn policy_resolution() {
        let exhausted = || -> Result<Completion<u32>> {
            Err(Error::Exhausted {
                attempts: vec!["a: down".into()],
            })
        };

        assert!(matches!(
            FallbackPolicy::FailFast.resolve(exhausted(), || 0),
            Err(Error::Exhausted { .. })
        ));

        let synth = FallbackPolicy::Synthesize.resolve(exhausted(), || 9).unwrap();
        assert_eq!(synth.value, 9);
        assert_eq!(synth.provider, SYNTHESIZED_PROVIDER);

        let other = FallbackPolicy::Synthesize.resolve(Err(Error::Cancelled("t".into())), || 9);
        assert!(matches!(other, Err(Error::Cancelled(_))));
    }

    #[test]
    fn policy_deserializes_snake_case() {
        let p: FallbackPolicy = serde_json::from_str("\"fail_fast\"").unwrap();
        assert_eq!(p, FallbackPolicy::FailFast);
        let p: FallbackPolicy = serde_json::from_str("\"synthesize\"").unwrap();
        assert_eq!(p, FallbackPolicy::Synthesize);
    }
}
