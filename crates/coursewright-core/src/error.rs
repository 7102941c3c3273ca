//! Error taxonomy shared by the index, the provider chain, and the workflow engine.
//!
//! Library code returns [`Error`] via `thiserror`. The `coursewright` app
//! crate wraps it with `anyhow` at the CLI and server edges.

/// Top-level error type for all core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A remote provider was unreachable, timed out, or returned a non-success status.
    #[error("transport error from {provider}: {message}")]
    Transport { provider: String, message: String },

    /// A provider response did not contain the expected well-formed JSON.
    #[error("parse error from {provider}: {message}")]
    Parse { provider: String, message: String },

    /// Caller input was rejected before any work started.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown document or thread identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// The workflow was cancelled while a stage was running.
    #[error("workflow {0} was cancelled")]
    Cancelled(String),

    /// Every configured generation provider failed.
    #[error("all generation providers failed: {}", .attempts.join("; "))]
    Exhausted { attempts: Vec<String> },

    /// Document store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Missing or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a transport error for a named provider.
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a parse error for a named provider.
    pub fn parse(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error from any displayable message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the provider chain should move on to the next provider.
    pub fn is_retryable_by_fallback(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Parse { .. })
    }
}
