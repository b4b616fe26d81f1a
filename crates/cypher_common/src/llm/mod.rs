//! Model client abstraction.
//!
//! A [`ModelFactory`] turns a model identifier into a [`ModelClient`].
//! Construction failures and per-call failures are distinct [`LlmError`]
//! variants so the failover controller can tell them apart.

use crate::tiers::ModelTier;
use crate::types::ChatMessage;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub mod chat_completions;
pub mod fake;
pub mod sse;

pub use chat_completions::{ChatCompletionsClient, ChatCompletionsFactory};
pub use fake::{FakeModelClient, FakeModelFactory, FakeStep, StreamProbe};

/// Substrings that mark an invocation failure as worth one failover retry
pub const TRANSIENT_MARKERS: [&str; 6] = [
    "decommissioned",
    "rate limit",
    "404",
    "not found",
    "unavailable",
    "too many requests",
];

/// LLM errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// Client could not be built for this model (credentials, model id, transport)
    #[error("failed to initialise model '{model}': {reason}")]
    Construction { model: String, reason: String },

    /// Upstream answered with a non-success status
    #[error("upstream returned {status}: {message}")]
    Http { status: String, message: String },

    /// Request never got an answer
    #[error("request failed: {0}")]
    Transport(String),

    /// Token stream broke after it was opened
    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("model returned an empty response")]
    EmptyResponse,
}

impl LlmError {
    pub fn is_construction(&self) -> bool {
        matches!(self, LlmError::Construction { .. })
    }

    /// Whether this invocation failure should trigger a failover retry.
    ///
    /// Matching is done on the textual description, case-insensitively.
    pub fn is_transient(&self) -> bool {
        if self.is_construction() {
            return false;
        }
        let text = self.to_string().to_lowercase();
        TRANSIENT_MARKERS.iter().any(|m| text.contains(m))
    }
}

/// Incremental token stream: lazy, forward-only, single consumer
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// A chat-completion client bound to one model
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier this client talks to
    fn model(&self) -> &str;

    /// Blocking completion: the whole answer at once
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Streaming completion
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, LlmError>;
}

/// Builds clients for model identifiers
pub trait ModelFactory: Send + Sync {
    fn build(&self, model: &str, tier: ModelTier) -> Result<Arc<dyn ModelClient>, LlmError>;
}
