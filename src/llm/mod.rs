//! Completion client abstractions.
//!
//! This module describes how the relay talks to a hosted chat-completion
//! model: the message types that make up model context, the
//! [`CompletionClient`] trait that turns a prompt into a lazy stream of text
//! fragments, and the typed [`CompletionError`] taxonomy surfaced to callers.
//!
//! # Overview
//!
//! - [`ChatCompletionsDriver`]: `OpenAI`-compatible `/v1/chat/completions` client
//! - [`Provider`]: provider detection and URL construction
//! - [`Orchestrator`]: the chat flow that ties the store, the history registry
//!   and a completion client together
//!
//! # Example
//!
//! ```rust,ignore
//! use chat_relay::llm::{ChatCompletionsDriver, CompletionClient, LlmSettings, Provider};
//!
//! let settings = LlmSettings {
//!     base_url: "https://api.openai.com".to_string(),
//!     api_key: Some("sk-...".to_string()),
//!     model: "gpt-4o-mini".to_string(),
//!     provider: Provider::OpenAI,
//! };
//! let driver = ChatCompletionsDriver::new(settings);
//! let fragments = driver.stream_completion("Be brief.", &[], "Hello", "default").await?;
//! ```

pub mod chat_completions;
pub mod orchestrator;
pub mod provider;

pub use chat_completions::ChatCompletionsDriver;
pub use orchestrator::{ChatOptions, Orchestrator, ReplyStream};
pub use provider::Provider;

use std::pin::Pin;

use futures::Stream;
use reqwest::StatusCode;

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// API key for the completion provider.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4o-mini`).
    pub model: String,
    /// Provider type (auto-detected from `base_url` if not specified).
    pub provider: Provider,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("provider", &self.provider)
            .finish()
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Text content of the message.
    pub content: String,
}

impl Message {
    /// Create a message with the given role.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Assemble model context: system prompt, prior turns in order, then the new input.
#[must_use]
pub fn build_messages(system_prompt: &str, history: &[Message], input: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(input));
    messages
}

/// Errors raised while talking to the completion provider.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// Network or transport failure (connect, TLS, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// No API key is configured for the provider.
    #[error("no API key configured for the completion provider")]
    MissingApiKey,

    /// The provider rejected the credential.
    #[error("authentication failed ({status}): {message}")]
    Auth {
        /// HTTP status returned by the provider.
        status: u16,
        /// Provider error message.
        message: String,
    },

    /// The provider throttled the request.
    #[error("rate limited by provider: {message}")]
    RateLimited {
        /// Seconds to wait, when the provider sent `Retry-After`.
        retry_after: Option<u64>,
        /// Provider error message.
        message: String,
    },

    /// Any other non-success response.
    #[error("provider returned {status}: {message}")]
    Api {
        /// HTTP status returned by the provider.
        status: u16,
        /// Provider error message.
        message: String,
    },

    /// The stream closed before the model signalled the end of its turn.
    #[error("completion stream ended before the model finished")]
    Truncated,

    /// A stream frame could not be decoded.
    #[error("malformed stream frame: {0}")]
    Decode(String),
}

impl CompletionError {
    /// Map a non-success HTTP response to a typed error.
    #[must_use]
    pub fn from_status(status: StatusCode, body: &str, retry_after: Option<u64>) -> Self {
        let message = provider_error_message(body);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth {
                status: status.as_u16(),
                message,
            },
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                retry_after,
                message,
            },
            _ => Self::Api {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Short, stable label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::MissingApiKey | Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::Api { .. } => "api",
            Self::Truncated => "truncated",
            Self::Decode(_) => "decode",
        }
    }
}

/// Maximum characters of a raw error body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Extract `error.message` from an `OpenAI`-style error body, falling back to the raw text.
fn provider_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect())
}

/// Lazy, single-pass sequence of text fragments produced by a completion call.
///
/// Dropping the stream abandons the upstream request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Trait for streaming completion clients.
///
/// Implementations open a remote call and return a [`FragmentStream`] that
/// yields text as the model generates it and ends when the model signals
/// end-of-turn. Errors detected before the first fragment (bad credentials,
/// throttling, unreachable host) are returned from the call itself.
#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync + std::fmt::Debug {
    /// Stream a reply conditioned on `system_prompt`, `history` (verbatim, in
    /// order) and the new `input`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or the provider refuses it.
    async fn stream_completion(
        &self,
        system_prompt: &str,
        history: &[Message],
        input: &str,
        session_id: &str,
    ) -> Result<FragmentStream, CompletionError>;
}
