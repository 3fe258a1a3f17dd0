//! The `LlmClient` abstraction every backend satisfies.
//!
//! One implementation covers all OpenAI-compatible endpoints
//! ([`HttpLlmClient`](crate::http::HttpLlmClient)); tests swap in scripted
//! mocks. Provider selection happens before construction — a client is born
//! with a resolved `{api_base, api_key}` pair.

use async_trait::async_trait;
use thiserror::Error;

use tinyclaw_core::types::{LlmResponse, Message, ToolDefinition};

/// Per-call sampling options.
#[derive(Clone, Debug)]
pub struct ChatOptions {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: Option<f64>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
            top_p: None,
        }
    }
}

/// What went wrong talking to the backend. The client never retries; the
/// caller decides.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Connection refused, DNS failure, timeout, 5xx.
    #[error("transport error: {0}")]
    Transport(String),
    /// 2xx with a body we could not decode, or a malformed stream.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// 429 from the backend.
    #[error("rate limited: {0}")]
    RateLimit(String),
    /// 401 / 403 from the backend.
    #[error("auth error: {0}")]
    Auth(String),
}

impl LlmError {
    /// Map a non-2xx HTTP status + body to the right error kind.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => LlmError::Auth(format!("{status}: {body}")),
            429 => LlmError::RateLimit(format!("{status}: {body}")),
            _ => LlmError::Transport(format!("{status}: {body}")),
        }
    }
}

/// Sink receiving text deltas during a streaming call.
///
/// Invoked from whatever task drives the HTTP response body; implementations
/// must be safe under that caller's concurrency model.
pub type ChunkSink = Box<dyn Fn(&str) + Send + Sync>;

/// A chat-completions backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One blocking chat completion round trip.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError>;

    /// Streaming variant: text deltas go to `on_chunk` as they arrive; the
    /// fully accumulated response (including reassembled tool calls) is
    /// returned at the end.
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        options: &ChatOptions,
        on_chunk: ChunkSink,
    ) -> Result<LlmResponse, LlmError>;
}
