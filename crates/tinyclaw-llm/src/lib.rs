//! LLM client layer for TinyClaw.
//!
//! One trait, one HTTP implementation:
//! - [`client::LlmClient`] — chat + streaming chat against a resolved
//!   `{api_base, api_key}` backend
//! - [`http::HttpLlmClient`] — OpenAI-compatible `/chat/completions` over
//!   `reqwest`, with SSE decoding in [`sse`]

pub mod client;
pub mod http;
pub mod sse;

pub use client::{ChatOptions, ChunkSink, LlmClient, LlmError};
pub use http::HttpLlmClient;
