//! HTTP client for any OpenAI-compatible `/chat/completions` endpoint.
//!
//! The client is constructed with an already-resolved `{api_base, api_key}`
//! pair; model routing lives in the configuration layer. No retries here —
//! errors carry a kind and the caller decides.

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, error};

use tinyclaw_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolDefinition,
};

use crate::client::{ChatOptions, ChunkSink, LlmClient, LlmError};
use crate::sse::{data_payload, is_done, StreamAccumulator, StreamFrame};

/// Connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Overall request timeout (covers the read side).
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenAI-compatible chat completions client.
pub struct HttpLlmClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl std::fmt::Debug for HttpLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLlmClient")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl HttpLlmClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        options: &ChatOptions,
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(options.max_tokens),
            temperature: Some(options.temperature),
            top_p: options.top_p,
            stream: stream.then_some(true),
        }
    }

    async fn send(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            error!(status = status.as_u16(), body = %text, "chat completion failed");
            return Err(LlmError::from_status(status.as_u16(), text));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        debug!(
            model = %model,
            messages = messages.len(),
            tools = tools.map_or(0, <[ToolDefinition]>::len),
            "chat completion"
        );

        let body = self.build_request(messages, tools, model, options, false);
        let response = self.send(&body).await?;

        let decoded: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Protocol(format!("malformed response body: {e}")))?;

        let llm: LlmResponse = decoded.into();
        debug!(
            has_content = llm.content.is_some(),
            tool_calls = llm.tool_calls.len(),
            finish_reason = llm.finish_reason.as_deref().unwrap_or("?"),
            "chat completion done"
        );
        Ok(llm)
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        options: &ChatOptions,
        on_chunk: ChunkSink,
    ) -> Result<LlmResponse, LlmError> {
        debug!(model = %model, messages = messages.len(), "chat completion (stream)");

        let body = self.build_request(messages, tools, model, options, true);
        let response = self.send(&body).await?;

        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut acc = StreamAccumulator::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| LlmError::Transport(format!("stream read: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);

                let payload = match data_payload(&line) {
                    Some(p) => p,
                    None => continue,
                };
                if is_done(payload) {
                    return Ok(acc.finish());
                }
                match serde_json::from_str::<StreamFrame>(payload) {
                    Ok(frame) => {
                        if let Some(delta) = acc.apply(frame) {
                            on_chunk(&delta);
                        }
                    }
                    Err(e) => {
                        return Err(LlmError::Protocol(format!("malformed stream frame: {e}")));
                    }
                }
            }
        }

        // Stream ended without a [DONE]; surface what we have.
        Ok(acc.finish())
    }
}
