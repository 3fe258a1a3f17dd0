//! SSE frame parsing for streaming chat completions.
//!
//! The stream is `data: <json>\n\n` frames terminated by `data: [DONE]`.
//! Text arrives under `choices[0].delta.content`; tool calls arrive as
//! per-index deltas whose `id`, `function.name`, and `function.arguments`
//! may each be split across many frames. [`StreamAccumulator`] folds the
//! frames back into a complete [`LlmResponse`].

use serde::Deserialize;

use tinyclaw_core::types::{LlmResponse, ToolCall, UsageInfo};

// ─────────────────────────────────────────────
// Frame shapes
// ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StreamFrame {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ─────────────────────────────────────────────
// Accumulator
// ─────────────────────────────────────────────

#[derive(Default)]
struct ToolCallParts {
    id: String,
    name: String,
    arguments: String,
}

/// Folds stream frames into a final response.
#[derive(Default)]
pub struct StreamAccumulator {
    content: String,
    tool_calls: Vec<ToolCallParts>,
    finish_reason: Option<String>,
    usage: Option<UsageInfo>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded frame. Returns the text delta, if the frame
    /// carried one, so the caller can forward it to the chunk sink.
    pub fn apply(&mut self, frame: StreamFrame) -> Option<String> {
        if let Some(usage) = frame.usage {
            self.usage = Some(usage);
        }

        let choice = frame.choices.into_iter().next()?;
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        if let Some(deltas) = choice.delta.tool_calls {
            for delta in deltas {
                while self.tool_calls.len() <= delta.index {
                    self.tool_calls.push(ToolCallParts::default());
                }
                let acc = &mut self.tool_calls[delta.index];
                if let Some(id) = delta.id {
                    acc.id.push_str(&id);
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        acc.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        acc.arguments.push_str(&arguments);
                    }
                }
            }
        }

        let text = choice.delta.content.filter(|t| !t.is_empty());
        if let Some(ref t) = text {
            self.content.push_str(t);
        }
        text
    }

    /// Finish accumulation and produce the response.
    pub fn finish(self) -> LlmResponse {
        LlmResponse {
            content: if self.content.is_empty() {
                None
            } else {
                Some(self.content)
            },
            tool_calls: self
                .tool_calls
                .into_iter()
                .map(|tc| ToolCall::new(tc.id, tc.name, tc.arguments))
                .collect(),
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// Extract the payload of one SSE line, if it is a data line.
/// Returns `None` for comments, blank lines, and other fields.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
        .map(str::trim)
}

/// Whether a data payload is the stream terminator.
pub fn is_done(payload: &str) -> bool {
    payload == "[DONE]"
}
