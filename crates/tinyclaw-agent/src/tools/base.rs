//! The `Tool` trait — the capability every agent tool implements.
//!
//! The loop discovers tools by `name()`, exports their schemas through
//! `definition()`, and dispatches LLM tool calls to `execute()`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use tinyclaw_core::types::ToolDefinition;

/// A named, schema-described, side-effecting operation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable snake_case name the LLM uses to call this tool.
    fn name(&self) -> &str;

    /// Description shown to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema of the parameters:
    /// `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Run the tool. The returned string goes back to the LLM verbatim.
    /// Errors are caught by the registry and converted to a runtime
    /// `ToolError` — they never escape the agent loop.
    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String>;

    /// The LLM-facing definition. Default is assembled from the parts above.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Argument helpers
// ─────────────────────────────────────────────

/// Required string argument, with a readable error for the LLM.
pub fn require_string(args: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing required parameter: {key}"))
}

pub fn optional_string(args: &HashMap<String, Value>, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub fn optional_i64(args: &HashMap<String, Value>, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

pub fn optional_bool(args: &HashMap<String, Value>, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}
