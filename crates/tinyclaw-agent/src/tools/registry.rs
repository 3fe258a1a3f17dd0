//! Tool registry — name → tool map with instrumented dispatch.
//!
//! The map takes concurrent readers (every turn) and rare writers
//! (registration at startup), so it sits behind a `std::sync::RwLock`.
//! Every execution is timed and its result size recorded; failures become
//! `ToolError` values, never panics.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use tinyclaw_core::types::ToolDefinition;

use super::base::Tool;

/// Why a tool call produced no result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("{name}: {message}")]
    Runtime { name: String, message: String },
}

impl ToolError {
    /// Render for the conversation: the LLM sees this as the tool result.
    pub fn to_result_string(&self) -> String {
        format!("Error: {self}")
    }
}

/// Thread-safe store of tools, keyed by name.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools
            .write()
            .unwrap()
            .insert(tool.name().to_string(), tool);
    }

    /// Unregister by name. Returns whether the tool was present.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.tools.write().unwrap().remove(name).is_some();
        if removed {
            info!(tool = name, "unregistered tool");
        }
        removed
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.read().unwrap().contains_key(name)
    }

    /// Names of all registered tools, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().unwrap().is_empty()
    }

    /// LLM-facing definitions, sorted by name for a byte-stable export.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .unwrap()
            .values()
            .map(|t| t.definition())
            .collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// One human-readable line per tool, for the system prompt.
    pub fn summaries(&self) -> String {
        let tools = self.tools.read().unwrap();
        let mut lines: Vec<String> = tools
            .values()
            .map(|t| {
                let first_sentence = t
                    .description()
                    .split_inclusive('.')
                    .next()
                    .unwrap_or(t.description());
                format!("- {}: {}", t.name(), first_sentence.trim())
            })
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// Dispatch a call by name.
    ///
    /// Instrumented with elapsed time and result size. A tool that returns
    /// `Err` surfaces as `ToolError::Runtime`; the caller stringifies it
    /// into the conversation rather than aborting the turn.
    pub async fn execute(
        &self,
        name: &str,
        args: HashMap<String, serde_json::Value>,
    ) -> Result<String, ToolError> {
        let tool = {
            let tools = self.tools.read().unwrap();
            match tools.get(name) {
                Some(t) => t.clone(),
                None => {
                    warn!(tool = name, "unknown tool requested");
                    return Err(ToolError::UnknownTool(name.to_string()));
                }
            }
        };

        let started = Instant::now();
        let outcome = tool.execute(args).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                info!(
                    tool = name,
                    elapsed_ms,
                    result_bytes = result.len(),
                    "tool executed"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(tool = name, elapsed_ms, error = %e, "tool failed");
                Err(ToolError::Runtime {
                    name: name.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
