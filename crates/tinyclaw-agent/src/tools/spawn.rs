//! `spawn` — delegate a task to a background sub-agent.
//!
//! Returns an immediate confirmation; the sub-agent reports back through
//! the bus when it finishes (see `subagent`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::base::{optional_string, require_string, Tool};
use crate::subagent::SubagentManager;

/// Sub-agent delegation tool.
pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    /// Origin of the current conversation; results route back here.
    context: Mutex<(String, String)>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self {
            manager,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock().await = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a background sub-agent for a self-contained task. The sub-agent \
         works independently and reports its result back into this conversation."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Full description of the task to complete"
                },
                "label": {
                    "type": "string",
                    "description": "Short display label (optional)"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let task = require_string(&args, "task")?;
        let label = optional_string(&args, "label");
        let (channel, chat_id) = self.context.lock().await.clone();
        Ok(self.manager.spawn(task, label, channel, chat_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::tests_support::ScriptedLlm;
    use crate::agent_loop::SharedLlm;
    use tinyclaw_core::bus::MessageBus;
    use tinyclaw_core::security::{SecurityGuard, SecurityPolicy};
    use tinyclaw_core::types::LlmResponse;
    use tinyclaw_llm::ChatOptions;

    fn make_tool(dir: &tempfile::TempDir) -> SpawnTool {
        let bus = Arc::new(MessageBus::new(10));
        let guard = Arc::new(SecurityGuard::new(SecurityPolicy {
            workspace_root: dir.path().to_path_buf(),
            restrict_to_workspace: false,
            command_blacklist: Vec::new(),
        }));
        let client: Arc<dyn tinyclaw_llm::LlmClient> = Arc::new(ScriptedLlm::new(vec![
            LlmResponse {
                content: Some("done".into()),
                ..Default::default()
            },
        ]));
        let llm: SharedLlm = Arc::new(tokio::sync::RwLock::new(client));
        let manager = Arc::new(SubagentManager::new(
            llm,
            "mock".into(),
            ChatOptions::default(),
            guard,
            dir.path().to_path_buf(),
            bus,
            None,
            10,
        ));
        SpawnTool::new(manager)
    }

    #[tokio::test]
    async fn execute_returns_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let tool = make_tool(&dir);
        tool.set_context("telegram", "c1").await;

        let mut args = HashMap::new();
        args.insert("task".into(), json!("summarise the repo"));
        let result = tool.execute(args).await.unwrap();
        assert!(result.contains("Spawned subagent"));
    }

    #[tokio::test]
    async fn missing_task_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = make_tool(&dir);
        assert!(tool.execute(HashMap::new()).await.is_err());
    }

    #[test]
    fn definition_shape() {
        let dir = tempfile::tempdir().unwrap();
        let tool = make_tool(&dir);
        let def = tool.definition();
        assert_eq!(def.function.name, "spawn");
        assert_eq!(def.tool_type, "function");
    }
}
