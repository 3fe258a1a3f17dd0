//! Background sub-agents spawned by the `spawn` tool.
//!
//! A sub-agent is the same think-act loop with a fresh ephemeral history, a
//! reduced tool set (no `message`, `spawn`, or `cron`), and a capped
//! iteration budget. It runs as a detached task; when it finishes, the
//! result is published on the bus as a `system` inbound message addressed
//! back to the originating conversation, where the main loop folds it into
//! the session and replies to the user.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info};

use tinyclaw_core::bus::{InboundMessage, MessageBus};
use tinyclaw_core::security::SecurityGuard;
use tinyclaw_core::types::Message;
use tinyclaw_llm::ChatOptions;

use crate::agent_loop::SharedLlm;
use crate::tools::filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// Iteration budget for one sub-agent task.
const SUBAGENT_MAX_ITERATIONS: usize = 15;

/// Channel name used for sub-agent result announcements.
pub const SYSTEM_CHANNEL: &str = "system";
/// Sender id on announcement messages.
pub const SUBAGENT_SENDER: &str = "subagent";

/// A running sub-agent task.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    pub id: String,
    pub label: String,
    pub origin_channel: String,
    pub origin_chat_id: String,
}

/// Owns sub-agent lifecycle: spawn, track, announce.
pub struct SubagentManager {
    llm: SharedLlm,
    model: String,
    options: ChatOptions,
    guard: Arc<SecurityGuard>,
    workspace: PathBuf,
    bus: Arc<MessageBus>,
    search_api_key: Option<String>,
    exec_timeout_secs: u64,
    running: RwLock<HashMap<String, TaskInfo>>,
}

impl SubagentManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: SharedLlm,
        model: String,
        options: ChatOptions,
        guard: Arc<SecurityGuard>,
        workspace: PathBuf,
        bus: Arc<MessageBus>,
        search_api_key: Option<String>,
        exec_timeout_secs: u64,
    ) -> Self {
        Self {
            llm,
            model,
            options,
            guard,
            workspace,
            bus,
            search_api_key,
            exec_timeout_secs,
            running: RwLock::new(HashMap::new()),
        }
    }

    /// Number of tasks currently running.
    pub async fn task_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Start a sub-agent in the background; returns an immediate
    /// confirmation string for the calling LLM.
    pub async fn spawn(
        self: &Arc<Self>,
        task: String,
        label: Option<String>,
        origin_channel: String,
        origin_chat_id: String,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let label = label.unwrap_or_else(|| tinyclaw_core::utils::truncate_string(&task, 32));

        let info = TaskInfo {
            id: id.clone(),
            label: label.clone(),
            origin_channel,
            origin_chat_id,
        };
        self.running.write().await.insert(id.clone(), info.clone());
        info!(task_id = %id, label = %label, "spawning subagent");

        let manager = self.clone();
        tokio::spawn(async move {
            let report = manager.run_task(&info, &task).await;
            manager.announce(&info, report).await;
            manager.running.write().await.remove(&info.id);
        });

        format!("Spawned subagent [{id}] for task: {label}. The result will be reported when ready.")
    }

    /// The sub-agent's own think-act loop over a reduced registry.
    async fn run_task(&self, info: &TaskInfo, task: &str) -> String {
        let tools = self.build_registry();
        let defs = tools.definitions();
        let client = self.llm.read().await.clone();

        let mut messages = vec![
            Message::system(format!(
                "You are a focused sub-agent working on one task. Workspace: {}. \
                 Complete the task using the available tools, then reply with a \
                 concise report of what you did and found. You cannot message \
                 the user directly; your final reply is the report.",
                self.workspace.display()
            )),
            Message::user(task.to_string()),
        ];

        for iteration in 0..SUBAGENT_MAX_ITERATIONS {
            let response = match client
                .chat(&messages, Some(&defs), &self.model, &self.options)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    error!(task_id = %info.id, error = %e, "subagent LLM call failed");
                    return format!("Subagent failed: {e}");
                }
            };

            if !response.has_tool_calls() {
                return response
                    .content
                    .unwrap_or_else(|| "Subagent finished with no report.".into());
            }

            let calls = response.tool_calls.clone();
            messages.push(Message::assistant_tool_calls(calls.clone()));
            for call in &calls {
                let args: HashMap<String, serde_json::Value> =
                    serde_json::from_str(&call.function.arguments).unwrap_or_default();
                debug!(task_id = %info.id, tool = %call.function.name, iteration, "subagent tool call");
                let result = match tools.execute(&call.function.name, args).await {
                    Ok(result) => result,
                    Err(e) => e.to_result_string(),
                };
                messages.push(Message::tool_result(&call.id, result));
            }
        }

        "Subagent stopped: iteration budget exhausted before the task completed.".into()
    }

    /// Publish the report back to the originating conversation.
    async fn announce(&self, info: &TaskInfo, report: String) {
        let content = format!(
            "Subagent [{}] finished task '{}'.\n\n{report}",
            info.id, info.label
        );
        let mut msg = InboundMessage::new(
            SYSTEM_CHANNEL,
            SUBAGENT_SENDER,
            format!("{}:{}", info.origin_channel, info.origin_chat_id),
            content,
        );
        msg.metadata
            .insert("task_id".to_string(), info.id.clone());

        if self.bus.publish_inbound(msg).is_dropped() {
            error!(task_id = %info.id, "failed to announce subagent result");
        }
    }

    fn build_registry(&self) -> ToolRegistry {
        let tools = ToolRegistry::new();
        tools.register(Arc::new(ReadFileTool::new(self.guard.clone())));
        tools.register(Arc::new(WriteFileTool::new(self.guard.clone())));
        tools.register(Arc::new(ListDirTool::new(self.guard.clone())));
        tools.register(Arc::new(ExecTool::new(
            self.guard.clone(),
            self.workspace.clone(),
            Some(self.exec_timeout_secs),
        )));
        tools.register(Arc::new(WebSearchTool::new(self.search_api_key.clone())));
        tools.register(Arc::new(WebFetchTool::new()));
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::tests_support::ScriptedLlm;
    use tinyclaw_core::security::SecurityPolicy;
    use tinyclaw_core::types::{LlmResponse, ToolCall};

    fn make_manager(
        dir: &tempfile::TempDir,
        responses: Vec<LlmResponse>,
    ) -> (Arc<SubagentManager>, Arc<MessageBus>) {
        let bus = Arc::new(MessageBus::new(10));
        let guard = Arc::new(SecurityGuard::new(SecurityPolicy {
            workspace_root: dir.path().to_path_buf(),
            restrict_to_workspace: false,
            command_blacklist: Vec::new(),
        }));
        let client: Arc<dyn tinyclaw_llm::LlmClient> = Arc::new(ScriptedLlm::new(responses));
        let llm: SharedLlm = Arc::new(RwLock::new(client));
        let manager = Arc::new(SubagentManager::new(
            llm,
            "mock-model".into(),
            ChatOptions::default(),
            guard,
            dir.path().to_path_buf(),
            bus.clone(),
            None,
            10,
        ));
        (manager, bus)
    }

    #[tokio::test]
    async fn spawn_announces_result_to_origin() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, bus) = make_manager(
            &dir,
            vec![LlmResponse {
                content: Some("Task complete: 2 files reviewed.".into()),
                ..Default::default()
            }],
        );

        let confirmation = manager
            .spawn(
                "review the files".into(),
                Some("review".into()),
                "telegram".into(),
                "chat_5".into(),
            )
            .await;
        assert!(confirmation.contains("Spawned subagent"));

        let announced = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            bus.consume_inbound(),
        )
        .await
        .expect("timed out")
        .expect("message expected");

        assert_eq!(announced.channel, SYSTEM_CHANNEL);
        assert_eq!(announced.sender_id, SUBAGENT_SENDER);
        assert_eq!(announced.chat_id, "telegram:chat_5");
        assert!(announced.content.contains("Task complete"));
    }

    #[tokio::test]
    async fn subagent_runs_tool_calls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "forty-two").unwrap();
        let path = dir.path().join("data.txt");

        let (manager, bus) = make_manager(
            &dir,
            vec![
                LlmResponse {
                    tool_calls: vec![ToolCall::new(
                        "c1",
                        "read_file",
                        serde_json::json!({"path": path.to_str().unwrap()}).to_string(),
                    )],
                    ..Default::default()
                },
                LlmResponse {
                    content: Some("The file says forty-two.".into()),
                    ..Default::default()
                },
            ],
        );

        manager
            .spawn("read data.txt".into(), None, "cli".into(), "direct".into())
            .await;

        let announced = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            bus.consume_inbound(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(announced.content.contains("forty-two"));
    }

    #[tokio::test]
    async fn reduced_registry_has_no_messaging_tools() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _bus) = make_manager(&dir, vec![]);
        let tools = manager.build_registry();
        assert!(!tools.has("message"));
        assert!(!tools.has("spawn"));
        assert!(!tools.has("cron"));
        assert!(tools.has("read_file"));
        assert!(tools.has("exec"));
    }

    #[tokio::test]
    async fn task_count_tracks_running_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, bus) = make_manager(
            &dir,
            vec![LlmResponse {
                content: Some("ok".into()),
                ..Default::default()
            }],
        );
        assert_eq!(manager.task_count().await, 0);

        manager
            .spawn("quick".into(), None, "cli".into(), "direct".into())
            .await;
        // Wait for the announcement, after which the task unregisters.
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), bus.consume_inbound())
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(manager.task_count().await, 0);
    }
}
