//! The agent reasoning loop: think, act, iterate.
//!
//! One turn = acquire session → build context → call the LLM → dispatch any
//! tool calls in declared order → repeat until the model produces text or
//! the iteration cap trips. Every message of the turn (user, assistant tool
//! calls, tool results, final assistant) lands in the session, which is
//! persisted after the turn. Long histories are condensed into a summary
//! after the turn completes.
//!
//! The bound LLM client can be swapped while running; a turn in flight
//! finishes on the client it started with, the next turn sees the new one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use tinyclaw_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use tinyclaw_core::security::SecurityGuard;
use tinyclaw_core::session::SessionStore;
use tinyclaw_core::types::Message;
use tinyclaw_cron::Scheduler;
use tinyclaw_llm::{ChatOptions, LlmClient};

use crate::context::{ContextBuilder, ContextRequest};
use crate::subagent::{SubagentManager, SUBAGENT_SENDER, SYSTEM_CHANNEL};
use crate::tools::cron_tool::CronTool;
use crate::tools::filesystem::{
    AppendFileTool, EditFileTool, ListDirTool, ReadFileTool, WriteFileTool,
};
use crate::tools::message::MessageTool;
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::spawn::SpawnTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// The swappable LLM client handle shared with sub-agents.
pub type SharedLlm = Arc<RwLock<Arc<dyn LlmClient>>>;

/// Per-turn text-delta sink for the streaming entry point.
pub type StreamSink = Arc<dyn Fn(&str) + Send + Sync>;

/// History length that triggers summarisation.
const MSG_THRESHOLD: usize = 20;
/// Fraction of the context window that triggers summarisation.
const TOKEN_FRACTION: f64 = 0.75;
/// Messages kept verbatim when summarising.
const KEEP_RECENT: usize = 4;
/// Rough chars-per-token estimate for the trigger arithmetic.
const CHARS_PER_TOKEN: usize = 4;

const SUMMARY_SYSTEM_PROMPT: &str = "You condense conversations. Summarise the \
transcript you are given into a compact brief a future assistant turn can rely \
on: decisions, facts, open tasks, user preferences. Reply with the summary only.";

/// Static knobs for the loop and its tools.
#[derive(Clone, Debug)]
pub struct AgentSettings {
    pub workspace: PathBuf,
    pub agent_name: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub max_tool_iterations: usize,
    pub context_window_tokens: usize,
    pub search_api_key: Option<String>,
    pub exec_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            workspace: std::env::temp_dir(),
            agent_name: "TinyClaw".into(),
            model: "gpt-4o".into(),
            max_tokens: 4096,
            temperature: 0.7,
            max_tool_iterations: 20,
            context_window_tokens: 128_000,
            search_api_key: None,
            exec_timeout_secs: 60,
        }
    }
}

/// The agent loop and its tool registry.
pub struct AgentLoop {
    bus: Arc<MessageBus>,
    llm: SharedLlm,
    sessions: Arc<SessionStore>,
    tools: Arc<ToolRegistry>,
    context: ContextBuilder,
    message_tool: Arc<MessageTool>,
    spawn_tool: Arc<SpawnTool>,
    cron_tool: Option<Arc<CronTool>>,
    model: String,
    options: ChatOptions,
    max_iterations: usize,
    context_window_tokens: usize,
    shutdown: Arc<tokio::sync::Notify>,
}

impl AgentLoop {
    pub fn new(
        bus: Arc<MessageBus>,
        client: Arc<dyn LlmClient>,
        guard: Arc<SecurityGuard>,
        sessions: Arc<SessionStore>,
        scheduler: Option<Arc<Scheduler>>,
        settings: AgentSettings,
    ) -> Self {
        let llm: SharedLlm = Arc::new(RwLock::new(client));
        let options = ChatOptions {
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            top_p: None,
        };
        let context = ContextBuilder::new(&settings.workspace, &settings.agent_name);

        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(ReadFileTool::new(guard.clone())));
        tools.register(Arc::new(WriteFileTool::new(guard.clone())));
        tools.register(Arc::new(AppendFileTool::new(guard.clone())));
        tools.register(Arc::new(EditFileTool::new(guard.clone())));
        tools.register(Arc::new(ListDirTool::new(guard.clone())));
        tools.register(Arc::new(ExecTool::new(
            guard.clone(),
            settings.workspace.clone(),
            Some(settings.exec_timeout_secs),
        )));
        tools.register(Arc::new(WebSearchTool::new(settings.search_api_key.clone())));
        tools.register(Arc::new(WebFetchTool::new()));

        let message_tool = Arc::new(MessageTool::new(bus.clone()));
        tools.register(message_tool.clone());

        let subagents = Arc::new(SubagentManager::new(
            llm.clone(),
            settings.model.clone(),
            options.clone(),
            guard,
            settings.workspace.clone(),
            bus.clone(),
            settings.search_api_key.clone(),
            settings.exec_timeout_secs,
        ));
        let spawn_tool = Arc::new(SpawnTool::new(subagents));
        tools.register(spawn_tool.clone());

        let cron_tool = scheduler.map(|scheduler| {
            let tool = Arc::new(CronTool::new(scheduler));
            tools.register(tool.clone());
            tool
        });

        info!(
            model = %settings.model,
            tools = tools.len(),
            max_iterations = settings.max_tool_iterations,
            "agent loop ready"
        );

        Self {
            bus,
            llm,
            sessions,
            tools,
            context,
            message_tool,
            spawn_tool,
            cron_tool,
            model: settings.model,
            options,
            max_iterations: settings.max_tool_iterations,
            context_window_tokens: settings.context_window_tokens,
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// The tool registry (for extension and inspection).
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Tell the `message` tool which channels actually exist.
    pub fn set_known_channels(&self, names: impl IntoIterator<Item = String>) {
        self.message_tool.set_known_channels(names);
    }

    /// Replace the LLM client. Turns already running keep the old client;
    /// the next turn picks up the new one.
    pub async fn swap_client(&self, client: Arc<dyn LlmClient>) {
        *self.llm.write().await = client;
        info!("llm client swapped");
    }

    // ─────────────────────────────────────────
    // Entry points
    // ─────────────────────────────────────────

    /// Consume inbound messages until the bus closes or `stop()` is called.
    /// A turn in flight always runs to completion; the shutdown signal is
    /// only observed between messages, so stopping drains the current turn.
    pub async fn run(&self) {
        info!("agent loop consuming inbound messages");
        loop {
            let msg = tokio::select! {
                msg = self.bus.consume_inbound() => msg,
                _ = self.shutdown.notified() => {
                    info!("agent loop received shutdown");
                    break;
                }
            };
            match msg {
                Some(msg) => {
                    let outbound = self.process_inbound(&msg).await;
                    match outbound {
                        Ok(response) => {
                            self.bus.publish_outbound(response);
                        }
                        Err(e) => {
                            error!(session = %msg.session_key(), error = %e, "turn failed");
                            self.bus.publish_outbound(OutboundMessage::new(
                                &msg.channel,
                                &msg.chat_id,
                                format!("I ran into an error: {e}"),
                            ));
                        }
                    }
                }
                None => {
                    info!("inbound queue closed, agent loop exiting");
                    break;
                }
            }
        }
    }

    /// Ask `run()` to exit after the in-flight turn completes.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// One inbound message → one outbound response.
    ///
    /// Sub-agent announcements (`system` channel) are folded back into the
    /// conversation they came from.
    pub async fn process_inbound(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        if msg.channel == SYSTEM_CHANNEL && msg.sender_id == SUBAGENT_SENDER {
            let (channel, chat_id) = msg.chat_id.split_once(':').ok_or_else(|| {
                anyhow::anyhow!("malformed system message chat_id: {}", msg.chat_id)
            })?;
            let session_key = format!("{channel}:{chat_id}");
            let text = self
                .run_turn(&msg.content, &session_key, channel, chat_id, None)
                .await?;
            return Ok(OutboundMessage::new(channel, chat_id, text));
        }

        let mut text = msg.content.clone();
        if !msg.media.is_empty() {
            text.push_str("\n\n[attached media: ");
            text.push_str(&msg.media.join(", "));
            text.push(']');
        }

        let session_key = msg.session_key();
        let response = self
            .run_turn(&text, &session_key, &msg.channel, &msg.chat_id, None)
            .await?;
        Ok(OutboundMessage::new(&msg.channel, &msg.chat_id, response))
    }

    /// Synchronous one-shot: returns the final assistant text.
    pub async fn process_direct(&self, text: &str, session_key: &str) -> Result<String> {
        let (channel, chat_id) = split_session_key(session_key);
        self.run_turn(text, session_key, &channel, &chat_id, None)
            .await
    }

    /// Streaming one-shot: text deltas go to `on_chunk` as they arrive.
    pub async fn process_direct_stream(
        &self,
        text: &str,
        session_key: &str,
        on_chunk: StreamSink,
    ) -> Result<String> {
        let (channel, chat_id) = split_session_key(session_key);
        self.run_turn(text, session_key, &channel, &chat_id, Some(on_chunk))
            .await
    }

    /// Scheduler entry point: the turn runs with tool context pointed at a
    /// real channel so `message`/`spawn` target the right chat.
    pub async fn process_direct_with_channel(
        &self,
        text: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
    ) -> Result<String> {
        self.run_turn(text, session_key, channel, chat_id, None).await
    }

    // ─────────────────────────────────────────
    // Turn machinery
    // ─────────────────────────────────────────

    async fn run_turn(
        &self,
        user_text: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
        sink: Option<StreamSink>,
    ) -> Result<String> {
        // Pin the client for the whole turn: a concurrent swap must not
        // change backends mid-conversation.
        let client = self.llm.read().await.clone();

        self.message_tool.set_context(channel, chat_id).await;
        self.spawn_tool.set_context(channel, chat_id).await;
        if let Some(ref cron_tool) = self.cron_tool {
            cron_tool.set_context(channel, chat_id).await;
        }

        let history = self.sessions.history(session_key);
        let summary = self.sessions.summary(session_key);
        let tool_summaries = self.tools.summaries();

        let mut messages = self.context.build_messages(ContextRequest {
            history: &history,
            summary: &summary,
            user_text,
            tool_summaries: &tool_summaries,
            channel,
            chat_id,
        });
        self.sessions.append(session_key, Message::user(user_text));

        let definitions = self.tools.definitions();
        let final_text = 'turn: {
            for llm_call in 0..=self.max_iterations {
                debug!(session = %session_key, llm_call, "llm call");

                let response = match self
                    .chat_once(client.as_ref(), &messages, &definitions, sink.as_ref())
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        // The turn's user message stays in the session so a
                        // retry is natural; the error is this turn's reply.
                        warn!(session = %session_key, error = %e, "llm call failed");
                        break 'turn format!("LLM error: {e}");
                    }
                };

                if !response.has_tool_calls() {
                    break 'turn response.content.unwrap_or_default();
                }

                if llm_call == self.max_iterations {
                    // Budget exhausted with the model still asking for
                    // tools. Discard the unexecuted calls entirely — a
                    // persisted assistant tool_calls message with no
                    // matching tool results would poison every later turn.
                    break 'turn format!(
                        "Stopped after reaching the limit of {} tool iterations for a \
                         single request. Partial progress has been recorded above.",
                        self.max_iterations
                    );
                }

                let calls = response.tool_calls;
                let assistant = Message::assistant_tool_calls(calls.clone());
                messages.push(assistant.clone());
                self.sessions.append(session_key, assistant);

                for call in &calls {
                    let args: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&call.function.arguments).unwrap_or_default();
                    info!(session = %session_key, tool = %call.function.name, "tool call");

                    let result = match self.tools.execute(&call.function.name, args).await {
                        Ok(result) => result,
                        Err(e) => e.to_result_string(),
                    };
                    let tool_msg = Message::tool_result(&call.id, result);
                    messages.push(tool_msg.clone());
                    self.sessions.append(session_key, tool_msg);
                }
            }
            // Unreachable: the loop always breaks with a value.
            String::new()
        };

        self.sessions
            .append(session_key, Message::assistant(final_text.clone()));
        if let Err(e) = self.sessions.save(session_key) {
            warn!(session = %session_key, error = %e, "session save failed");
        }

        self.maybe_summarise(client.as_ref(), session_key).await;
        Ok(final_text)
    }

    async fn chat_once(
        &self,
        client: &dyn LlmClient,
        messages: &[Message],
        definitions: &[tinyclaw_core::types::ToolDefinition],
        sink: Option<&StreamSink>,
    ) -> Result<tinyclaw_core::types::LlmResponse, tinyclaw_llm::LlmError> {
        match sink {
            Some(sink) => {
                let sink = sink.clone();
                client
                    .chat_stream(
                        messages,
                        Some(definitions),
                        &self.model,
                        &self.options,
                        Box::new(move |delta| sink(delta)),
                    )
                    .await
            }
            None => {
                client
                    .chat(messages, Some(definitions), &self.model, &self.options)
                    .await
            }
        }
    }

    // ─────────────────────────────────────────
    // Summarisation
    // ─────────────────────────────────────────

    /// Condense old history into the session summary when it grows past the
    /// message or token threshold. Best-effort: failures leave history
    /// untouched.
    async fn maybe_summarise(&self, client: &dyn LlmClient, session_key: &str) {
        let history = self.sessions.history(session_key);
        if history.len() <= KEEP_RECENT {
            return;
        }

        let total_chars: usize = history.iter().filter_map(|m| m.text()).map(str::len).sum();
        let token_budget =
            (self.context_window_tokens as f64 * TOKEN_FRACTION) as usize * CHARS_PER_TOKEN;
        if history.len() < MSG_THRESHOLD && total_chars < token_budget {
            return;
        }

        let split = history.len() - KEEP_RECENT;
        let older = &history[..split];
        let prior_summary = self.sessions.summary(session_key);

        let mut transcript = String::new();
        if !prior_summary.is_empty() {
            transcript.push_str("Earlier summary:\n");
            transcript.push_str(&prior_summary);
            transcript.push_str("\n\nNewer messages:\n");
        }
        for message in older {
            transcript.push_str(&render_for_summary(message));
            transcript.push('\n');
        }

        debug!(session = %session_key, messages = older.len(), "summarising history");
        let request = vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(transcript),
        ];

        match client.chat(&request, None, &self.model, &self.options).await {
            Ok(response) => {
                let Some(summary) = response.content.filter(|s| !s.trim().is_empty()) else {
                    warn!(session = %session_key, "summarisation returned no text");
                    return;
                };
                self.sessions.set_summary(session_key, summary.trim());
                self.sessions.truncate(session_key, KEEP_RECENT);
                if let Err(e) = self.sessions.save(session_key) {
                    warn!(session = %session_key, error = %e, "session save after summary failed");
                }
                info!(session = %session_key, kept = KEEP_RECENT, "history summarised");
            }
            Err(e) => {
                warn!(session = %session_key, error = %e, "summarisation failed, keeping history");
            }
        }
    }
}

/// Best-effort `channel:chat` split; direct keys without a colon get the
/// whole key as the chat id on the `cli` channel.
fn split_session_key(session_key: &str) -> (String, String) {
    match session_key.split_once(':') {
        Some((channel, chat_id)) => (channel.to_string(), chat_id.to_string()),
        None => ("cli".to_string(), session_key.to_string()),
    }
}

/// Single-line rendering of a message for the summarisation transcript.
fn render_for_summary(message: &Message) -> String {
    match message {
        Message::System { .. } => String::new(),
        Message::User { content } => format!("user: {content}"),
        Message::Assistant {
            content,
            tool_calls,
        } => match (content, tool_calls) {
            (Some(text), _) => format!("assistant: {text}"),
            (None, Some(calls)) => {
                let names: Vec<&str> =
                    calls.iter().map(|c| c.function.name.as_str()).collect();
                format!("assistant: [called tools: {}]", names.join(", "))
            }
            (None, None) => String::new(),
        },
        Message::Tool { content, .. } => {
            format!(
                "tool: {}",
                tinyclaw_core::utils::truncate_string(content, 200)
            )
        }
    }
}

// ─────────────────────────────────────────────
// Test support
// ─────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tinyclaw_core::types::{LlmResponse, Message, ToolDefinition};
    use tinyclaw_llm::{ChatOptions, ChunkSink, LlmClient, LlmError};

    /// Mock client returning canned responses in order.
    pub(crate) struct ScriptedLlm {
        responses: Mutex<Vec<LlmResponse>>,
        pub calls: AtomicUsize,
        fail_with: Option<String>,
    }

    impl ScriptedLlm {
        pub fn new(responses: Vec<LlmResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                fail_with: None,
            }
        }

        /// A client whose every call fails with a transport error.
        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                responses: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                fail_with: Some(message.into()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next(&self) -> Result<LlmResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ref message) = self.fail_with {
                return Err(LlmError::Transport(message.clone()));
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(LlmResponse {
                    content: Some("(out of scripted responses)".into()),
                    ..Default::default()
                })
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _options: &ChatOptions,
        ) -> Result<LlmResponse, LlmError> {
            self.next()
        }

        async fn chat_stream(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _options: &ChatOptions,
            on_chunk: ChunkSink,
        ) -> Result<LlmResponse, LlmError> {
            let response = self.next()?;
            if let Some(ref content) = response.content {
                // Deliver in two chunks to exercise accumulation.
                let mid = content.len() / 2;
                let (a, b) = content.split_at(mid);
                if !a.is_empty() {
                    on_chunk(a);
                }
                if !b.is_empty() {
                    on_chunk(b);
                }
            }
            Ok(response)
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
