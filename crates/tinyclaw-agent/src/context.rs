//! Context builder — assembles the message list for each LLM call.
//!
//! The output is always `[system] + history + [user]`. The system message
//! is built from ordered sections joined by `---` separators: identity,
//! workspace guide files, tool summaries, skills index, memory, current
//! session hints, and the prior conversation summary. Absent sources are
//! simply omitted. The builder reads files but never mutates anything.

use std::path::PathBuf;

use chrono::Utc;
use tracing::debug;

use tinyclaw_core::types::Message;

use crate::memory::MemoryStore;
use crate::skills::SkillsIndex;

/// Guide files injected from the workspace root when present.
const GUIDE_FILES: &[&str] = &["AGENTS.md", "SOUL.md", "USER.md", "IDENTITY.md"];

/// Everything that varies per call.
pub struct ContextRequest<'a> {
    pub history: &'a [Message],
    pub summary: &'a str,
    pub user_text: &'a str,
    pub tool_summaries: &'a str,
    pub channel: &'a str,
    pub chat_id: &'a str,
}

/// Builds system prompts and full message lists.
pub struct ContextBuilder {
    workspace: PathBuf,
    agent_name: String,
    memory: MemoryStore,
    skills: SkillsIndex,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>, agent_name: impl Into<String>) -> Self {
        let workspace = workspace.into();
        let memory = MemoryStore::new(&workspace);
        let skills = SkillsIndex::new(&workspace);
        Self {
            workspace,
            agent_name: agent_name.into(),
            memory,
            skills,
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Build the full message list for one LLM call.
    pub fn build_messages(&self, req: ContextRequest<'_>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(req.history.len() + 2);
        messages.push(Message::system(self.build_system_prompt(&req)));
        messages.extend_from_slice(req.history);
        messages.push(Message::user(req.user_text));
        messages
    }

    fn build_system_prompt(&self, req: &ContextRequest<'_>) -> String {
        let mut sections: Vec<String> = Vec::new();

        sections.push(self.identity());

        for filename in GUIDE_FILES {
            let path = self.workspace.join(filename);
            if let Ok(content) = std::fs::read_to_string(&path) {
                if !content.trim().is_empty() {
                    debug!(file = filename, "loaded guide file");
                    sections.push(format!("## {filename}\n\n{}", content.trim()));
                }
            }
        }

        if !req.tool_summaries.is_empty() {
            sections.push(format!("## Tools\n\n{}", req.tool_summaries));
        }

        let skills = self.skills.index_text();
        if !skills.is_empty() {
            sections.push(format!(
                "## Skills\n\nThe following skills are available. To use one, read its \
                 SKILL.md with the `read_file` tool first.\n\n{skills}"
            ));
        }

        if let Some(memory) = self.memory.memory_context() {
            sections.push(format!("## Memory\n\n{memory}"));
        }

        sections.push(format!(
            "## Current Session\n\nChannel: {}\nChat ID: {}",
            req.channel, req.chat_id
        ));

        if !req.summary.is_empty() {
            sections.push(format!(
                "## Earlier Conversation (summarised)\n\n{}",
                req.summary
            ));
        }

        sections.join("\n\n---\n\n")
    }

    fn identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let memory_file = self.memory.memory_file().display().to_string();
        format!(
            "# Identity\n\n\
             You are **{name}**, a personal AI agent.\n\n\
             - Date/time: {now}\n\
             - Workspace: `{workspace}`\n\n\
             Use your tools to read and write files, run commands, search the \
             web, and schedule future work. Prefer tools over guessing. When \
             you learn something durable about the user, record it in \
             `{memory_file}` with the file tools.",
            name = self.agent_name,
            workspace = self.workspace.display(),
        )
    }
}
