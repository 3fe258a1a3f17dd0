//! File-backed long-term memory.
//!
//! The agent's memory is `workspace/memory/MEMORY.md`. The context builder
//! reads it on every prompt; the agent writes it through the ordinary file
//! tools, so there is no separate write API beyond convenience helpers.

use std::path::{Path, PathBuf};

/// Long-term notes store under the workspace.
pub struct MemoryStore {
    memory_dir: PathBuf,
    memory_file: PathBuf,
}

impl MemoryStore {
    pub fn new(workspace: &Path) -> Self {
        let memory_dir = workspace.join("memory");
        let memory_file = memory_dir.join("MEMORY.md");
        Self {
            memory_dir,
            memory_file,
        }
    }

    /// Path to the long-term memory file (for the identity prompt).
    pub fn memory_file(&self) -> &Path {
        &self.memory_file
    }

    /// Memory text for the system prompt; `None` when there is nothing.
    pub fn memory_context(&self) -> Option<String> {
        let content = std::fs::read_to_string(&self.memory_file).ok()?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Replace the memory file contents.
    pub fn write(&self, content: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.memory_dir)?;
        std::fs::write(&self.memory_file, content)
    }
}
