//! Filesystem tools — read, write, append, edit, list.
//!
//! Every path argument goes through the shared `SecurityGuard` before any
//! I/O. A denial is returned as the tool's result string (the LLM sees the
//! reason and can react); only genuine I/O failures become errors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use tinyclaw_core::security::SecurityGuard;

use super::base::{require_string, Tool};

/// Resolve a checked path argument: the expanded path when allowed, the
/// denial reason when the guard refused.
fn checked_path(guard: &SecurityGuard, raw: &str) -> Result<PathBuf, String> {
    match guard.check_file_path(raw) {
        verdict if verdict.is_allowed() => Ok(expand(raw)),
        verdict => Err(verdict.reason().unwrap_or("Access denied").to_string()),
    }
}

fn expand(raw: &str) -> PathBuf {
    tinyclaw_core::utils::expand_home(raw)
}

// ─────────────────────────────────────────────
// read_file
// ─────────────────────────────────────────────

/// Returns the full contents of a file.
pub struct ReadFileTool {
    guard: Arc<SecurityGuard>,
}

impl ReadFileTool {
    pub fn new(guard: Arc<SecurityGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let raw = require_string(&args, "path")?;
        let path = match checked_path(&self.guard, &raw) {
            Ok(p) => p,
            Err(denied) => return Ok(denied),
        };

        if !path.is_file() {
            anyhow::bail!("file not found: {}", path.display());
        }
        std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))
    }
}

// ─────────────────────────────────────────────
// write_file
// ─────────────────────────────────────────────

/// Creates or overwrites a file; parent directories are created as needed.
pub struct WriteFileTool {
    guard: Arc<SecurityGuard>,
}

impl WriteFileTool {
    pub fn new(guard: Arc<SecurityGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it or overwriting the existing contents."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Destination file path"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let raw = require_string(&args, "path")?;
        let content = require_string(&args, "content")?;
        let path = match checked_path(&self.guard, &raw) {
            Ok(p) => p,
            Err(denied) => return Ok(denied),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", parent.display()))?;
        }
        std::fs::write(&path, &content)
            .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))?;
        Ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path.display()
        ))
    }
}

// ─────────────────────────────────────────────
// append_file
// ─────────────────────────────────────────────

/// Appends content to a file, creating it if missing.
pub struct AppendFileTool {
    guard: Arc<SecurityGuard>,
}

impl AppendFileTool {
    pub fn new(guard: Arc<SecurityGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for AppendFileTool {
    fn name(&self) -> &str {
        "append_file"
    }

    fn description(&self) -> &str {
        "Append content to the end of a file, creating the file if it does not exist."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to append to"
                },
                "content": {
                    "type": "string",
                    "description": "Content to append"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let raw = require_string(&args, "path")?;
        let content = require_string(&args, "content")?;
        let path = match checked_path(&self.guard, &raw) {
            Ok(p) => p,
            Err(denied) => return Ok(denied),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", parent.display()))?;
        }
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| anyhow::anyhow!("failed to open {}: {e}", path.display()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| anyhow::anyhow!("failed to append to {}: {e}", path.display()))?;
        Ok(format!(
            "Appended {} bytes to {}",
            content.len(),
            path.display()
        ))
    }
}

// ─────────────────────────────────────────────
// edit_file
// ─────────────────────────────────────────────

/// Replaces the first occurrence of `old_text` with `new_text`.
pub struct EditFileTool {
    guard: Arc<SecurityGuard>,
}

impl EditFileTool {
    pub fn new(guard: Arc<SecurityGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing the first occurrence of old_text with new_text. \
         Include enough surrounding context in old_text to make the match unique."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to edit"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to find"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let raw = require_string(&args, "path")?;
        let old_text = require_string(&args, "old_text")?;
        let new_text = require_string(&args, "new_text")?;
        let path = match checked_path(&self.guard, &raw) {
            Ok(p) => p,
            Err(denied) => return Ok(denied),
        };

        if !path.is_file() {
            anyhow::bail!("file not found: {}", path.display());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;

        let occurrences = content.matches(&old_text).count();
        if occurrences == 0 {
            anyhow::bail!("old_text not found in {}", path.display());
        }

        let updated = content.replacen(&old_text, &new_text, 1);
        std::fs::write(&path, updated)
            .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))?;

        if occurrences > 1 {
            Ok(format!(
                "Edited {} (note: old_text appeared {} times; only the first occurrence was replaced)",
                path.display(),
                occurrences
            ))
        } else {
            Ok(format!("Edited {}", path.display()))
        }
    }
}

// ─────────────────────────────────────────────
// list_dir
// ─────────────────────────────────────────────

/// Lists a directory's entries, directories first.
pub struct ListDirTool {
    guard: Arc<SecurityGuard>,
}

impl ListDirTool {
    pub fn new(guard: Arc<SecurityGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory with type markers."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let raw = require_string(&args, "path")?;
        let path = match checked_path(&self.guard, &raw) {
            Ok(p) => p,
            Err(denied) => return Ok(denied),
        };

        if !path.is_dir() {
            anyhow::bail!("not a directory: {}", path.display());
        }

        let mut entries: Vec<_> = std::fs::read_dir(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?
            .filter_map(Result::ok)
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut lines = Vec::new();
        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            lines.push(if is_dir {
                format!("{name}/")
            } else {
                name
            });
        }

        if lines.is_empty() {
            Ok("(empty directory)".into())
        } else {
            Ok(lines.join("\n"))
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tinyclaw_core::security::SecurityPolicy;

    fn open_guard() -> Arc<SecurityGuard> {
        Arc::new(SecurityGuard::new(SecurityPolicy {
            workspace_root: std::env::temp_dir(),
            restrict_to_workspace: false,
            command_blacklist: Vec::new(),
        }))
    }

    fn restricted_guard(root: &std::path::Path) -> Arc<SecurityGuard> {
        Arc::new(SecurityGuard::new(SecurityPolicy {
            workspace_root: root.to_path_buf(),
            restrict_to_workspace: true,
            command_blacklist: Vec::new(),
        }))
    }

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn read_file_returns_contents() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, "hi there").unwrap();

        let tool = ReadFileTool::new(open_guard());
        let result = tool
            .execute(args(&[("path", file.to_str().unwrap())]))
            .await
            .unwrap();
        assert_eq!(result, "hi there");
    }

    #[tokio::test]
    async fn read_missing_file_is_error() {
        let tool = ReadFileTool::new(open_guard());
        let result = tool
            .execute(args(&[("path", "/tmp/definitely_not_here_12345.txt")]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn read_outside_workspace_denied_as_data() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(restricted_guard(dir.path()));

        // The denial is a successful tool result, not an error.
        let result = tool.execute(args(&[("path", "/etc/passwd")])).await.unwrap();
        assert!(result.starts_with("Access denied"));
    }

    #[tokio::test]
    async fn write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a").join("b").join("out.txt");

        let tool = WriteFileTool::new(open_guard());
        let result = tool
            .execute(args(&[
                ("path", file.to_str().unwrap()),
                ("content", "deep"),
            ]))
            .await
            .unwrap();
        assert!(result.starts_with("Wrote 4 bytes"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "deep");
    }

    #[tokio::test]
    async fn write_outside_workspace_denied() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        let outside = dir.path().join("escape.txt");

        let tool = WriteFileTool::new(restricted_guard(&ws));
        let result = tool
            .execute(args(&[
                ("path", outside.to_str().unwrap()),
                ("content", "nope"),
            ]))
            .await
            .unwrap();
        assert!(result.starts_with("Access denied"));
        assert!(!outside.exists());
    }

    #[tokio::test]
    async fn append_creates_then_extends() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("log.txt");
        let tool = AppendFileTool::new(open_guard());

        tool.execute(args(&[("path", file.to_str().unwrap()), ("content", "one\n")]))
            .await
            .unwrap();
        tool.execute(args(&[("path", file.to_str().unwrap()), ("content", "two\n")]))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&file).unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn edit_replaces_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("edit.txt");
        std::fs::write(&file, "aaa bbb aaa").unwrap();

        let tool = EditFileTool::new(open_guard());
        let result = tool
            .execute(args(&[
                ("path", file.to_str().unwrap()),
                ("old_text", "aaa"),
                ("new_text", "ccc"),
            ]))
            .await
            .unwrap();
        assert!(result.contains("only the first occurrence"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "ccc bbb aaa");
    }

    #[tokio::test]
    async fn edit_missing_needle_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("edit.txt");
        std::fs::write(&file, "abc").unwrap();

        let tool = EditFileTool::new(open_guard());
        let result = tool
            .execute(args(&[
                ("path", file.to_str().unwrap()),
                ("old_text", "xyz"),
                ("new_text", "123"),
            ]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_dir_marks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let tool = ListDirTool::new(open_guard());
        let result = tool
            .execute(args(&[("path", dir.path().to_str().unwrap())]))
            .await
            .unwrap();
        assert!(result.contains("file.txt"));
        assert!(result.contains("sub/"));
    }

    #[tokio::test]
    async fn list_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ListDirTool::new(open_guard());
        let result = tool
            .execute(args(&[("path", dir.path().to_str().unwrap())]))
            .await
            .unwrap();
        assert_eq!(result, "(empty directory)");
    }

    #[test]
    fn tool_names_and_definitions() {
        let guard = open_guard();
        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(ReadFileTool::new(guard.clone())),
            Box::new(WriteFileTool::new(guard.clone())),
            Box::new(AppendFileTool::new(guard.clone())),
            Box::new(EditFileTool::new(guard.clone())),
            Box::new(ListDirTool::new(guard)),
        ];
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec!["read_file", "write_file", "append_file", "edit_file", "list_dir"]
        );
        for tool in &tools {
            assert_eq!(tool.definition().tool_type, "function");
        }
    }
}
