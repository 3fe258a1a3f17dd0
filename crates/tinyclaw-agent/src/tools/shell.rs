//! `exec` — run a shell command in a subprocess.
//!
//! The command line passes through `SecurityGuard::check_command` and the
//! working directory (when supplied) through `check_working_dir` before the
//! child is spawned. The child is killed on timeout. Output is stdout and
//! stderr concatenated, trimmed, truncated when huge, with a trailing exit
//! code marker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::info;

use tinyclaw_core::security::SecurityGuard;

use super::base::{optional_i64, optional_string, require_string, Tool};

/// Output cap before truncation (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

/// Default timeout when the caller supplies none.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Shell command execution tool.
pub struct ExecTool {
    guard: Arc<SecurityGuard>,
    /// Default working directory (the workspace root).
    default_dir: PathBuf,
    default_timeout: Duration,
}

impl ExecTool {
    pub fn new(guard: Arc<SecurityGuard>, default_dir: PathBuf, timeout_secs: Option<u64>) -> Self {
        Self {
            guard,
            default_dir,
            default_timeout: Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. \
         Use for builds, git, and any other CLI work."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory (defaults to the workspace root)"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Kill the command after this many milliseconds"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let command = require_string(&args, "command")?;

        let verdict = self.guard.check_command(&command);
        if let Some(reason) = verdict.reason() {
            return Ok(reason.to_string());
        }

        let cwd = match optional_string(&args, "working_dir") {
            Some(dir) => {
                let verdict = self.guard.check_working_dir(&dir);
                if let Some(reason) = verdict.reason() {
                    return Ok(reason.to_string());
                }
                PathBuf::from(dir)
            }
            None => self.default_dir.clone(),
        };

        let timeout = optional_i64(&args, "timeout_ms")
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(self.default_timeout);

        info!(command = %command, cwd = %cwd.display(), "exec");

        // kill_on_drop: when the timeout drops the wait future, the child
        // process goes with it.
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn command: {e}"))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| anyhow::anyhow!("command failed: {e}"))?,
            Err(_) => {
                return Ok(format!(
                    "Command timed out after {} ms and was killed",
                    timeout.as_millis()
                ));
            }
        };

        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut combined = String::new();
        if !stdout.trim().is_empty() {
            combined.push_str(stdout.trim());
        }
        if !stderr.trim().is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str("STDERR:\n");
            combined.push_str(stderr.trim());
        }
        if combined.len() > MAX_OUTPUT_LEN {
            let dropped = combined.len() - MAX_OUTPUT_LEN;
            combined.truncate(MAX_OUTPUT_LEN);
            combined.push_str(&format!("\n... (truncated, {dropped} more chars)"));
        }
        if combined.is_empty() {
            combined.push_str("(no output)");
        }
        combined.push_str(&format!("\n(exit code {code})"));
        Ok(combined)
    }
}

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

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn make_tool(dir: &std::path::Path) -> ExecTool {
        ExecTool::new(open_guard(), dir.to_path_buf(), Some(10))
    }

    #[tokio::test]
    async fn echo_captures_stdout_and_exit_marker() {
        let dir = tempfile::tempdir().unwrap();
        let tool = make_tool(dir.path());
        let out = tool
            .execute(args(&[("command", json!("echo hello"))]))
            .await
            .unwrap();
        assert!(out.contains("hello"));
        assert!(out.trim_end().ends_with("(exit code 0)"));
    }

    #[tokio::test]
    async fn nonzero_exit_code_reported() {
        let dir = tempfile::tempdir().unwrap();
        let tool = make_tool(dir.path());
        let out = tool
            .execute(args(&[("command", json!("exit 42"))]))
            .await
            .unwrap();
        assert!(out.contains("(exit code 42)"));
    }

    #[tokio::test]
    async fn stderr_captured() {
        let dir = tempfile::tempdir().unwrap();
        let tool = make_tool(dir.path());
        let out = tool
            .execute(args(&[("command", json!("echo oops >&2"))]))
            .await
            .unwrap();
        assert!(out.contains("STDERR:"));
        assert!(out.contains("oops"));
    }

    #[tokio::test]
    async fn blacklisted_command_denied_as_data() {
        let dir = tempfile::tempdir().unwrap();
        let tool = make_tool(dir.path());
        let out = tool
            .execute(args(&[("command", json!("sudo rm -rf /"))]))
            .await
            .unwrap();
        assert!(out.starts_with("Command blocked"));
    }

    #[tokio::test]
    async fn working_dir_outside_workspace_denied() {
        let outer = tempfile::tempdir().unwrap();
        let ws = outer.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        let guard = Arc::new(SecurityGuard::new(SecurityPolicy {
            workspace_root: ws.clone(),
            restrict_to_workspace: true,
            command_blacklist: Vec::new(),
        }));
        let tool = ExecTool::new(guard, ws, Some(10));

        let out = tool
            .execute(args(&[
                ("command", json!("ls")),
                ("working_dir", json!(outer.path().to_str().unwrap())),
            ]))
            .await
            .unwrap();
        assert!(out.starts_with("Access denied"));
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let tool = make_tool(dir.path());
        let out = tool
            .execute(args(&[
                ("command", json!("sleep 30")),
                ("timeout_ms", json!(200)),
            ]))
            .await
            .unwrap();
        assert!(out.contains("timed out"));
    }

    #[tokio::test]
    async fn runs_in_default_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let tool = make_tool(dir.path());
        let out = tool
            .execute(args(&[("command", json!("ls"))]))
            .await
            .unwrap();
        assert!(out.contains("marker.txt"));
    }

    #[test]
    fn definition_shape() {
        let dir = tempfile::tempdir().unwrap();
        let tool = make_tool(dir.path());
        let def = tool.definition();
        assert_eq!(def.function.name, "exec");
        assert_eq!(def.tool_type, "function");
    }
}
