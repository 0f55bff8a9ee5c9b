//! Bash tool: execute shell commands.
//!
//! Supports command allowlisting, workspace scoping, and timeout.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use skillrun_core::error::ToolError;
use skillrun_core::tool::{Tool, ToolContext};
use tokio::process::Command;
use tracing::{debug, warn};

/// Execute shell commands with safety constraints.
pub struct BashTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
    workspace_dir: PathBuf,
    default_timeout_secs: u64,
}

impl BashTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self {
            allowed_commands,
            workspace_dir: PathBuf::from("."),
            default_timeout_secs: 60,
        }
    }

    pub fn with_workspace(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }

        let base_cmd = command.split_whitespace().next().unwrap_or("").trim();
        self.allowed_commands.iter().any(|a| a == base_cmd)
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command in the current shell environment and return the result"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "description": {
                    "type": "string",
                    "description": "Brief description of what this command does (optional)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 60)",
                    "default": 60
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let command = arguments["command"].as_str().unwrap_or_default();
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("Command cannot be empty".into()));
        }

        if !self.is_command_allowed(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: self.name().into(),
                reason: format!(
                    "Command '{}' not in allowlist",
                    command.split_whitespace().next().unwrap_or("")
                ),
            });
        }

        let timeout_secs = arguments["timeout"].as_u64().unwrap_or(self.default_timeout_secs);
        debug!(command = %command, timeout_secs, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.workspace_dir).kill_on_drop(true);

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
            Ok(result) => result.map_err(|e| ToolError::failed(self.name(), format!("Failed to execute command: {e}")))?,
            Err(_) => {
                warn!(command = %command, timeout_secs, "Command timed out");
                return Err(ToolError::Timeout {
                    tool_name: self.name().into(),
                    timeout_secs,
                });
            }
        };

        let return_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            warn!(command = %command, exit_code = return_code, "Command failed");
        }

        Ok(json!({
            "success": output.status.success(),
            "command": command,
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "return_code": return_code,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_check() {
        let tool = BashTool::new(vec!["ls".into(), "cat".into(), "git".into()]);
        assert!(tool.is_command_allowed("ls -la"));
        assert!(tool.is_command_allowed("git status"));
        assert!(!tool.is_command_allowed("rm -rf /"));
        assert!(!tool.is_command_allowed("sudo something"));
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let tool = BashTool::new(vec![]);
        assert!(tool.is_command_allowed("anything goes"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_echo() {
        let result = BashTool::new(vec![])
            .execute(json!({"command": "echo hello"}), &ToolContext::new())
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["stdout"], "hello\n");
        assert_eq!(result["return_code"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_a_result_not_an_error() {
        let result = BashTool::new(vec![])
            .execute(json!({"command": "echo oops >&2; exit 3"}), &ToolContext::new())
            .await
            .unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(result["stderr"], "oops\n");
        assert_eq!(result["return_code"], 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let result = BashTool::new(vec![])
            .with_workspace(dir.path())
            .execute(json!({"command": "ls"}), &ToolContext::new())
            .await
            .unwrap();
        assert!(result["stdout"].as_str().unwrap().contains("marker.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_is_reported() {
        let err = BashTool::new(vec![])
            .execute(json!({"command": "sleep 5", "timeout": 1}), &ToolContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Timeout {
                tool_name: "bash".into(),
                timeout_secs: 1
            }
        );
    }

    #[tokio::test]
    async fn blocked_command() {
        let result = BashTool::new(vec!["ls".into()])
            .execute(json!({"command": "rm -rf /"}), &ToolContext::new())
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }
}
