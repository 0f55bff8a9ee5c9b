//! File read tool: read UTF-8 files below the workspace directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};
use skillrun_core::error::ToolError;
use skillrun_core::tool::{Tool, ToolContext};

pub struct ReadFileTool {
    /// Relative paths are resolved against this directory.
    workspace_dir: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
        }
    }

    fn resolve(&self, file_path: &str) -> Result<PathBuf, ToolError> {
        let path = Path::new(file_path);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if file_path.contains("..") || escapes {
            return Err(ToolError::PermissionDenied {
                tool_name: self.name().into(),
                reason: format!("Invalid file path: {file_path}"),
            });
        }
        Ok(self.workspace_dir.join(path))
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new(".")
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a local file. Provide the file path relative to the workspace root. \
         Returns the file content, line count, and metadata."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to read, relative to the workspace root (e.g., 'config.toml' or 'src/main.rs')"
                },
                "encoding": {
                    "type": "string",
                    "description": "File encoding (only utf-8 is supported)",
                    "default": "utf-8"
                },
                "max_lines": {
                    "type": "integer",
                    "description": "Maximum number of lines to read (0 for all lines)",
                    "default": 0
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let file_path = arguments["file_path"].as_str().unwrap_or_default();
        if file_path.is_empty() {
            return Err(ToolError::InvalidArguments("file_path parameter is required".into()));
        }

        let encoding = arguments["encoding"].as_str().unwrap_or("utf-8");
        if !matches!(encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
            return Err(ToolError::InvalidArguments(format!("Unsupported encoding: {encoding}")));
        }
        let max_lines = arguments["max_lines"].as_u64().unwrap_or(0) as usize;

        let full_path = self.resolve(file_path)?;
        let metadata = tokio::fs::metadata(&full_path)
            .await
            .map_err(|_| ToolError::failed(self.name(), format!("File not found: {file_path}")))?;
        if !metadata.is_file() {
            return Err(ToolError::failed(self.name(), format!("Path is not a file: {file_path}")));
        }

        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| ToolError::failed(self.name(), format!("Failed to read file: {e}")))?;
        let text = String::from_utf8(bytes).map_err(|_| {
            ToolError::failed(
                self.name(),
                format!("File cannot be decoded with encoding '{encoding}'"),
            )
        })?;

        let content = if max_lines > 0 {
            text.lines().take(max_lines).collect::<Vec<_>>().join("\n")
        } else {
            text
        };
        let line_count = content.matches('\n').count()
            + usize::from(!content.is_empty() && !content.ends_with('\n'));

        Ok(json!({
            "file_path": file_path,
            "content": content,
            "encoding": encoding,
            "line_count": line_count,
            "size_bytes": metadata.len(),
            "success": true,
        }))
    }
}
