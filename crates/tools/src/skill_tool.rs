//! Skill tool: render a skill template and report the tools it unlocks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use skillrun_core::error::ToolError;
use skillrun_core::tool::{Tool, ToolContext};
use skillrun_skills::{SkillError, SkillExecutor};

pub const SKILL_TOOL_NAME: &str = "skill";

pub struct SkillTool {
    executor: Arc<SkillExecutor>,
    description: String,
}

impl SkillTool {
    /// The description lists every skill loadable at construction time.
    pub fn new(executor: Arc<SkillExecutor>) -> Self {
        let entries: Vec<String> = executor
            .loader()
            .load_all()
            .iter()
            .map(|skill| skill.selection_entry())
            .collect();
        let description = build_description(&entries.join("\n"));
        Self { executor, description }
    }
}

fn build_description(available_skills: &str) -> String {
    format!(
        r#"Execute a skill within the main conversation

<skills_instructions>
When users ask you to perform tasks, check if any of the available skills below can help complete the task more effectively.

How to invoke:
- Use this tool with skill name and optional arguments
- Examples:
  - skill_name: "pdf" - invoke pdf skill
  - skill_name: "review", args: {{"path": "src/lib.rs"}} - invoke with arguments

Important:
- When a skill is relevant, you MUST invoke this tool IMMEDIATELY as your first action
- NEVER just announce or mention a skill without actually calling it
</skills_instructions>

<available_skills>
{available_skills}
</available_skills>"#
    )
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        SKILL_TOOL_NAME
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "skill_name": {
                    "type": "string",
                    "description": "Name of the skill to execute (e.g., 'pdf', 'my-skill')"
                },
                "args": {
                    "type": "object",
                    "description": "Arguments for the skill"
                }
            },
            "required": ["skill_name"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let skill_name = arguments["skill_name"].as_str().unwrap_or_default();
        if skill_name.is_empty() {
            return Err(ToolError::InvalidArguments("skill_name parameter is required".into()));
        }
        let args = arguments["args"].as_object().cloned().unwrap_or_default();

        let activation = self.executor.execute(skill_name, &args).map_err(|e| {
            let reason = match e {
                SkillError::NotFound { .. } => e.to_string(),
                other => format!("Skill '{skill_name}' error: {other}"),
            };
            ToolError::failed(SKILL_TOOL_NAME, reason)
        })?;

        serde_json::to_value(activation).map_err(|e| ToolError::failed(SKILL_TOOL_NAME, e.to_string()))
    }
}
