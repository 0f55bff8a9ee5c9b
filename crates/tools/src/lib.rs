//! Built-in tool implementations for skillrun.
//!
//! Tools give the model the ability to interact with the world: run shell
//! commands, read files, send HTTP requests, do math, tell the time,
//! activate skills, and run JavaScript that can call the other tools.

pub mod calculator;
pub mod datetime;
pub mod file_read;
pub mod http_request;
pub mod script;
pub mod shell;
pub mod skill_tool;

use std::sync::{Arc, Weak};

use chrono_tz::Tz;
use skillrun_config::{AppConfig, ToolsConfig};
use skillrun_core::error::{Error, ToolError};
use skillrun_core::tool::ToolRegistry;
use skillrun_skills::{SkillExecutor, SkillLoader};

pub use calculator::CalculatorTool;
pub use datetime::DateTimeTool;
pub use file_read::ReadFileTool;
pub use http_request::HttpTool;
pub use script::{JavaScriptTool, SCRIPT_TOOL_NAME};
pub use shell::BashTool;
pub use skill_tool::{SKILL_TOOL_NAME, SkillTool};

/// Build the registry holding every built-in tool.
///
/// The registry is created cyclically so the JavaScript tool can hold a
/// weak handle back to it for `callTool`.
pub fn default_registry(
    config: &ToolsConfig,
    skills: Arc<SkillExecutor>,
    timezone: Tz,
) -> Result<Arc<ToolRegistry>, ToolError> {
    let mut failure = None;
    let registry = Arc::new_cyclic(|weak: &Weak<ToolRegistry>| {
        match populate(config, skills, timezone, weak.clone()) {
            Ok(registry) => registry,
            Err(e) => {
                failure = Some(e);
                ToolRegistry::new()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(registry),
    }
}

/// Build the registry described by a whole application config: skills
/// from `[skills]`, the configured timezone for `get_datetime`.
pub fn registry_from_config(config: &AppConfig) -> Result<Arc<ToolRegistry>, Error> {
    let timezone = config.timezone().map_err(|e| Error::Config { message: e.to_string() })?;
    let skills = SkillExecutor::new(SkillLoader::new(&config.skills.dir), config.skills.metadata.clone());
    Ok(default_registry(&config.tools, Arc::new(skills), timezone)?)
}

fn populate(
    config: &ToolsConfig,
    skills: Arc<SkillExecutor>,
    timezone: Tz,
    this: Weak<ToolRegistry>,
) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(DateTimeTool::new(timezone)))?;
    registry.register(Box::new(CalculatorTool))?;
    registry.register(Box::new(ReadFileTool::new(&config.workspace_dir)))?;
    registry.register(Box::new(
        BashTool::new(config.shell_allowlist.clone())
            .with_workspace(&config.workspace_dir)
            .with_timeout(config.shell_timeout_secs),
    ))?;
    registry.register(Box::new(HttpTool::new(config.http_timeout_secs)?))?;
    registry.register(Box::new(SkillTool::new(skills)))?;
    registry.register(Box::new(JavaScriptTool::new(this, config.script_loop_limit)))?;
    Ok(registry)
}
