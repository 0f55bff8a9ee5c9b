//! Subcommand implementations and the wiring they share.

pub mod chat;
pub mod serve;
pub mod skills;
pub mod tools;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use skillrun_agent::AgentLoop;
use skillrun_config::AppConfig;
use skillrun_core::tool::ToolRegistry;
use tracing::info;

pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.context("Failed to load config")
}

pub fn build_tools(config: &AppConfig) -> anyhow::Result<Arc<ToolRegistry>> {
    skillrun_tools::registry_from_config(config).context("Failed to build tool registry")
}

/// Provider, registry and loop, wired from one config.
pub fn build_agent(config: &AppConfig) -> anyhow::Result<Arc<AgentLoop>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  WARNING: No API key configured for '{}'.", config.llm_provider);
        eprintln!("  Set SKILLRUN_API_KEY or add api_key to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
    }

    let provider = skillrun_providers::build_from_config(config).context("Failed to build provider")?;
    let tools = build_tools(config)?;
    info!(
        provider = %config.llm_provider,
        model = %config.active_model().model,
        tools = tools.len(),
        "Agent ready"
    );
    Ok(Arc::new(AgentLoop::from_config(provider, tools, config)))
}
