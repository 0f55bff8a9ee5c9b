//! `skillrun serve`: Start the HTTP API server.

use std::sync::Arc;

use anyhow::anyhow;
use skillrun_config::AppConfig;
use skillrun_gateway::GatewayState;

pub async fn run(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let agent = super::build_agent(&config)?;
    let tool_count = agent.tools().len();
    let state = Arc::new(GatewayState::from_config(&config, agent)?);

    println!("skillrun gateway");
    println!("   Listening: http://{}:{}", config.server.host, config.server.port);
    println!("   Provider:  {} ({})", config.llm_provider, config.active_model().model);
    println!("   Tools:     {tool_count} registered");

    skillrun_gateway::start(state, &config.server.host, config.server.port)
        .await
        .map_err(|e| anyhow!("Gateway failed: {e}"))
}
