//! `skillrun tools`: Print the exported tool schemas.

use skillrun_config::AppConfig;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    let tools = super::build_tools(config)?;
    let schemas: Vec<serde_json::Value> = tools
        .schemas()
        .iter()
        .filter(|s| config.tools.allowed_tools.contains(&s.name))
        .map(|s| s.to_openai())
        .collect();

    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}
