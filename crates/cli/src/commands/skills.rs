//! `skillrun skills`: List the skills found in the skills directory.

use skillrun_config::AppConfig;
use skillrun_skills::SkillLoader;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    let loader = SkillLoader::new(&config.skills.dir);
    let skills = loader.load_all();

    if skills.is_empty() {
        println!("No skills found in {}", loader.dir().display());
        return Ok(());
    }

    println!("Skills in {}:", loader.dir().display());
    for skill in skills {
        println!();
        println!("  {}", skill.name);
        if !skill.description.is_empty() {
            println!("    {}", skill.description);
        }
        if let Some(hint) = &skill.argument_hint {
            println!("    args:  {hint}");
        }
        if !skill.allowed_tools.is_empty() {
            println!("    tools: {}", skill.allowed_tools.join(", "));
        }
    }
    Ok(())
}
