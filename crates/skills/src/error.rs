use std::path::PathBuf;

use thiserror::Error;

/// Failure to find or parse a skill.
#[derive(Debug, Error)]
pub enum SkillError {
    #[error("Skill folder not found: {}", .0.display())]
    FolderNotFound(PathBuf),

    #[error("SKILL.md not found in: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Missing 'name' in frontmatter: {}", .0.display())]
    MissingName(PathBuf),

    #[error("Invalid frontmatter in {}: {reason}", .path.display())]
    InvalidFrontmatter { path: PathBuf, reason: String },

    #[error("Skill '{name}' not found. Available skills: [{}]", .available.join(", "))]
    NotFound { name: String, available: Vec<String> },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
