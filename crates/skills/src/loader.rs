use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::SkillError;
use crate::frontmatter::split_frontmatter;

/// File name of a skill definition inside its folder.
pub const SKILL_FILE: &str = "SKILL.md";

/// A parsed skill definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Tools the skill unlocks when invoked
    pub allowed_tools: Vec<String>,
    pub argument_hint: Option<String>,
    pub when_to_use: Option<String>,
    pub version: Option<String>,
    pub model: Option<String>,
    /// Template body with `{placeholder}` substitution points
    pub body: String,
    /// Path of the `SKILL.md` file
    pub path: PathBuf,
}

impl Skill {
    /// Folder containing the skill file.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// One line of the skill-selection listing shown to the model.
    pub fn selection_entry(&self) -> String {
        let args = self
            .argument_hint
            .as_deref()
            .map(|hint| format!("({hint})"))
            .unwrap_or_default();
        let when = self.when_to_use.as_deref().unwrap_or_default();
        format!("- {}{args}: {} {when}", self.name, self.description)
            .trim()
            .to_string()
    }
}

/// Reads skills from a directory of skill folders.
#[derive(Debug, Clone)]
pub struct SkillLoader {
    dir: PathBuf,
}

impl SkillLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load one skill by folder name.
    pub fn load(&self, name: &str) -> Result<Skill, SkillError> {
        let folder = self.dir.join(name);
        if !is_plain_name(name) || !folder.is_dir() {
            return Err(SkillError::FolderNotFound(folder));
        }

        let path = folder.join(SKILL_FILE);
        if !path.is_file() {
            return Err(SkillError::FileNotFound(folder));
        }

        let content = std::fs::read_to_string(&path).map_err(|source| SkillError::Io {
            path: path.clone(),
            source,
        })?;
        let (frontmatter, body) = split_frontmatter(&content).map_err(|reason| SkillError::InvalidFrontmatter {
            path: path.clone(),
            reason,
        })?;

        let Some(skill_name) = frontmatter.name.filter(|n| !n.trim().is_empty()) else {
            return Err(SkillError::MissingName(path));
        };

        debug!(skill = %skill_name, path = %path.display(), "Loaded skill");
        Ok(Skill {
            name: skill_name,
            description: frontmatter.description.unwrap_or_default(),
            allowed_tools: frontmatter.allowed_tools,
            argument_hint: frontmatter.argument_hint,
            when_to_use: frontmatter.when_to_use,
            version: frontmatter.version,
            model: frontmatter.model,
            body,
            path,
        })
    }

    /// Every loadable skill, sorted by folder name. Broken skills are
    /// logged and skipped.
    pub fn load_all(&self) -> Vec<Skill> {
        self.list_names()
            .into_iter()
            .filter_map(|name| match self.load(&name) {
                Ok(skill) => Some(skill),
                Err(e) => {
                    warn!(skill = %name, error = %e, "Skipping skill");
                    None
                }
            })
            .collect()
    }

    /// Folder names that contain a `SKILL.md`, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join(SKILL_FILE).is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
