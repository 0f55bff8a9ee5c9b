//! Skill rendering with a name-keyed cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock, RwLock};

use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::SkillError;
use crate::loader::{Skill, SkillLoader};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// Key under which the skill's folder is offered to templates.
pub const SKILL_DIR_KEY: &str = "skill_dir";

/// What invoking a skill hands back to the orchestration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillActivation {
    pub skill_name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Rendered body, injected into the conversation as a user message
    pub content: String,
    /// Tools to add to the run's allowed set
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

/// Loads skills on demand, caches them by name, and renders templates.
pub struct SkillExecutor {
    loader: SkillLoader,
    metadata: BTreeMap<String, String>,
    cache: RwLock<HashMap<String, Arc<Skill>>>,
}

impl SkillExecutor {
    /// `metadata` supplies the lowest-precedence placeholder values.
    pub fn new(loader: SkillLoader, metadata: BTreeMap<String, String>) -> Self {
        Self {
            loader,
            metadata,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn loader(&self) -> &SkillLoader {
        &self.loader
    }

    /// Fetch a skill, loading it on first use.
    pub fn skill(&self, name: &str) -> Result<Arc<Skill>, SkillError> {
        if let Some(skill) = self.cache.read().ok().and_then(|c| c.get(name).cloned()) {
            return Ok(skill);
        }

        let skill = match self.loader.load(name) {
            Ok(skill) => Arc::new(skill),
            Err(SkillError::FolderNotFound(_)) => {
                return Err(SkillError::NotFound {
                    name: name.to_string(),
                    available: self.loader.list_names(),
                });
            }
            Err(e) => return Err(e),
        };

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(name.to_string(), Arc::clone(&skill));
        }
        Ok(skill)
    }

    /// Render a skill with the caller's arguments.
    pub fn execute(&self, name: &str, args: &Map<String, Value>) -> Result<SkillActivation, SkillError> {
        let skill = self.skill(name)?;
        let content = self.render(&skill, args);
        debug!(skill = %skill.name, tools = ?skill.allowed_tools, "Rendered skill");

        Ok(SkillActivation {
            skill_name: name.to_string(),
            args: args.clone(),
            content,
            allowed_tools: skill.allowed_tools.clone(),
        })
    }

    /// Substitute `{key}` placeholders. Precedence, lowest first: configured
    /// metadata, `skill_dir`, caller args. Unknown keys stay verbatim.
    pub fn render(&self, skill: &Skill, args: &Map<String, Value>) -> String {
        let skill_dir = skill.dir().display().to_string();

        let mut values: HashMap<&str, String> = self
            .metadata
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        values.insert(SKILL_DIR_KEY, skill_dir.clone());
        for (key, value) in args {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            values.insert(key.as_str(), text);
        }

        let mut unresolved = Vec::new();
        let body = PLACEHOLDER.replace_all(&skill.body, |caps: &Captures<'_>| {
            let key = &caps[1];
            match values.get(key) {
                Some(value) => value.clone(),
                None => {
                    unresolved.push(key.to_string());
                    caps[0].to_string()
                }
            }
        });

        if !unresolved.is_empty() {
            warn!(skill = %skill.name, placeholders = ?unresolved, "Skill template left placeholders unexpanded");
        }

        format!("Base directory: {skill_dir}\n{body}")
    }

    /// Forget every cached skill.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::SKILL_FILE;
    use serde_json::json;
    use std::path::Path;

    fn write_skill(root: &Path, folder: &str, content: &str) {
        let dir = root.join(folder);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(SKILL_FILE), content).unwrap();
    }

    fn executor(root: &Path) -> SkillExecutor {
        let mut metadata = BTreeMap::new();
        metadata.insert("team".to_string(), "platform".to_string());
        metadata.insert("city".to_string(), "Paris".to_string());
        SkillExecutor::new(SkillLoader::new(root), metadata)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn renders_with_precedence_and_base_directory() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(
            tmp.path(),
            "weather",
            "---\nname: weather\nallowed-tools: [http]\n---\n{team} asks about {city} from {skill_dir} ({days} days, {unknown})",
        );
        let exec = executor(tmp.path());

        let activation = exec.execute("weather", &args(json!({"city": "Oslo", "days": 3}))).unwrap();
        let dir = tmp.path().join("weather").display().to_string();

        assert_eq!(
            activation.content,
            format!("Base directory: {dir}\nplatform asks about Oslo from {dir} (3 days, {{unknown}})")
        );
        assert_eq!(activation.allowed_tools, vec!["http"]);
        assert_eq!(activation.skill_name, "weather");
        assert_eq!(activation.args["days"], 3);
    }

    #[test]
    fn unknown_skill_lists_available() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "alpha", "---\nname: alpha\n---\na");
        write_skill(tmp.path(), "beta", "---\nname: beta\n---\nb");

        let err = executor(tmp.path()).execute("gamma", &Map::new()).unwrap_err();
        match &err {
            SkillError::NotFound { name, available } => {
                assert_eq!(name, "gamma");
                assert_eq!(available, &vec!["alpha".to_string(), "beta".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("Available skills: [alpha, beta]"));
    }

    #[test]
    fn skills_are_cached_until_cleared() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "memo", "---\nname: memo\n---\nfirst");
        let exec = executor(tmp.path());

        assert!(exec.execute("memo", &Map::new()).unwrap().content.ends_with("first"));
        write_skill(tmp.path(), "memo", "---\nname: memo\n---\nsecond");
        assert!(exec.execute("memo", &Map::new()).unwrap().content.ends_with("first"));
        assert_eq!(exec.cached_len(), 1);

        exec.clear_cache();
        assert_eq!(exec.cached_len(), 0);
        assert!(exec.execute("memo", &Map::new()).unwrap().content.ends_with("second"));
    }

    #[test]
    fn activation_roundtrips_through_json() {
        let activation = SkillActivation {
            skill_name: "s".into(),
            args: Map::new(),
            content: "body".into(),
            allowed_tools: vec!["bash".into()],
        };
        let value = serde_json::to_value(&activation).unwrap();
        let back: SkillActivation = serde_json::from_value(value).unwrap();
        assert_eq!(back, activation);
    }
}
