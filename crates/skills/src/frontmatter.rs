//! `---` delimited YAML header parsing.

use serde::{Deserialize, Deserializer, Serialize};

/// Header fields of a `SKILL.md` file.
///
/// `name` is optional here so the loader can report a missing name with
/// the file path instead of a YAML error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillFrontmatter {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// A YAML list or a comma-separated string
    #[serde(default, rename = "allowed-tools", deserialize_with = "tool_list")]
    pub allowed_tools: Vec<String>,

    #[serde(default, rename = "argument-hint", deserialize_with = "scalar_string")]
    pub argument_hint: Option<String>,

    #[serde(default, deserialize_with = "scalar_string")]
    pub when_to_use: Option<String>,

    #[serde(default, deserialize_with = "scalar_string")]
    pub version: Option<String>,

    #[serde(default)]
    pub model: Option<String>,
}

/// Split a document into its header and trimmed body.
///
/// Content without a complete `---` pair has an empty header. A header that
/// is valid YAML but not a mapping is treated the same way.
pub fn split_frontmatter(content: &str) -> Result<(SkillFrontmatter, String), String> {
    let lines: Vec<&str> = content.lines().collect();
    let mut start = None;
    let mut end = None;
    for (i, line) in lines.iter().enumerate() {
        if line.trim() == "---" {
            if start.is_none() {
                start = Some(i);
            } else {
                end = Some(i);
                break;
            }
        }
    }

    let (start, end) = match (start, end) {
        (Some(s), Some(e)) => (s, e),
        _ => return Ok((SkillFrontmatter::default(), content.trim().to_string())),
    };

    let yaml = lines[start + 1..end].join("\n");
    let body = lines[end + 1..].join("\n").trim().to_string();

    let value: serde_yaml::Value =
        serde_yaml::from_str(&yaml).map_err(|e| format!("Invalid YAML frontmatter: {e}"))?;
    if !value.is_mapping() {
        return Ok((SkillFrontmatter::default(), body));
    }
    let frontmatter: SkillFrontmatter =
        serde_yaml::from_value(value).map_err(|e| format!("Invalid YAML frontmatter: {e}"))?;
    Ok((frontmatter, body))
}

fn tool_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ToolList {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match Option::<ToolList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(ToolList::List(tools)) => tools,
        Some(ToolList::Csv(text)) => text
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
    })
}

fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected a scalar, got {other:?}"))),
    }
}
