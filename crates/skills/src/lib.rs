//! Skills: named, templated instruction fragments stored on disk.
//!
//! A skill lives at `<skills_dir>/<name>/SKILL.md`: a `---` delimited YAML
//! header followed by a template body with `{placeholder}` substitution
//! points. Invoking a skill renders the body and reports which extra tools
//! the skill needs.

pub mod error;
pub mod executor;
pub mod frontmatter;
pub mod loader;

pub use error::SkillError;
pub use executor::{SkillActivation, SkillExecutor};
pub use frontmatter::{SkillFrontmatter, split_frontmatter};
pub use loader::{SKILL_FILE, Skill, SkillLoader};
