//! Configuration loading and validation for skillrun.
//!
//! Loads configuration from `~/.skillrun/config.toml` (or an explicit path)
//! with environment variable overrides. Every field has a default, so an
//! empty or missing file yields a working configuration.

use serde::{Deserialize, Serialize};
use skillrun_core::{ProviderKind, SystemMetadata};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.skillrun/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which model section drives the chat loop: "openai" or "qwen"
    #[serde(default = "default_provider")]
    pub llm_provider: String,

    /// IANA timezone used to render `{time}`
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "ModelConfig::openai")]
    pub openai: ModelConfig,

    #[serde(default = "ModelConfig::qwen")]
    pub qwen: ModelConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub skills: SkillsConfig,

    /// Rendered into the system message as `- key: value` lines
    #[serde(default)]
    pub system_metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cli: CliConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_timezone() -> String {
    "UTC".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &str) -> &'static str {
    if s.is_empty() { "None" } else { "[REDACTED]" }
}

/// One chat-completion endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_system_message")]
    pub system_message: String,

    /// Route `complete_auto` through the streaming endpoint
    #[serde(default)]
    pub use_stream: bool,

    /// Qwen only: ask for a reasoning channel
    #[serde(default)]
    pub enable_thinking: bool,

    /// Qwen only: reasoning token budget, 0 leaves it to the server
    #[serde(default)]
    pub thinking_budget: u32,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_system_message() -> String {
    "You are a helpful assistant. Use the available tools when they help answer the request. \
     Current time: {time}"
        .into()
}

impl ModelConfig {
    fn openai() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_message: default_system_message(),
            use_stream: false,
            enable_thinking: false,
            thinking_budget: 0,
        }
    }

    fn qwen() -> Self {
        Self {
            api_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
            model: "qwen-plus".into(),
            use_stream: true,
            ..Self::openai()
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::openai()
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("use_stream", &self.use_stream)
            .field("enable_thinking", &self.enable_thinking)
            .field("thinking_budget", &self.thinking_budget)
            .finish()
    }
}

/// Tool availability and built-in tool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Initial allowed-tool set of every turn
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,

    /// Iteration cap of one turn
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,

    /// Render tool events in the CLI
    #[serde(default = "default_true")]
    pub show_tool_calls: bool,

    /// Root for `read_file` and the working directory of `bash`
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    /// First words `bash` may run; empty allows any command
    #[serde(default)]
    pub shell_allowlist: Vec<String>,

    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Loop iterations a single script may run
    #[serde(default = "default_script_loop_limit")]
    pub script_loop_limit: u64,
}

fn default_allowed_tools() -> Vec<String> {
    ["get_datetime", "calculate", "read_file", "bash", "skill", "javascript"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_max_tool_calls() -> u32 {
    10
}
fn default_workspace_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_shell_timeout() -> u64 {
    60
}
fn default_http_timeout() -> u64 {
    30
}
fn default_script_loop_limit() -> u64 {
    1_000_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_tools: default_allowed_tools(),
            max_tool_calls: default_max_tool_calls(),
            show_tool_calls: true,
            workspace_dir: default_workspace_dir(),
            shell_allowlist: Vec::new(),
            shell_timeout_secs: default_shell_timeout(),
            http_timeout_secs: default_http_timeout(),
            script_loop_limit: default_script_loop_limit(),
        }
    }
}

/// Where skills live and the lowest-precedence placeholder values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    #[serde(default = "default_skills_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_skills_dir() -> PathBuf {
    PathBuf::from("skills")
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            dir: default_skills_dir(),
            metadata: BTreeMap::new(),
        }
    }
}

/// HTTP gateway and event bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Capacity of each run's event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How long the stream consumer waits before sending a keep-alive
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Give up on a silent worker after this long; 0 waits forever
    #[serde(default)]
    pub stall_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_channel_capacity() -> usize {
    128
}
fn default_poll_interval() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            channel_capacity: default_channel_capacity(),
            poll_interval_ms: default_poll_interval(),
            stall_timeout_secs: 0,
        }
    }
}

/// Terminal chat rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_user_prefix")]
    pub user_prefix: String,

    #[serde(default = "default_ai_prefix")]
    pub ai_prefix: String,

    #[serde(default = "default_exit_command")]
    pub exit_command: String,
}

fn default_user_prefix() -> String {
    "You: ".into()
}
fn default_ai_prefix() -> String {
    "AI: ".into()
}
fn default_exit_command() -> String {
    "exit".into()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            user_prefix: default_user_prefix(),
            ai_prefix: default_ai_prefix(),
            exit_command: default_exit_command(),
        }
    }
}

impl AppConfig {
    /// Load from `SKILLRUN_CONFIG` or `~/.skillrun/config.toml`, then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SKILLRUN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        Self::load_with_env(&path)
    }

    /// Load a specific file, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if let Ok(provider) = std::env::var("SKILLRUN_PROVIDER") {
            config.llm_provider = provider;
        }

        let kind = config.provider_kind()?;
        let fallback_key = match kind {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Qwen => "DASHSCOPE_API_KEY",
        };
        let model = config.active_model_mut();
        if let Ok(key) = std::env::var("SKILLRUN_API_KEY").or_else(|_| std::env::var(fallback_key)) {
            if model.api_key.is_empty() {
                model.api_key = key;
            }
        }
        if let Ok(name) = std::env::var("SKILLRUN_MODEL") {
            model.model = name;
        }
        if let Ok(url) = std::env::var("SKILLRUN_API_URL") {
            model.api_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".skillrun")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider_kind()?;
        self.timezone()?;

        let model = self.active_model();
        if model.temperature < 0.0 || model.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.tools.max_tool_calls == 0 {
            return Err(ConfigError::ValidationError("tools.max_tool_calls must be > 0".into()));
        }
        if self.server.channel_capacity == 0 {
            return Err(ConfigError::ValidationError("server.channel_capacity must be > 0".into()));
        }
        if self.server.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError("server.poll_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
        ProviderKind::parse(&self.llm_provider).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "unknown llm_provider '{}', expected 'openai' or 'qwen'",
                self.llm_provider
            ))
        })
    }

    pub fn timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::ValidationError(format!("unknown timezone '{}'", self.timezone)))
    }

    /// The model section selected by `llm_provider`.
    pub fn active_model(&self) -> &ModelConfig {
        match ProviderKind::parse(&self.llm_provider) {
            Some(ProviderKind::Qwen) => &self.qwen,
            _ => &self.openai,
        }
    }

    fn active_model_mut(&mut self) -> &mut ModelConfig {
        match ProviderKind::parse(&self.llm_provider) {
            Some(ProviderKind::Qwen) => &mut self.qwen,
            _ => &mut self.openai,
        }
    }

    pub fn system_metadata(&self) -> Result<SystemMetadata, ConfigError> {
        Ok(SystemMetadata::new(self.system_metadata.clone(), self.timezone()?))
    }

    pub fn has_api_key(&self) -> bool {
        !self.active_model().api_key.is_empty()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_provider: default_provider(),
            timezone: default_timezone(),
            openai: ModelConfig::openai(),
            qwen: ModelConfig::qwen(),
            tools: ToolsConfig::default(),
            skills: SkillsConfig::default(),
            system_metadata: BTreeMap::new(),
            server: ServerConfig::default(),
            cli: CliConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm_provider, "openai");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.tools.max_tool_calls, 10);
        assert!(config.tools.allowed_tools.contains(&"javascript".to_string()));
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = AppConfig::default_toml();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.openai.model, "gpt-4o-mini");
        assert_eq!(parsed.qwen.model, "qwen-plus");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            llm_provider = "qwen"
            timezone = "Asia/Shanghai"

            [qwen]
            api_key = "sk-test"
            enable_thinking = true

            [tools]
            allowed_tools = ["calculate"]

            [system_metadata]
            owner = "ops"
            "#,
        )
        .unwrap();

        assert_eq!(config.provider_kind().unwrap(), ProviderKind::Qwen);
        assert!(config.active_model().enable_thinking);
        assert!(config.active_model().use_stream);
        assert_eq!(config.tools.max_tool_calls, 10);
        assert_eq!(config.tools.allowed_tools, vec!["calculate"]);
        assert!(config.has_api_key());

        let meta = config.system_metadata().unwrap();
        assert_eq!(meta.timezone, chrono_tz::Asia::Shanghai);
        assert_eq!(meta.entries.get("owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(AppConfig::from_toml("llm_provider = \"mystery\"").is_err());
        assert!(AppConfig::from_toml("timezone = \"Mars/Olympus\"").is_err());
        assert!(AppConfig::from_toml("[tools]\nmax_tool_calls = 0").is_err());
        assert!(AppConfig::from_toml("[openai]\ntemperature = 5.0").is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.cli.exit_command, "exit");
    }

    #[test]
    fn parse_error_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.openai.api_key = "sk-secret".into();
        let printed = format!("{config:?}");
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("[REDACTED]"));
    }
}
