//! Tool trait and the registry the orchestration loop dispatches through.
//!
//! A registry is an explicit value built once at startup and shared as
//! `Arc<ToolRegistry>`. It knows nothing about per-run restrictions;
//! callers filter [`ToolRegistry::schemas`] themselves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::{ToolError, panic_message};
use crate::event::EventSink;
use crate::provider::ToolSchema;

/// Per-call execution context handed to every tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    events: Option<EventSink>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose tools may report progress on the run's stream.
    pub fn with_events(sink: EventSink) -> Self {
        Self { events: Some(sink) }
    }

    pub fn events(&self) -> Option<&EventSink> {
        self.events.as_ref()
    }
}

/// The core Tool trait.
///
/// Arguments are validated against [`Tool::parameters_schema`] by the
/// registry before `execute` runs.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "bash", "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with already-validated arguments.
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A tool result read back from its JSON text.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Parsed(Value),
    Raw(String),
}

impl ToolPayload {
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(value) => Self::Parsed(value),
            Err(_) => Self::Raw(text.to_string()),
        }
    }

    /// The `result` key when the payload is an object carrying one,
    /// otherwise the whole value.
    pub fn result_value(&self) -> Value {
        match self {
            Self::Parsed(Value::Object(map)) if map.contains_key("result") => map["result"].clone(),
            Self::Parsed(value) => value.clone(),
            Self::Raw(text) => Value::String(text.clone()),
        }
    }
}

/// Name → tool map.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. An existing name is rejected and the registry is
    /// left untouched.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "Duplicate tool registration rejected");
            return Err(ToolError::DuplicateName(name));
        }
        debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Every schema, sorted by tool name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.to_schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate and run a tool, returning its native result value.
    pub async fn execute_value(
        &self,
        name: &str,
        arguments: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        validate_arguments(&tool.parameters_schema(), &arguments)?;

        debug!(tool = name, "Executing tool");
        tool.execute(arguments, ctx).await.map_err(|err| match err {
            ToolError::ExecutionFailed { .. } => err,
            other => ToolError::failed(name, other.to_string()),
        })
    }

    /// Run a tool and serialize its result to canonical JSON text
    /// (object keys sorted, no insignificant whitespace).
    pub async fn execute(&self, name: &str, arguments: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let value = self.execute_value(name, arguments, ctx).await?;
        serde_json::to_string(&value).map_err(|e| ToolError::failed(name, e.to_string()))
    }

    /// Synchronous dispatch for callers on a plain OS thread.
    ///
    /// The call runs as a task on `runtime`, so a tool that panics yields
    /// `ExecutionFailed` instead of unwinding the calling thread.
    /// Panics if called from inside an async context, like
    /// [`Handle::block_on`].
    pub fn execute_blocking(
        self: &Arc<Self>,
        runtime: &Handle,
        name: &str,
        arguments: Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let registry = Arc::clone(self);
        let tool_name = name.to_string();
        let ctx = ctx.clone();
        let task = runtime.spawn(async move { registry.execute(&tool_name, arguments, &ctx).await });

        match runtime.block_on(task) {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                warn!(tool = name, panic = %message, "Tool panicked");
                Err(ToolError::failed(name, format!("Tool panicked: {message}")))
            }
            Err(e) => Err(ToolError::failed(name, e.to_string())),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check arguments against the schema subset tools declare:
/// `type: object`, `required`, and primitive property types.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Ok(());
    }
    let Some(args) = arguments.as_object() else {
        return Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {}",
            json_type_name(arguments)
        )));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(key) {
                return Err(ToolError::InvalidArguments(format!("missing required argument '{key}'")));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in args {
            let Some(expected) = properties.get(key).and_then(|p| p.get("type")).and_then(Value::as_str) else {
                continue;
            };
            if value.is_null() && !args_required(schema, key) {
                continue;
            }
            if !matches_type(expected, value) {
                return Err(ToolError::InvalidArguments(format!(
                    "argument '{key}' must be {expected}, got {}",
                    json_type_name(value)
                )));
            }
        }
    }
    Ok(())
}

fn args_required(schema: &Value, key: &str) -> bool {
    schema
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(|r| r.iter().any(|k| k.as_str() == Some(key)))
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
