//! The orchestration loop for one chat turn.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use skillrun_config::AppConfig;
use skillrun_core::error::ToolError;
use skillrun_core::event::{EventSink, StreamEvent};
use skillrun_core::message::{Conversation, ToolCall};
use skillrun_core::provider::{Provider, ProviderRequest, ToolSchema};
use skillrun_core::tool::{ToolContext, ToolRegistry};
use skillrun_skills::SkillActivation;
use skillrun_tools::SKILL_TOOL_NAME;
use tracing::{debug, info, warn};

/// Text of the `error` event sent when a turn runs out of iterations.
pub const ITERATION_LIMIT_MESSAGE: &str = "maximum tool call iterations reached";

const SKILL_PREVIEW_CHARS: usize = 100;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The model produced a final answer
    Finished { content: String, iterations: u32 },
    /// Every iteration asked for more tools
    IterationExhausted { iterations: u32 },
    /// A model call failed
    Failed { error: String },
    /// The consumer went away before the next model call
    Abandoned { iterations: u32 },
}

impl TurnOutcome {
    /// The final answer, if the turn finished.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Finished { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// The tool names one turn may offer the model. Grows when a skill
/// unlocks more tools; never shared between turns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedTools(BTreeSet<String>);

impl AllowedTools {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.0.extend(names);
    }

    /// Keep the schemas whose tool is allowed, in their given order.
    pub fn filter(&self, schemas: &[ToolSchema]) -> Vec<ToolSchema> {
        schemas.iter().filter(|s| self.contains(&s.name)).cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What dispatching one tool call produced.
enum CallOutcome {
    Output(String),
    Skill(SkillActivation),
}

/// Drives model calls and tool execution for a conversation.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Default max tokens per response
    max_tokens: Option<u32>,

    /// Tool registry
    tools: Arc<ToolRegistry>,

    /// Maximum Deciding steps per turn
    max_iterations: u32,

    /// Go through the provider's streaming endpoint
    stream: bool,

    /// Starting allowed set, copied into every turn
    allowed_tools: AllowedTools,
}

impl AgentLoop {
    /// Create a loop allowing every registered tool.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let allowed_tools = AllowedTools::new(tools.names());
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens: None,
            tools,
            max_iterations: 10,
            stream: false,
            allowed_tools,
        }
    }

    /// Build a loop from the active model section and `[tools]`.
    pub fn from_config(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: &AppConfig) -> Self {
        let model = config.active_model();
        Self::new(provider, model.model.clone(), model.temperature, tools)
            .with_max_tokens(model.max_tokens)
            .with_max_iterations(config.tools.max_tool_calls)
            .with_streaming(model.use_stream)
            .with_allowed_tools(config.tools.allowed_tools.iter().cloned())
    }

    /// Set the maximum number of tool call iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Replace the starting allowed set.
    pub fn with_allowed_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = AllowedTools::new(names);
        self
    }

    pub fn allowed_tools(&self) -> &AllowedTools {
        &self.allowed_tools
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Run one turn: append `user_message`, then alternate model calls and
    /// tool execution until the model answers without tool calls.
    ///
    /// Progress goes to `sink` in order. The terminal `done` event is not
    /// sent here; the caller owning the channel sends it.
    pub async fn run_turn(&self, conversation: &mut Conversation, user_message: &str, sink: &EventSink) -> TurnOutcome {
        info!(
            conversation_id = %conversation.id,
            messages = conversation.messages().len(),
            "Processing turn"
        );
        conversation.push_user(user_message);

        let schemas = self.tools.schemas();
        let mut allowed = self.allowed_tools.clone();
        let mut iteration = 0;

        while iteration < self.max_iterations {
            if sink.is_closed() {
                info!(conversation_id = %conversation.id, iteration, "Consumer disconnected, abandoning turn");
                return TurnOutcome::Abandoned { iterations: iteration };
            }
            iteration += 1;
            debug!(conversation_id = %conversation.id, iteration, "Agent loop iteration");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: conversation.messages().to_vec(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: allowed.filter(&schemas),
                stream: self.stream,
            };

            let response = match self.provider.complete_auto(request).await {
                Ok(response) => response,
                Err(e) => {
                    let error = e.to_string();
                    warn!(conversation_id = %conversation.id, error = %error, "Model call failed");
                    sink.emit(StreamEvent::error(&error)).await;
                    return TurnOutcome::Failed { error };
                }
            };

            let thinking = response.thinking();
            if !thinking.is_empty() {
                sink.emit(StreamEvent::thinking(thinking)).await;
            }

            if !response.has_tool_calls() {
                conversation.push_assistant(response.content.clone(), Vec::new());
                sink.emit(StreamEvent::content(&response.content)).await;
                info!(conversation_id = %conversation.id, iterations = iteration, "Turn finished");
                return TurnOutcome::Finished {
                    content: response.content,
                    iterations: iteration,
                };
            }

            debug!(tool_count = response.tool_calls.len(), "Executing tool calls");
            conversation.push_assistant(response.content.clone(), response.tool_calls.clone());

            // Skill bodies join the conversation after every tool result of
            // this step, so the results stay adjacent to their calls.
            let mut injected = Vec::new();
            for call in &response.tool_calls {
                if let Some(content) = self.dispatch(call, iteration, conversation, &mut allowed, sink).await {
                    injected.push(content);
                }
            }
            for content in injected {
                conversation.push_user(content);
            }
        }

        warn!(
            conversation_id = %conversation.id,
            iterations = iteration,
            "Max tool iterations reached"
        );
        sink.emit(StreamEvent::error(ITERATION_LIMIT_MESSAGE)).await;
        TurnOutcome::IterationExhausted { iterations: iteration }
    }

    /// Execute one call, record its result message, and report it. Returns
    /// a skill body to inject as a user message.
    async fn dispatch(
        &self,
        call: &ToolCall,
        iteration: u32,
        conversation: &mut Conversation,
        allowed: &mut AllowedTools,
        sink: &EventSink,
    ) -> Option<String> {
        sink.emit(StreamEvent::ToolCall {
            iteration,
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        })
        .await;

        match self.execute_call(call, allowed, sink).await {
            Ok(CallOutcome::Output(text)) => {
                conversation.push_tool_result(&call.id, text.clone());
                sink.emit(StreamEvent::ToolResult {
                    tool_name: call.name.clone(),
                    result: text,
                })
                .await;
                None
            }
            Ok(CallOutcome::Skill(activation)) => {
                debug!(skill = %activation.skill_name, unlocked = ?activation.allowed_tools, "Skill activated");
                allowed.extend(activation.allowed_tools.iter().cloned());

                let ack = format!(
                    "Skill '{}' executed successfully with args: {}",
                    activation.skill_name,
                    Value::Object(activation.args.clone())
                );
                conversation.push_tool_result(&call.id, ack);

                sink.emit(StreamEvent::ToolResult {
                    tool_name: call.name.clone(),
                    result: preview(&activation.content),
                })
                .await;
                Some(activation.content).filter(|content| !content.is_empty())
            }
            Err(e) => {
                let message = format!("Tool execution error: {e}");
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                conversation.push_tool_result(&call.id, message.clone());
                sink.emit(StreamEvent::tool_error(message)).await;
                None
            }
        }
    }

    async fn execute_call(
        &self,
        call: &ToolCall,
        allowed: &AllowedTools,
        sink: &EventSink,
    ) -> Result<CallOutcome, ToolError> {
        if !self.tools.contains(&call.name) {
            return Err(ToolError::NotFound(call.name.clone()));
        }
        if !allowed.contains(&call.name) {
            return Err(ToolError::PermissionDenied {
                tool_name: call.name.clone(),
                reason: "tool is not enabled for this conversation".into(),
            });
        }

        let arguments = parse_arguments(&call.arguments)?;
        let ctx = ToolContext::with_events(sink.clone());

        if call.name == SKILL_TOOL_NAME {
            let value = self.tools.execute_value(&call.name, arguments, &ctx).await?;
            let activation: SkillActivation = serde_json::from_value(value)
                .map_err(|e| ToolError::failed(SKILL_TOOL_NAME, format!("Failed to parse skill result: {e}")))?;
            return Ok(CallOutcome::Skill(activation));
        }

        self.tools
            .execute(&call.name, arguments, &ctx)
            .await
            .map(CallOutcome::Output)
    }
}

/// Tool-call arguments as the model wrote them; blank text means `{}`.
fn parse_arguments(text: &str) -> Result<Value, ToolError> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(text)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(SKILL_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
