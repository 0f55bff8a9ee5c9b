//! Provider trait: the abstraction over chat-completion backends.
//!
//! A Provider sends a conversation to a model and gets a [`ModelResponse`]
//! back, either in one piece or as a stream of [`ResponseFragment`]s.
//! [`Provider::complete_auto`] hides the difference from the orchestration
//! loop by folding fragments through a [`ResponseAccumulator`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ConnectionError;
use crate::message::{Message, ToolCall};

/// Which wire dialect produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    /// OpenAI-compatible endpoint with a separate `reasoning_content` channel
    Qwen,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "qwen" => Some(Self::Qwen),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Qwen => "qwen",
        }
    }
}

/// One model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub model: String,

    /// The conversation messages, system message first
    pub messages: Vec<Message>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Schemas the model may call, already filtered by the caller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    /// Whether `complete_auto` should go through the streaming endpoint
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool description sent to the model so it knows what it can call.
///
/// Immutable once the owning tool is registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,

    pub description: String,

    /// JSON Schema subset: `type`, `properties`, `required`
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// OpenAI function-calling export format.
    pub fn to_openai(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A complete model reply, normalized across providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,

    /// When non-empty, `content` is not a final answer
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Provider-specific thinking channel
    #[serde(default)]
    pub reasoning_content: String,

    #[serde(default)]
    pub provider: ProviderKind,
}

impl ModelResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The segment surfaced to clients as `thinking`.
    ///
    /// Qwen-style endpoints have a dedicated reasoning channel. OpenAI-style
    /// endpoints fall back to the prose that accompanies a tool call.
    pub fn thinking(&self) -> &str {
        match self.provider {
            ProviderKind::Qwen => &self.reasoning_content,
            ProviderKind::OpenAi if !self.reasoning_content.is_empty() => &self.reasoning_content,
            ProviderKind::OpenAi if self.has_tool_calls() => &self.content,
            ProviderKind::OpenAi => "",
        }
    }
}

/// An incremental piece of a tool call as it arrives over a stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call within the response; fragments are joined by it
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// A slice of the JSON argument text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds stream fragments into one [`ModelResponse`].
///
/// Argument text for a call index is only meaningful once every fragment
/// has been appended, so nothing here tries to parse it.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    content: String,
    reasoning: String,
    calls: BTreeMap<u32, PartialToolCall>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: ResponseFragment) {
        if let Some(text) = fragment.content {
            self.content.push_str(&text);
        }
        if let Some(text) = fragment.reasoning_content {
            self.reasoning.push_str(&text);
        }
        for delta in fragment.tool_calls {
            let call = self.calls.entry(delta.index).or_default();
            if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                if call.id.is_empty() {
                    call.id = id;
                }
            }
            if let Some(name) = delta.name.filter(|n| !n.is_empty()) {
                if call.name.is_empty() {
                    call.name = name;
                }
            }
            if let Some(args) = delta.arguments {
                call.arguments.push_str(&args);
            }
        }
    }

    /// Emit the accumulated response, tool calls in ascending index order.
    pub fn finish(self, provider: ProviderKind) -> ModelResponse {
        let tool_calls = self
            .calls
            .into_iter()
            .map(|(index, call)| ToolCall {
                id: if call.id.is_empty() { format!("call_{index}") } else { call.id },
                name: call.name,
                arguments: call.arguments,
            })
            .collect();

        ModelResponse {
            content: self.content,
            tool_calls,
            reasoning_content: self.reasoning,
            provider,
        }
    }
}

/// Stream of fragments returned by [`Provider::stream`].
pub type FragmentReceiver = mpsc::Receiver<Result<ResponseFragment, ConnectionError>>;

/// The model adapter contract.
///
/// Failures are always [`ConnectionError`]s and are never retried here.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ModelResponse, ConnectionError>;

    /// Send a request and get a stream of response fragments.
    ///
    /// Default implementation calls `complete()` and replays the result as
    /// a single fragment.
    async fn stream(&self, request: ProviderRequest) -> Result<FragmentReceiver, ConnectionError> {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let fragment = ResponseFragment {
            content: Some(response.content),
            reasoning_content: Some(response.reasoning_content),
            tool_calls: response
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta {
                    index: index as u32,
                    id: Some(call.id),
                    name: Some(call.name),
                    arguments: Some(call.arguments),
                })
                .collect(),
        };
        let _ = tx.send(Ok(fragment)).await;
        Ok(rx)
    }

    /// Streaming or not per `request.stream`; either way one response.
    async fn complete_auto(&self, request: ProviderRequest) -> Result<ModelResponse, ConnectionError> {
        if !request.stream {
            return self.complete(request).await;
        }

        let mut rx = self.stream(request).await?;
        let mut acc = ResponseAccumulator::new();
        while let Some(fragment) = rx.recv().await {
            acc.push(fragment?);
        }
        Ok(acc.finish(self.kind()))
    }
}
