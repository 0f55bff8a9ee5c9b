//! OpenAI-compatible model adapter.
//!
//! Serves OpenAI itself and any endpoint exposing `/chat/completions`.
//! With [`ProviderKind::Qwen`] the adapter also asks for, and reads, the
//! separate `reasoning_content` channel that Qwen-style servers provide.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - Reasoning ("thinking") deltas

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use skillrun_core::error::ConnectionError;
use skillrun_core::message::{Message, ToolCall};
use skillrun_core::provider::*;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Extra request fields understood by Qwen-style servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThinkingOptions {
    pub enable: bool,
    /// Reasoning token budget; 0 leaves the server default
    pub budget: u32,
}

/// An OpenAI-compatible chat-completion provider.
pub struct OpenAiCompatProvider {
    name: String,
    kind: ProviderKind,
    base_url: String,
    api_key: String,
    thinking: ThinkingOptions,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        kind: ProviderKind,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ConnectionError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ConnectionError::NotConfigured(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            kind,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            thinking: ThinkingOptions::default(),
            client,
        })
    }

    /// OpenAI's public endpoint.
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ConnectionError> {
        Self::new("openai", ProviderKind::OpenAi, "https://api.openai.com/v1", api_key)
    }

    pub fn with_thinking(mut self, thinking: ThinkingOptions) -> Self {
        self.thinking = thinking;
        self
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
                reasoning_content: None,
            })
            .collect()
    }

    fn request_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request.tools.iter().map(ToolSchema::to_openai).collect();
            body["tools"] = serde_json::Value::Array(tools);
        }

        if self.kind == ProviderKind::Qwen && self.thinking.enable {
            body["enable_thinking"] = serde_json::json!(true);
            if self.thinking.budget > 0 {
                body["thinking_budget"] = serde_json::json!(self.thinking.budget);
            }
        }

        body
    }

    async fn post(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response, ConnectionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ConnectionError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(response),
            401 | 403 => Err(ConnectionError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            )),
            429 => {
                let body = response.text().await.unwrap_or_default();
                Err(ConnectionError::RateLimited(body))
            }
            _ => {
                let error_body = response.text().await.unwrap_or_default();
                warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
                Err(ConnectionError::Api {
                    status_code: status,
                    message: error_body,
                })
            }
        }
    }
}

#[async_trait]
impl skillrun_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ModelResponse, ConnectionError> {
        let body = self.request_body(&request, false);
        debug!(provider = %self.name, model = %request.model, tools = request.tools.len(), "Sending completion request");

        let response = self.post(&body, false).await?;
        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ConnectionError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        parse_completion(api_response, self.kind)
    }

    async fn stream(&self, request: ProviderRequest) -> Result<FragmentReceiver, ConnectionError> {
        let body = self.request_body(&request, true);
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post(&body, true).await?;
        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and forward fragments
        tokio::spawn(forward_fragments(response.bytes_stream(), tx, provider_name));

        Ok(rx)
    }
}

/// Decode an SSE body into fragments until `[DONE]`.
///
/// A body that ends (or fails) before `[DONE]` is reported as
/// [`ConnectionError::StreamInterrupted`], so a truncated response never
/// reaches the accumulator as if it were complete.
async fn forward_fragments<S, B, E>(
    byte_stream: S,
    tx: mpsc::Sender<Result<ResponseFragment, ConnectionError>>,
    provider_name: String,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut decoder = SseDecoder::default();

    loop {
        let (lines, eof) = match byte_stream.next().await {
            Some(Ok(bytes)) => (decoder.push(bytes.as_ref()), false),
            Some(Err(e)) => {
                let _ = tx.send(Err(ConnectionError::StreamInterrupted(e.to_string()))).await;
                return;
            }
            None => (decoder.finish(), true),
        };

        for line in lines {
            let data = match line {
                SseLine::Done => return,
                SseLine::Data(data) => data,
            };
            match serde_json::from_str::<StreamResponse>(&data) {
                Ok(chunk) => {
                    if let Some(fragment) = fragment_from_chunk(chunk) {
                        if tx.send(Ok(fragment)).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                }
                Err(e) => {
                    trace!(provider = %provider_name, data = %data, error = %e, "Ignoring unparseable SSE chunk");
                }
            }
        }

        if eof {
            break;
        }
    }

    warn!(provider = %provider_name, "Stream ended without [DONE]");
    let _ = tx
        .send(Err(ConnectionError::StreamInterrupted("stream ended without [DONE]".into())))
        .await;
}

fn parse_completion(api_response: ApiResponse, kind: ProviderKind) -> Result<ModelResponse, ConnectionError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ConnectionError::InvalidResponse("No choices in response".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    Ok(ModelResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        reasoning_content: choice.message.reasoning_content.unwrap_or_default(),
        provider: kind,
    })
}

fn fragment_from_chunk(chunk: StreamResponse) -> Option<ResponseFragment> {
    let choice = chunk.choices.into_iter().next()?;
    let delta = choice.delta;

    let tool_calls: Vec<ToolCallDelta> = delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            }
        })
        .collect();

    let fragment = ResponseFragment {
        content: delta.content.filter(|c| !c.is_empty()),
        reasoning_content: delta.reasoning_content.filter(|c| !c.is_empty()),
        tool_calls,
    };
    if fragment == ResponseFragment::default() {
        return None;
    }
    Some(fragment)
}

/// One meaningful line of a server-sent-events body.
#[derive(Debug, PartialEq)]
enum SseLine {
    Data(String),
    Done,
}

/// Splits an SSE byte stream into `data:` payloads, buffering partial lines.
///
/// Bytes are kept raw until a full line arrives, so a character split
/// across network chunks is decoded whole.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if let Some(line) = parse_line(&raw[..line_end]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush a final line that had no trailing newline.
    fn finish(&mut self) -> Vec<SseLine> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest).into_iter().collect()
    }
}

fn parse_line(raw: &[u8]) -> Option<SseLine> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');

    // Skip empty lines and SSE comments
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        Some(SseLine::Done)
    } else {
        Some(SseLine::Data(data.to_string()))
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
