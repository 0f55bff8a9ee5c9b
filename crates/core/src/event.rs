//! Stream events and the producer half of a run's event channel.
//!
//! Every chat turn gets its own bounded channel. The worker running the turn
//! holds an [`EventSink`] and may only push; the request handler owns the
//! receiving half. Order is the order of `emit` calls.

use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

/// One unit of turn progress delivered to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Thinking { content: String },
    Content { content: String },
    /// `iteration` is the 1-based loop iteration that requested the call
    ToolCall { iteration: u32, name: String, arguments: String },
    ToolResult { tool_name: String, result: String },
    ToolError { message: String },
    /// A console line captured while a script tool ran
    Console { tool_name: String, level: String, message: String },
    Error { message: String },
    Done,
}

impl StreamEvent {
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::Thinking { content: content.into() }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self::Content { content: content.into() }
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        Self::ToolError { message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    /// The SSE `event:` name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::Content { .. } => "content",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolError { .. } => "tool_error",
            Self::Console { .. } => "console",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// JSON payload; `None` for `done`.
    pub fn payload(&self) -> Option<serde_json::Value> {
        let value = match self {
            Self::Thinking { content } | Self::Content { content } => json!({ "content": content }),
            Self::ToolCall { iteration, name, arguments } => json!({
                "id": iteration,
                "type": "function",
                "function": { "name": name, "arguments": arguments },
            }),
            Self::ToolResult { tool_name, result } => json!({ "tool_name": tool_name, "result": result }),
            Self::ToolError { message } | Self::Error { message } => json!({ "message": message }),
            Self::Console { tool_name, level, message } => json!({
                "tool_name": tool_name,
                "level": level,
                "message": message,
            }),
            Self::Done => return None,
        };
        Some(value)
    }

    /// The SSE `data:` line contents.
    pub fn data(&self) -> String {
        self.payload().map(|v| v.to_string()).unwrap_or_default()
    }

    /// Encode as one server-sent-events frame.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.kind(), self.data())
    }
}

/// Producer handle for one run's event channel.
///
/// Cloning is cheap; all clones feed the same ordered channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<StreamEvent>,
}

/// Create the bounded channel for one run.
pub fn channel(capacity: usize) -> (EventSink, mpsc::Receiver<StreamEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (EventSink { sender }, receiver)
}

impl EventSink {
    /// Push one event, waiting for capacity. Returns `false` once the
    /// consumer is gone.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        let kind = event.kind();
        match self.sender.send(event).await {
            Ok(()) => true,
            Err(_) => {
                debug!(kind, "Event dropped, consumer disconnected");
                false
            }
        }
    }

    /// Push from a plain OS thread. Must not be called from async code.
    pub fn emit_blocking(&self, event: StreamEvent) -> bool {
        let kind = event.kind();
        match self.sender.blocking_send(event) {
            Ok(()) => true,
            Err(_) => {
                debug!(kind, "Event dropped, consumer disconnected");
                false
            }
        }
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_has_empty_data() {
        assert_eq!(StreamEvent::Done.to_sse(), "event: done\ndata: \n\n");
    }

    #[test]
    fn error_payload_has_message() {
        let frame = StreamEvent::error("boom").to_sse();
        assert_eq!(frame, "event: error\ndata: {\"message\":\"boom\"}\n\n");
        assert_eq!(StreamEvent::tool_error("x").kind(), "tool_error");
    }

    #[test]
    fn tool_call_payload_matches_function_shape() {
        let event = StreamEvent::ToolCall {
            iteration: 3,
            name: "calculate".into(),
            arguments: "{\"expression\":\"1+1\"}".into(),
        };
        let payload = event.payload().unwrap();
        assert_eq!(payload["id"], 3);
        assert_eq!(payload["type"], "function");
        assert_eq!(payload["function"]["name"], "calculate");
        assert_eq!(payload["function"]["arguments"], "{\"expression\":\"1+1\"}");
    }

    #[test]
    fn tool_result_payload() {
        let event = StreamEvent::ToolResult { tool_name: "bash".into(), result: "ok".into() };
        assert_eq!(event.payload().unwrap(), json!({"tool_name": "bash", "result": "ok"}));
    }

    #[tokio::test]
    async fn events_arrive_in_push_order() {
        let (sink, mut rx) = channel(8);
        let second = sink.clone();
        assert!(sink.emit(StreamEvent::thinking("a")).await);
        assert!(second.emit(StreamEvent::content("b")).await);
        assert!(sink.emit(StreamEvent::Done).await);

        assert_eq!(rx.recv().await, Some(StreamEvent::thinking("a")));
        assert_eq!(rx.recv().await, Some(StreamEvent::content("b")));
        assert_eq!(rx.recv().await, Some(StreamEvent::Done));
    }

    #[tokio::test]
    async fn emit_after_disconnect_is_ignored() {
        let (sink, rx) = channel(1);
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(StreamEvent::content("late")).await);
    }
}
