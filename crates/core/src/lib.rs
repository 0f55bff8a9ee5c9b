//! # skillrun core
//!
//! Domain types, traits, and error definitions shared by every skillrun
//! crate: messages and conversation state, the model adapter contract,
//! the tool trait and registry, and the stream events a chat turn emits.
//!
//! Implementations live in their own crates and depend inward on this one.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ConnectionError, Error, Result, ToolError};
pub use event::{EventSink, StreamEvent};
pub use message::{Conversation, ConversationId, Message, Role, SystemMetadata, ToolCall};
pub use provider::{
    ModelResponse, Provider, ProviderKind, ProviderRequest, ResponseAccumulator, ResponseFragment,
    ToolCallDelta, ToolSchema,
};
pub use tool::{Tool, ToolContext, ToolPayload, ToolRegistry};
