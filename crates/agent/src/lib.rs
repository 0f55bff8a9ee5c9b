//! The orchestration loop: one chat turn at a time.
//!
//! A turn follows a **Decide → Execute tools → Decide** cycle:
//!
//! 1. **Append** the user message to the conversation
//! 2. **Send to the model** with the schemas of the currently allowed tools
//! 3. **If tool calls**: execute them in order, append results, loop back to 2
//! 4. **If text response**: emit it as `content` and finish
//!
//! The loop stops when the model answers without tool calls, when the
//! iteration cap is reached, or when a model call fails. [`EventBridge`]
//! runs a turn on its own task and closes every event sequence with one
//! `done`.

pub mod bridge;
pub mod loop_runner;

pub use bridge::{EventBridge, EventStream, Frame, STALLED_MESSAGE, TurnHandle};
pub use loop_runner::{AgentLoop, AllowedTools, ITERATION_LIMIT_MESSAGE, TurnOutcome};
