//! Error types for the skillrun domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them for callers that cross context boundaries.

use thiserror::Error;

/// The top-level error type for skillrun operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model adapter ---
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    // --- Tool registry ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Request boundary ---
    #[error("Validation error: {0}")]
    Validation(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failure talking to a model endpoint.
///
/// Every variant is terminal for the current orchestration turn; nothing
/// in the workspace retries a failed model call automatically.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("Tool '{0}' already registered")]
    DuplicateName(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    /// Shorthand for the common `ExecutionFailed` case.
    pub fn failed(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_displays_correctly() {
        let err = Error::Connection(ConnectionError::Api {
            status_code: 502,
            message: "Bad gateway".into(),
        });
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("Bad gateway"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::PermissionDenied {
            tool_name: "bash".into(),
            reason: "command not in allowlist".into(),
        });
        assert!(err.to_string().contains("bash"));
        assert!(err.to_string().contains("allowlist"));
    }

    #[test]
    fn not_found_and_duplicate_messages() {
        assert_eq!(ToolError::NotFound("nope".into()).to_string(), "Tool 'nope' not found");
        assert_eq!(
            ToolError::DuplicateName("calc".into()).to_string(),
            "Tool 'calc' already registered"
        );
    }

    #[test]
    fn panic_payloads_become_text() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }

    #[test]
    fn failed_shorthand_keeps_original_message() {
        let err = ToolError::failed("javascript", "ReferenceError: x is not defined");
        assert!(err.to_string().contains("ReferenceError: x is not defined"));
    }
}
