//! Error types for the TaskPilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] wraps them all.
//!
//! Propagation policy: tool-level errors are converted into failed
//! [`ToolResult`](crate::tool::ToolResult)s by the dispatcher and never reach
//! the run loop. State, memory and provider errors propagate to the caller of
//! `run()` and force the agent into the error state.

use crate::agent::AgentState;
use thiserror::Error;

/// The top-level error type for all TaskPilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Lifecycle errors ---
    #[error("State error: {0}")]
    State(#[from] StateError),

    // --- Conversation memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Provider / gateway errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

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

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Cannot start agent: current state is {current}, expected {expected}")]
    InvalidStateTransition {
        current: AgentState,
        expected: AgentState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("Unsupported message role: {0}")]
    UnsupportedRole(String),
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error(
        "Token limit exceeded: {used} used + {requested} requested > {limit} allowed input tokens"
    )]
    TokenLimitExceeded { used: u64, requested: u64, limit: u64 },

    #[error("Invalid tool choice: {0}")]
    InvalidToolChoice(String),

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the gateway may retry the exchange that produced this error.
    ///
    /// Budget and validation failures are deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::TokenLimitExceeded { .. }
                | ProviderError::InvalidToolChoice(_)
                | ProviderError::NotConfigured(_)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool {0} is invalid")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Cannot combine tool results: {0}")]
    ResultConflict(String),
}
