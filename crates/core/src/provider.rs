//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send one request to a model and get a complete
//! response back. Token budgeting and retries live a layer above, in the
//! gateway; a provider performs exactly one exchange per call.
//!
//! Implementations: OpenAI-compatible (including Azure and Ollama endpoints).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ProviderError;
use crate::message::Message;

/// Whether, and how, the model may call tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides
    #[default]
    Auto,
    /// The model must call at least one tool
    Required,
    /// The model must not call tools
    None,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::Required => "required",
            ToolChoice::None => "none",
        }
    }
}

impl AsRef<str> for ToolChoice {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolChoice {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ToolChoice::Auto),
            "required" => Ok(ToolChoice::Required),
            "none" => Ok(ToolChoice::None),
            other => Err(ProviderError::InvalidToolChoice(other.to_string())),
        }
    }
}

/// One request to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o")
    pub model: String,

    /// The conversation messages, system messages first
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Tool-calling policy; only meaningful when `tools` is non-empty
    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Per-exchange deadline enforced by the caller
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated assistant message (content plus proposed tool calls)
    pub message: Message,

    /// Token usage statistics, when the backend reports them
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// The gateway calls `complete()` without knowing which backend is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "azure").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_choice_parses_fixed_set() {
        assert_eq!("auto".parse::<ToolChoice>().unwrap(), ToolChoice::Auto);
        assert_eq!("required".parse::<ToolChoice>().unwrap(), ToolChoice::Required);
        assert_eq!("none".parse::<ToolChoice>().unwrap(), ToolChoice::None);
        assert!(matches!(
            "sometimes".parse::<ToolChoice>(),
            Err(ProviderError::InvalidToolChoice(v)) if v == "sometimes"
        ));
    }

    #[test]
    fn tool_choice_serializes_lowercase() {
        let json = serde_json::to_string(&ToolChoice::Required).unwrap();
        assert_eq!(json, "\"required\"");
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "python_execute".into(),
            description: "Execute Python code".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "The code to run" }
                },
                "required": ["code"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("python_execute"));
        assert!(json.contains("code"));
    }
}
