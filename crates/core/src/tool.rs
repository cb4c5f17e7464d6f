//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world:
//! run code, search the web, end the run, etc. The [`ToolRegistry`] is the
//! dispatcher the think/act cycle hands proposed calls to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;

/// A request to execute a tool, with its arguments already parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl TryFrom<&MessageToolCall> for ToolCall {
    type Error = ToolError;

    /// Parse the raw argument string. An empty string means "no arguments".
    fn try_from(call: &MessageToolCall) -> Result<Self, Self::Error> {
        let raw = call.arguments.trim();
        let arguments = if raw.is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(raw).map_err(|e| {
                ToolError::InvalidArguments(format!(
                    "Error parsing arguments for {}: Invalid JSON format: {e}",
                    call.name
                ))
            })?
        };
        Ok(Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        })
    }
}

/// The outcome of a tool invocation.
///
/// A result is "truthy" when any field is set. A failure is a result whose
/// `error` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_image: Option<String>,

    /// A note for the agent runtime rather than the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_truthy(&self) -> bool {
        [&self.output, &self.error, &self.base64_image, &self.system]
            .iter()
            .any(|f| f.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// Merge two partial results.
    ///
    /// Text fields concatenate when both sides are set; an empty string counts
    /// as unset. Two images cannot be attached to one message, so that case
    /// is a [`ToolError::ResultConflict`].
    pub fn combine(self, other: ToolResult) -> Result<ToolResult, ToolError> {
        fn concat(a: Option<String>, b: Option<String>) -> Option<String> {
            let a = a.filter(|s| !s.is_empty());
            let b = b.filter(|s| !s.is_empty());
            match (a, b) {
                (Some(a), Some(b)) => Some(a + &b),
                (a, b) => a.or(b),
            }
        }

        let base64_image = match (self.base64_image, other.base64_image) {
            (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
                return Err(ToolError::ResultConflict(
                    "both results carry an image".into(),
                ));
            }
            (a, b) => a.filter(|s| !s.is_empty()).or(b.filter(|s| !s.is_empty())),
        };

        Ok(ToolResult {
            output: concat(self.output, other.output),
            error: concat(self.error, other.error),
            base64_image,
            system: concat(self.system, other.system),
        })
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_image(mut self, base64_image: impl Into<String>) -> Self {
        self.base64_image = Some(base64_image.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

impl std::fmt::Display for ToolResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            Some(error) => write!(f, "Error: {error}"),
            None => f.write_str(self.output.as_deref().unwrap_or_default()),
        }
    }
}

/// The core Tool trait.
///
/// Each capability (terminate, python_execute, web_search, ...) implements
/// this trait and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "terminate").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, kept in registration order.
///
/// The agent uses it to:
/// 1. Get tool definitions to send to the model
/// 2. Dispatch the calls the model proposes
///
/// Dispatching never fails: missing tools and tool errors come back as
/// failed [`ToolResult`]s so the step loop keeps going.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => {
                warn!(tool = %name, "Tool already registered, replacing it");
                self.tools[slot] = tool;
            }
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, tool: Box<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Remove a tool by name. Returns whether it was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let Some(slot) = self.index.remove(name) else {
            return false;
        };
        self.tools.remove(slot);
        for idx in self.index.values_mut() {
            if *idx > slot {
                *idx -= 1;
            }
        }
        true
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&slot| self.tools[slot].as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name.
    pub async fn dispatch(&self, name: &str, arguments: serde_json::Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!(tool = %name, "Dispatch to unknown tool");
            return ToolResult::failure(ToolError::NotFound(name.to_string()).to_string());
        };

        debug!(tool = %name, "Dispatching tool");
        match tool.execute(arguments).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                ToolResult::failure(e.to_string())
            }
        }
    }

    /// Execute a parsed tool call.
    pub async fn dispatch_call(&self, call: &ToolCall) -> ToolResult {
        self.dispatch(&call.name, call.arguments.clone()).await
    }

    /// Invoke every registered tool with empty arguments, in order.
    ///
    /// A failing tool yields a failure entry; the batch is never aborted.
    pub async fn dispatch_all(&self) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            let result = match tool.execute(serde_json::json!({})).await {
                Ok(result) => result,
                Err(e) => ToolResult::failure(e.to_string()),
            };
            results.push(result);
        }
        results
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
