//! Terminate tool: ends the run.
//!
//! The agent treats this name as special: once its result is recorded the
//! agent moves to FINISHED.

use async_trait::async_trait;
use taskpilot_core::error::ToolError;
use taskpilot_core::tool::{Tool, ToolResult};

/// Name the agent watches for.
pub const TERMINATE_TOOL: &str = "terminate";

pub struct TerminateTool;

#[async_trait]
impl Tool for TerminateTool {
    fn name(&self) -> &str {
        TERMINATE_TOOL
    }

    fn description(&self) -> &str {
        "Terminate the interaction when the request is met OR if the assistant cannot proceed further with the task. \
         When you have finished all the tasks, call this tool to end the work."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "description": "The finish status of the interaction.",
                    "enum": ["success", "failure"]
                }
            },
            "required": ["status"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let status = arguments["status"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'status' argument".into()))?;

        if !matches!(status, "success" | "failure") {
            return Err(ToolError::InvalidArguments(format!(
                "Invalid status: {status}. Must be success or failure."
            )));
        }

        Ok(ToolResult::success(format!(
            "The interaction has been completed with status: {status}"
        )))
    }
}
