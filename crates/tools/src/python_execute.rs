//! Python execution tool: run a code snippet in a child interpreter.
//!
//! Only what the snippet prints is visible. The child is killed when the
//! timeout expires or the call is dropped.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use taskpilot_config::SandboxConfig;
use taskpilot_core::error::ToolError;
use taskpilot_core::tool::{Tool, ToolResult};
use tokio::process::Command;
use tracing::{debug, warn};

pub struct PythonExecuteTool {
    interpreter: String,
    timeout: Duration,
    work_dir: Option<PathBuf>,
    max_output_bytes: usize,
}

impl PythonExecuteTool {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            interpreter: config.python.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            work_dir: config.work_dir.clone(),
            max_output_bytes: config.max_output_bytes,
        }
    }

    fn truncate(&self, mut text: String) -> String {
        if text.len() > self.max_output_bytes {
            let mut cut = self.max_output_bytes;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n[output truncated]");
        }
        text
    }
}

impl Default for PythonExecuteTool {
    fn default() -> Self {
        Self::new(&SandboxConfig::default())
    }
}

#[async_trait]
impl Tool for PythonExecuteTool {
    fn name(&self) -> &str {
        "python_execute"
    }

    fn description(&self) -> &str {
        "Executes Python code string. Note: Only print outputs are visible, function return values are not captured. \
         Use print statements to see results."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Python code to execute."
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let code = arguments["code"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'code' argument".into()))?;

        debug!(interpreter = %self.interpreter, bytes = code.len(), "Executing Python code");

        let mut command = Command::new(&self.interpreter);
        command
            .args(["-c", code])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| ToolError::ExecutionFailed {
            tool_name: "python_execute".into(),
            reason: format!("failed to start '{}': {e}", self.interpreter),
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "python_execute".into(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Python execution timed out");
                return Err(ToolError::Timeout {
                    tool_name: "python_execute".into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = self.truncate(String::from_utf8_lossy(&output.stdout).into_owned());
        let stderr = self.truncate(String::from_utf8_lossy(&output.stderr).into_owned());

        if output.status.success() {
            Ok(ToolResult::success(stdout))
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(exit_code = code, "Python code failed");
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            Ok(ToolResult::failure(format!(
                "[exit code: {code}]\n{}",
                detail.trim_end()
            )))
        }
    }
}
