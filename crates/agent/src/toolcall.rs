//! Tool-calling reasoner: think asks the model for tool calls, act runs them.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use taskpilot_core::error::Error;
use taskpilot_core::event::DomainEvent;
use taskpilot_core::message::{Message, MessageToolCall};
use taskpilot_core::provider::ToolChoice;
use taskpilot_core::tool::{ToolCall, ToolResult};
use tracing::{debug, info, warn};

use crate::agent::{AgentContext, Reasoner};
use crate::stuck::PromptSwitch;

#[derive(Debug, Default)]
pub struct ToolCallReasoner {
    pending: Vec<MessageToolCall>,
    switches: Vec<PromptSwitch>,
    timeout: Option<Duration>,
}

impl ToolCallReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt_switch(mut self, switch: PromptSwitch) -> Self {
        self.switches.push(switch);
        self
    }

    /// Per-attempt timeout for the model call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Calls staged by the last think and not yet acted on.
    pub fn pending(&self) -> &[MessageToolCall] {
        &self.pending
    }

    fn next_prompt(&self, ctx: &AgentContext) -> Option<String> {
        match self.switches.iter().find(|s| s.applies(&ctx.memory)) {
            Some(switch) => {
                debug!(trigger = %switch.trigger, "Prompt switch applied for this step");
                match &ctx.stuck_prompt {
                    Some(stuck) => Some(format!("{stuck}\n{}", switch.prompt)),
                    None => Some(switch.prompt.clone()),
                }
            }
            None => ctx.next_step_prompt.clone(),
        }
    }
}

#[async_trait]
impl Reasoner for ToolCallReasoner {
    async fn think(&mut self, ctx: &mut AgentContext) -> Result<bool, Error> {
        if let Some(prompt) = self.next_prompt(ctx) {
            ctx.memory.push(Message::user(prompt));
        }

        let system: Vec<Message> = ctx
            .config
            .system_prompt
            .iter()
            .map(|p| Message::system(p.as_str()))
            .collect();
        let definitions = ctx.tools.definitions();
        let tool_choice = ctx.config.tool_choice;

        let mut reply = ctx
            .gateway
            .ask_tool(
                ctx.memory.messages(),
                &system,
                &definitions,
                tool_choice,
                self.timeout,
            )
            .await?;

        info!(
            agent = %ctx.config.name,
            tools = reply.tool_calls.len(),
            thoughts = %reply.text(),
            "Model replied"
        );

        if tool_choice == ToolChoice::None && !reply.tool_calls.is_empty() {
            warn!(agent = %ctx.config.name, "Model proposed tools while tool use is disabled, ignoring them");
            reply.tool_calls.clear();
        }
        if tool_choice == ToolChoice::Required && reply.tool_calls.is_empty() {
            warn!(agent = %ctx.config.name, "Tool use is required but the model proposed none");
        }

        self.pending = reply.tool_calls.clone();
        if !reply.content.is_empty() || !reply.tool_calls.is_empty() {
            ctx.memory.push(reply);
        }

        Ok(!self.pending.is_empty())
    }

    async fn act(&mut self, ctx: &mut AgentContext) -> Result<String, Error> {
        let calls = std::mem::take(&mut self.pending);
        if calls.is_empty() {
            return Ok(ctx
                .memory
                .last()
                .map(|m| m.text().into_owned())
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| "No content or commands to execute".into()));
        }

        let mut observations = Vec::with_capacity(calls.len());
        for call in &calls {
            let start = Instant::now();
            let result = match ToolCall::try_from(call) {
                Ok(parsed) => ctx.tools.dispatch_call(&parsed).await,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Malformed tool arguments");
                    ToolResult::failure(e.to_string())
                }
            };
            let duration_ms = start.elapsed().as_millis() as u64;
            let success = !result.is_failure();

            ctx.events.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success,
                duration_ms,
                timestamp: chrono::Utc::now(),
            });

            let observation = truncate(observe(&call.name, &result), ctx.config.max_observe);
            debug!(tool = %call.name, success, duration_ms, "Tool completed");

            let mut message = Message::tool_result(&call.id, &call.name, observation.as_str());
            if let Some(image) = result.base64_image {
                message = message.with_image(image);
            }
            ctx.memory.push(message);

            if success && ctx.config.is_special_tool(&call.name) {
                info!(agent = %ctx.config.name, tool = %call.name, "Special tool has completed the task");
                ctx.finish();
            }

            observations.push(observation);
        }

        Ok(observations.join("\n\n"))
    }
}

fn observe(name: &str, result: &ToolResult) -> String {
    if result.is_truthy() {
        format!("Observed output of cmd `{name}` executed:\n{result}")
    } else {
        format!("Cmd `{name}` completed with no output")
    }
}

fn truncate(text: String, max_chars: Option<usize>) -> String {
    match max_chars {
        Some(max) if text.chars().count() > max => text.chars().take(max).collect(),
        _ => text,
    }
}
