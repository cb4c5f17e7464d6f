//! Advisory policies that look at recent memory between steps.
//!
//! Neither policy stops a run. [`StuckMonitor`] nudges the next-step prompt
//! when the model repeats itself; [`PromptSwitch`] swaps the next-step prompt
//! for a single step when recent messages mention a trigger.

use serde::{Deserialize, Serialize};
use taskpilot_core::event::DomainEvent;
use taskpilot_core::memory::Memory;
use taskpilot_core::message::{Message, Role};
use tracing::warn;

use crate::agent::AgentContext;
use crate::prompt::STUCK_PROMPT;

/// Detects repeated assistant output.
#[derive(Debug, Clone)]
pub struct StuckMonitor {
    threshold: usize,
    prompt: String,
}

impl StuckMonitor {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(2),
            prompt: STUCK_PROMPT.to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Number of consecutive identical assistant messages at the tail of
    /// `memory`, counting the latest one. Blank replies count as zero.
    pub fn duplicates(&self, memory: &Memory) -> usize {
        let mut assistant = memory
            .messages()
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant);
        let Some(last) = assistant.next() else {
            return 0;
        };
        if last.content.is_empty() && last.tool_calls.is_empty() {
            return 0;
        }
        1 + assistant.take_while(|m| same_response(m, last)).count()
    }

    pub fn is_stuck(&self, memory: &Memory) -> bool {
        self.duplicates(memory) >= self.threshold
    }

    /// Prepend the corrective prompt to the agent's next-step prompt.
    pub fn on_stuck(&self, ctx: &mut AgentContext) {
        let duplicates = self.duplicates(&ctx.memory);
        warn!(agent = %ctx.config.name, duplicates, "Agent detected stuck state");
        ctx.events.publish(DomainEvent::StuckDetected {
            agent: ctx.config.name.clone(),
            duplicates,
            timestamp: chrono::Utc::now(),
        });

        ctx.next_step_prompt = match ctx.next_step_prompt.take() {
            Some(current) if current.starts_with(&self.prompt) => Some(current),
            Some(current) => Some(format!("{}\n{current}", self.prompt)),
            None => Some(self.prompt.clone()),
        };
        ctx.stuck_prompt = Some(self.prompt.clone());
    }
}

impl Default for StuckMonitor {
    fn default() -> Self {
        Self::new(2)
    }
}

// Call ids differ between otherwise identical proposals
fn same_response(a: &Message, b: &Message) -> bool {
    a.text() == b.text()
        && a.tool_calls.len() == b.tool_calls.len()
        && a
            .tool_calls
            .iter()
            .zip(&b.tool_calls)
            .all(|(x, y)| x.name == y.name && x.arguments == y.arguments)
}

/// Replaces the next-step prompt for one step when any of the last
/// [`PromptSwitch::WINDOW`] messages contains `trigger`, ignoring case.
/// An active stuck prompt still leads the switched prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSwitch {
    pub trigger: String,
    pub prompt: String,
}

impl PromptSwitch {
    pub const WINDOW: usize = 3;

    pub fn new(trigger: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            prompt: prompt.into(),
        }
    }

    pub fn applies(&self, memory: &Memory) -> bool {
        let trigger = self.trigger.to_lowercase();
        memory
            .recent(Self::WINDOW)
            .iter()
            .any(|m| m.text().to_lowercase().contains(&trigger))
    }
}
