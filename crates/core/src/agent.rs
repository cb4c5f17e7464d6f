//! Agent configuration and lifecycle state types.

use serde::{Deserialize, Serialize};

use crate::provider::ToolChoice;

/// Lifecycle state of one agent. Transitions are the only mutator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    #[default]
    Idle,
    Running,
    Finished,
    Error,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AgentState::Idle => "IDLE",
            AgentState::Running => "RUNNING",
            AgentState::Finished => "FINISHED",
            AgentState::Error => "ERROR",
        })
    }
}

/// Static configuration of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent name (used in logs and events)
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// System-level instruction prompt
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Prompt appended as a user message before each think
    #[serde(default)]
    pub next_step_prompt: Option<String>,

    /// Step budget per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Observations longer than this many characters are truncated
    #[serde(default)]
    pub max_observe: Option<usize>,

    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Tool names whose execution finishes the run
    #[serde(default = "default_special_tools")]
    pub special_tools: Vec<String>,

    /// Named LLM profile the agent's gateway is resolved from
    #[serde(default = "default_profile")]
    pub llm_profile: String,
}

fn default_max_steps() -> u32 {
    10
}

fn default_special_tools() -> Vec<String> {
    vec!["terminate".into()]
}

fn default_profile() -> String {
    "default".into()
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: None,
            next_step_prompt: None,
            max_steps: default_max_steps(),
            max_observe: None,
            tool_choice: ToolChoice::default(),
            special_tools: default_special_tools(),
            llm_profile: default_profile(),
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_next_step_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.next_step_prompt = Some(prompt.into());
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn with_max_observe(mut self, max_observe: usize) -> Self {
        self.max_observe = Some(max_observe);
        self
    }

    pub fn is_special_tool(&self, name: &str) -> bool {
        self.special_tools.iter().any(|t| t.eq_ignore_ascii_case(name))
    }
}
