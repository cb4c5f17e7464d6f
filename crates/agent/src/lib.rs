//! The TaskPilot agent: a bounded think/act loop over an LLM and tools.
//!
//! The agent follows a **Think → Act** cycle per step:
//!
//! 1. **Think**: send memory, tool schemas and the next-step prompt to the
//!    LLM gateway and stage the proposed tool calls
//! 2. **Act**: dispatch each staged call, record the observation in memory
//! 3. Repeat until a special tool finishes the run or the step budget is spent
//!
//! [`Agent`] owns the lifecycle; a [`Reasoner`] decides what each step does.

pub mod agent;
pub mod prompt;
pub mod state;
pub mod stuck;
pub mod toolcall;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentContext, NO_ACTION, Reasoner};
pub use state::{StateCell, StateGuard};
pub use stuck::{PromptSwitch, StuckMonitor};
pub use toolcall::ToolCallReasoner;

use std::sync::Arc;
use taskpilot_config::AppConfig;
use taskpilot_core::agent::AgentConfig;
use taskpilot_core::error::Error;
use taskpilot_core::event::EventBus;
use taskpilot_providers::GatewayRegistry;
use taskpilot_tools::{TERMINATE_TOOL, default_registry};

/// The general-purpose agent: built-in tools, default prompts, and the
/// search prompt switch. Stuck detection follows `[agent] stuck_detection`.
pub fn default_agent(
    config: &AppConfig,
    gateways: &GatewayRegistry,
    events: EventBus,
) -> Result<Agent<ToolCallReasoner>, Error> {
    let workspace = config.agent.workspace_root.display().to_string();
    let mut agent_config = AgentConfig::new(config.agent.name.as_str())
        .with_max_steps(config.agent.max_steps)
        .with_system_prompt(prompt::system_prompt(&workspace))
        .with_next_step_prompt(prompt::NEXT_STEP_PROMPT)
        .with_tool_choice(config.agent.tool_choice);
    agent_config.description = "A versatile agent that can solve various tasks using multiple tools".into();
    agent_config.max_observe = config.agent.max_observe;
    agent_config.special_tools = vec![TERMINATE_TOOL.to_string()];

    let gateway = gateways.gateway(&agent_config.llm_profile)?;
    let tools = Arc::new(default_registry(config));
    let reasoner = ToolCallReasoner::new()
        .with_prompt_switch(PromptSwitch::new("web_search", prompt::SEARCH_NEXT_STEP_PROMPT));

    let mut agent = Agent::new(agent_config, gateway, tools, reasoner).with_events(events);
    if config.agent.stuck_detection {
        agent = agent.with_stuck_monitor(StuckMonitor::default());
    }
    Ok(agent)
}
