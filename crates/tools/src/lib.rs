//! Built-in tool implementations for TaskPilot.
//!
//! Tools give the agent the ability to interact with the world:
//! run Python snippets, search the web, and end the run.

pub mod python_execute;
pub mod terminate;
pub mod web_search;

use taskpilot_config::AppConfig;
use taskpilot_core::tool::ToolRegistry;

pub use python_execute::PythonExecuteTool;
pub use terminate::{TERMINATE_TOOL, TerminateTool};
pub use web_search::{DuckDuckGoEngine, SearchEngine, SearchHit, WebSearchTool};

/// Create the default tool registry with all built-in tools.
///
/// `terminate` is always registered so every run has a way to finish.
pub fn default_registry(config: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let mut sandbox = config.sandbox.clone();
    if sandbox.work_dir.is_none() {
        sandbox.work_dir = Some(config.agent.workspace_root.clone()).filter(|p| p.is_dir());
    }
    registry.register(Box::new(PythonExecuteTool::new(&sandbox)));
    registry.register(Box::new(WebSearchTool::from_config(&config.search)));
    registry.register(Box::new(TerminateTool));
    registry
}
