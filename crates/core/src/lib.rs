//! # TaskPilot Core
//!
//! Domain types, traits, and error definitions for the TaskPilot agent runtime.
//! This crate does **no I/O**: it defines the domain model that every other
//! crate implements against.
//!
//! ## Layout
//!
//! - [`message`] / [`memory`]: the role-tagged conversation an agent owns
//! - [`tool`]: the tool capability trait, results, and the dispatcher
//! - [`provider`]: the LLM backend trait consumed by the gateway
//! - [`agent`]: lifecycle state and agent configuration
//! - [`event`]: decoupled domain events

pub mod agent;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentConfig, AgentState};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use memory::{Memory, ToolReply};
pub use message::{ContentBlock, ImageDetail, Message, MessageContent, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolChoice, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
