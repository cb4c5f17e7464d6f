//! Domain event system: decoupled observation of agent runs.
//!
//! Events are published when something interesting happens in a run.
//! Observers can subscribe to react without coupling to the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::agent::AgentState;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The agent moved between lifecycle states
    AgentStateChanged {
        agent: String,
        from: AgentState,
        to: AgentState,
        timestamp: DateTime<Utc>,
    },

    /// One think/act step finished
    StepCompleted {
        agent: String,
        step: u32,
        outcome: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The gateway completed an exchange with the model
    LlmExchange {
        profile: String,
        model: String,
        input_tokens: u64,
        output_tokens: u64,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// The stuck monitor saw repeated assistant output
    StuckDetected {
        agent: String,
        duplicates: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error ended a run
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
