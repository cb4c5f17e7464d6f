//! Lifecycle state holder and the scoped transition guard.
//!
//! [`StateCell`] is the single mutator of an agent's [`AgentState`]; every
//! change goes through [`StateCell::set`], which logs and publishes
//! [`DomainEvent::AgentStateChanged`]. Observers can watch the state without
//! borrowing the agent.

use std::sync::Arc;
use taskpilot_core::agent::AgentState;
use taskpilot_core::event::{DomainEvent, EventBus};
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone)]
pub struct StateCell {
    agent: Arc<str>,
    sender: Arc<watch::Sender<AgentState>>,
    events: Option<EventBus>,
}

impl StateCell {
    pub fn new(agent: impl Into<Arc<str>>) -> Self {
        let (sender, _) = watch::channel(AgentState::Idle);
        Self {
            agent: agent.into(),
            sender: Arc::new(sender),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn get(&self) -> AgentState {
        *self.sender.borrow()
    }

    /// Move to `state`, returning the state it replaced.
    pub fn set(&self, state: AgentState) -> AgentState {
        let previous = self.sender.send_replace(state);
        if previous != state {
            debug!(agent = %self.agent, from = %previous, to = %state, "Agent state changed");
            if let Some(events) = &self.events {
                events.publish(DomainEvent::AgentStateChanged {
                    agent: self.agent.to_string(),
                    from: previous,
                    to: state,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
        previous
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.sender.subscribe()
    }
}

impl std::fmt::Debug for StateCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCell")
            .field("agent", &self.agent)
            .field("state", &self.get())
            .finish()
    }
}

/// Scoped transition into a working state.
///
/// On drop the guard restores the state it replaced, but only while the cell
/// still holds the state the guard entered. A terminal state reached inside
/// the scope (`FINISHED` from a terminate tool, `ERROR` from [`fail`]) is
/// left for the owner to see. A panic inside the scope also leaves `ERROR`.
///
/// [`fail`]: StateGuard::fail
#[must_use = "the previous state is restored when the guard is dropped"]
pub struct StateGuard {
    cell: StateCell,
    entered: AgentState,
    previous: AgentState,
}

impl StateGuard {
    pub fn enter(cell: &StateCell, state: AgentState) -> Self {
        let previous = cell.set(state);
        Self {
            cell: cell.clone(),
            entered: state,
            previous,
        }
    }

    /// Mark the scope as failed: the cell moves to `ERROR` and stays there.
    pub fn fail(&mut self) {
        self.cell.set(AgentState::Error);
    }

    pub fn previous(&self) -> AgentState {
        self.previous
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.cell.set(AgentState::Error);
        } else if self.cell.get() == self.entered {
            self.cell.set(self.previous);
        }
    }
}
