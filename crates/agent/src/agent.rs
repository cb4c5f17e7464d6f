//! The agent state machine: the bounded think/act run loop.
//!
//! An [`Agent`] owns its memory, step counter and lifecycle state. The
//! decision policy is a [`Reasoner`] chosen at construction time; the agent
//! only drives it:
//!
//! 1. `run()` checks the agent is IDLE and seeds memory with the request
//! 2. A [`StateGuard`] moves the agent to RUNNING for the whole loop
//! 3. Each step calls `think()` and, when it asks for it, `act()`
//! 4. The loop ends on FINISHED or when the step budget runs out
//!
//! An error from a step leaves the agent in ERROR and propagates.

use async_trait::async_trait;
use std::sync::Arc;
use taskpilot_core::agent::{AgentConfig, AgentState};
use taskpilot_core::error::{Error, StateError};
use taskpilot_core::event::{DomainEvent, EventBus};
use taskpilot_core::memory::Memory;
use taskpilot_core::message::Message;
use taskpilot_core::tool::ToolRegistry;
use taskpilot_providers::LlmGateway;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::state::{StateCell, StateGuard};
use crate::stuck::StuckMonitor;

/// Outcome of a step whose think decided there was nothing to do.
pub const NO_ACTION: &str = "no action needed";

/// Decision policy plugged into an [`Agent`].
#[async_trait]
pub trait Reasoner: Send {
    /// Ask the model what to do next and stage it. Returns whether `act`
    /// should run this step.
    async fn think(&mut self, ctx: &mut AgentContext) -> Result<bool, Error>;

    /// Carry out what `think` staged and summarize the results.
    async fn act(&mut self, ctx: &mut AgentContext) -> Result<String, Error>;
}

/// Everything a [`Reasoner`] may read or mutate during a step.
pub struct AgentContext {
    pub config: AgentConfig,
    pub memory: Memory,
    pub gateway: Arc<LlmGateway>,
    pub tools: Arc<ToolRegistry>,
    pub state: StateCell,
    pub current_step: u32,
    pub events: EventBus,
    /// Prompt appended before each think. Starts from the config and may be
    /// rewritten by advisory policies.
    pub next_step_prompt: Option<String>,
    /// Corrective prompt set once the model was seen repeating itself. It
    /// leads whatever prompt the next think sends.
    pub stuck_prompt: Option<String>,
}

impl AgentContext {
    /// Mark the run as finished; the loop stops after the current step.
    pub fn finish(&self) {
        self.state.set(AgentState::Finished);
    }
}

pub struct Agent<R: Reasoner> {
    ctx: AgentContext,
    reasoner: R,
    stuck: Option<StuckMonitor>,
}

impl<R: Reasoner> Agent<R> {
    pub fn new(
        config: AgentConfig,
        gateway: Arc<LlmGateway>,
        tools: Arc<ToolRegistry>,
        reasoner: R,
    ) -> Self {
        let events = EventBus::default();
        let state = StateCell::new(config.name.as_str()).with_events(events.clone());
        let next_step_prompt = config.next_step_prompt.clone();
        Self {
            ctx: AgentContext {
                config,
                memory: Memory::new(),
                gateway,
                tools,
                state,
                current_step: 0,
                events,
                next_step_prompt,
                stuck_prompt: None,
            },
            reasoner,
            stuck: None,
        }
    }

    /// Publish this agent's events on a shared bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.ctx.state = StateCell::new(self.ctx.config.name.as_str()).with_events(events.clone());
        self.ctx.events = events;
        self
    }

    pub fn with_stuck_monitor(mut self, monitor: StuckMonitor) -> Self {
        self.stuck = Some(monitor);
        self
    }

    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.ctx.memory = memory;
        self
    }

    pub fn name(&self) -> &str {
        &self.ctx.config.name
    }

    pub fn state(&self) -> AgentState {
        self.ctx.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.ctx.state.subscribe()
    }

    pub fn current_step(&self) -> u32 {
        self.ctx.current_step
    }

    pub fn memory(&self) -> &Memory {
        &self.ctx.memory
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AgentContext {
        &mut self.ctx
    }

    /// Run the loop until FINISHED or the step budget is spent.
    ///
    /// Returns one `Step i: <outcome>` line per executed step. Fails with
    /// [`StateError::InvalidStateTransition`] without touching memory when
    /// the agent is not IDLE.
    pub async fn run(&mut self, request: Option<&str>) -> Result<String, Error> {
        let current = self.ctx.state.get();
        if current != AgentState::Idle {
            return Err(StateError::InvalidStateTransition {
                current,
                expected: AgentState::Idle,
            }
            .into());
        }

        if let Some(request) = request.filter(|r| !r.is_empty()) {
            self.ctx.memory.push(Message::user(request));
        }
        self.ctx.current_step = 0;

        let max_steps = self.ctx.config.max_steps;
        info!(agent = %self.ctx.config.name, max_steps, "Agent run started");

        let mut guard = StateGuard::enter(&self.ctx.state, AgentState::Running);
        let mut results = Vec::new();

        while self.ctx.current_step < max_steps && self.ctx.state.get() != AgentState::Finished {
            self.ctx.current_step += 1;
            let step = self.ctx.current_step;
            debug!(agent = %self.ctx.config.name, step, max_steps, "Executing step");

            let outcome = match self.step().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(agent = %self.ctx.config.name, step, error = %e, "Step failed");
                    guard.fail();
                    self.ctx.events.publish(DomainEvent::ErrorOccurred {
                        context: format!("{} step {step}", self.ctx.config.name),
                        error_message: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    return Err(e);
                }
            };

            self.ctx.events.publish(DomainEvent::StepCompleted {
                agent: self.ctx.config.name.clone(),
                step,
                outcome: outcome.clone(),
                timestamp: chrono::Utc::now(),
            });

            if let Some(monitor) = &self.stuck
                && monitor.is_stuck(&self.ctx.memory)
            {
                monitor.on_stuck(&mut self.ctx);
            }

            results.push(format!("Step {step}: {outcome}"));
        }

        if self.ctx.state.get() != AgentState::Finished && self.ctx.current_step >= max_steps {
            info!(agent = %self.ctx.config.name, max_steps, "Step budget exhausted");
            results.push(format!("Terminated: Reached max steps ({max_steps})"));
        }

        drop(guard);
        info!(
            agent = %self.ctx.config.name,
            steps = self.ctx.current_step,
            state = %self.ctx.state.get(),
            "Agent run finished"
        );

        if results.is_empty() {
            Ok("No steps executed".into())
        } else {
            Ok(results.join("\n"))
        }
    }

    /// One think followed, if needed, by one act.
    pub async fn step(&mut self) -> Result<String, Error> {
        if !self.reasoner.think(&mut self.ctx).await? {
            return Ok(NO_ACTION.into());
        }
        self.reasoner.act(&mut self.ctx).await
    }

    /// Return a finished or failed agent to IDLE with a zeroed step counter.
    /// Memory is kept.
    pub fn reset(&mut self) {
        self.ctx.current_step = 0;
        self.ctx.next_step_prompt = self.ctx.config.next_step_prompt.clone();
        self.ctx.stuck_prompt = None;
        self.ctx.state.set(AgentState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{OfflineProvider, ScriptedProvider, gateway, text_response};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Acts on every step with a fixed outcome; optionally finishes on step N.
    struct CountingReasoner {
        acts: Arc<AtomicU32>,
        finish_on: Option<u32>,
    }

    #[async_trait]
    impl Reasoner for CountingReasoner {
        async fn think(&mut self, _ctx: &mut AgentContext) -> Result<bool, Error> {
            Ok(true)
        }

        async fn act(&mut self, ctx: &mut AgentContext) -> Result<String, Error> {
            let n = self.acts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.finish_on == Some(n) {
                ctx.finish();
            }
            Ok(format!("acted {n}"))
        }
    }

    /// Asks the gateway once per think and never acts.
    struct AskingReasoner;

    #[async_trait]
    impl Reasoner for AskingReasoner {
        async fn think(&mut self, ctx: &mut AgentContext) -> Result<bool, Error> {
            let answer = ctx.gateway.ask(ctx.memory.messages(), &[], None).await?;
            ctx.memory.push(Message::assistant(answer));
            Ok(false)
        }

        async fn act(&mut self, _ctx: &mut AgentContext) -> Result<String, Error> {
            unreachable!("think never asks to act")
        }
    }

    fn counting(max_steps: u32, finish_on: Option<u32>) -> (Agent<CountingReasoner>, Arc<AtomicU32>) {
        let acts = Arc::new(AtomicU32::new(0));
        let agent = Agent::new(
            AgentConfig::new("probe").with_max_steps(max_steps),
            gateway(Arc::new(ScriptedProvider::new(vec![]))),
            Arc::new(ToolRegistry::new()),
            CountingReasoner {
                acts: acts.clone(),
                finish_on,
            },
        );
        (agent, acts)
    }

    #[tokio::test]
    async fn budget_bounds_the_loop() {
        let (mut agent, acts) = counting(3, None);
        let summary = agent.run(Some("go")).await.unwrap();

        assert_eq!(agent.current_step(), 3);
        assert_eq!(acts.load(Ordering::SeqCst), 3);
        assert_eq!(agent.state(), AgentState::Idle);
        assert_eq!(
            summary,
            "Step 1: acted 1\nStep 2: acted 2\nStep 3: acted 3\nTerminated: Reached max steps (3)"
        );
        assert_eq!(agent.memory().messages()[0].text(), "go");

        // Back in IDLE, so the next run gets a fresh budget
        let again = agent.run(None).await.unwrap();
        assert!(again.starts_with("Step 1: acted 4"));
        assert_eq!(agent.current_step(), 3);
    }

    #[tokio::test]
    async fn finishing_stops_early_and_sticks() {
        let (mut agent, _) = counting(10, Some(2));
        let summary = agent.run(None).await.unwrap();

        assert_eq!(agent.current_step(), 2);
        assert_eq!(agent.state(), AgentState::Finished);
        assert!(!summary.contains("Terminated"));
        assert!(agent.memory().is_empty());
    }

    #[tokio::test]
    async fn run_when_not_idle_has_no_side_effects() {
        let (mut agent, acts) = counting(10, Some(1));
        agent.run(Some("first")).await.unwrap();
        assert_eq!(agent.state(), AgentState::Finished);

        let err = agent.run(Some("second")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::State(StateError::InvalidStateTransition {
                current: AgentState::Finished,
                expected: AgentState::Idle,
            })
        ));
        assert_eq!(agent.memory().len(), 1);
        assert_eq!(agent.current_step(), 1);
        assert_eq!(acts.load(Ordering::SeqCst), 1);
        assert_eq!(agent.state(), AgentState::Finished);
    }

    #[tokio::test]
    async fn empty_request_is_not_recorded() {
        let (mut agent, _) = counting(1, None);
        agent.run(Some("")).await.unwrap();
        assert!(agent.memory().is_empty());
    }

    #[tokio::test]
    async fn reset_allows_another_run() {
        let (mut agent, _) = counting(10, Some(1));
        agent.run(None).await.unwrap();
        agent.reset();
        assert_eq!(agent.state(), AgentState::Idle);
        assert_eq!(agent.current_step(), 0);
        assert!(agent.run(None).await.is_ok());
    }

    #[tokio::test]
    async fn step_error_leaves_error_state() {
        let mut agent = Agent::new(
            AgentConfig::new("probe").with_max_steps(5),
            gateway(Arc::new(OfflineProvider)),
            Arc::new(ToolRegistry::new()),
            AskingReasoner,
        );
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        agent = agent.with_events(events);

        let err = agent.run(Some("hello")).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(agent.state(), AgentState::Error);
        assert_eq!(agent.current_step(), 1);

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.as_ref(), DomainEvent::ErrorOccurred { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn stuck_monitor_nudges_next_prompt() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("same thing"),
            text_response("same thing"),
            text_response("same thing"),
        ]));
        let mut agent = Agent::new(
            AgentConfig::new("probe")
                .with_max_steps(3)
                .with_next_step_prompt("What next?"),
            gateway(provider),
            Arc::new(ToolRegistry::new()),
            AskingReasoner,
        )
        .with_stuck_monitor(StuckMonitor::default());

        let summary = agent.run(Some("hello")).await.unwrap();
        assert_eq!(summary.lines().filter(|l| l.ends_with(NO_ACTION)).count(), 3);

        let prompt = agent.context().next_step_prompt.clone().unwrap();
        assert!(prompt.starts_with(crate::prompt::STUCK_PROMPT));
        assert!(prompt.ends_with("What next?"));
        // Prepended once, even though the check ran again afterwards
        assert_eq!(prompt.matches(crate::prompt::STUCK_PROMPT).count(), 1);
    }

    #[tokio::test]
    async fn steps_are_published() {
        let (agent, _) = counting(2, None);
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let mut agent = agent.with_events(events);
        agent.run(None).await.unwrap();

        let mut steps = Vec::new();
        let mut transitions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event.as_ref() {
                DomainEvent::StepCompleted { step, .. } => steps.push(*step),
                DomainEvent::AgentStateChanged { to, .. } => transitions.push(*to),
                _ => {}
            }
        }
        assert_eq!(steps, vec![1, 2]);
        assert_eq!(transitions, vec![AgentState::Running, AgentState::Idle]);
    }
}
