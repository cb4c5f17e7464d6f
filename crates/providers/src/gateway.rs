//! LLM gateway: the token-budgeted, retrying client agents talk to.
//!
//! Every exchange goes through one pipeline:
//!
//! 1. validate the tool-choice policy
//! 2. format messages (system messages first, images only for multimodal
//!    profiles)
//! 3. estimate input tokens
//! 4. reserve them against the profile's budget (fails with
//!    `TokenLimitExceeded` before any backend call)
//! 5. call the backend under a timeout, retrying transient failures with
//!    jittered exponential backoff
//! 6. record output tokens, or release the reservation if every attempt failed
//!
//! This is the only automatic-retry boundary in the runtime.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use taskpilot_config::LlmSettings;
use taskpilot_core::error::ProviderError;
use taskpilot_core::event::{DomainEvent, EventBus};
use taskpilot_core::message::{ContentBlock, ImageDetail, Message, MessageContent};
use taskpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolChoice, ToolDefinition};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::token_counter::TokenCounter;

/// Bounded exponential backoff with random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Same attempt bound, no waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Wait before the attempt following failed attempt number `attempt` (1-based).
    ///
    /// Uniform in `[min_delay, min(max_delay, min_delay * 2^(attempt-1))]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        if min == 0 {
            return Duration::ZERO;
        }
        let max = self.max_delay.as_millis() as u64;
        let exp = min.saturating_mul(1u64 << attempt.saturating_sub(1).min(32));
        let upper = exp.min(max).max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=upper))
    }

    /// Wait after `error` on attempt `attempt`. A rate limit waits at least
    /// as long as the server asked, capped at `max_delay`.
    pub fn delay_for(&self, error: &ProviderError, attempt: u32) -> Duration {
        let backoff = self.delay(attempt);
        match error {
            ProviderError::RateLimited { retry_after_secs } => Duration::from_secs(*retry_after_secs)
                .max(backoff)
                .min(self.max_delay),
            _ => backoff,
        }
    }
}

/// Running token counters of one gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenBudget {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Ceiling on `total_input_tokens`
    pub max_input_tokens: Option<u64>,
}

impl TokenBudget {
    pub fn new(max_input_tokens: Option<u64>) -> Self {
        Self {
            max_input_tokens,
            ..Self::default()
        }
    }

    /// Whether `input_tokens` more still fit under the ceiling.
    pub fn check(&self, input_tokens: u64) -> Result<(), ProviderError> {
        match self.max_input_tokens {
            Some(limit) if self.total_input_tokens + input_tokens > limit => {
                Err(ProviderError::TokenLimitExceeded {
                    used: self.total_input_tokens,
                    requested: input_tokens,
                    limit,
                })
            }
            _ => Ok(()),
        }
    }
}

/// A token-budgeted, retrying client for one named LLM profile.
///
/// Shared between agents through [`GatewayRegistry`](crate::GatewayRegistry);
/// concurrent callers serialize on the budget lock only.
pub struct LlmGateway {
    profile: String,
    settings: LlmSettings,
    backend: Arc<dyn Provider>,
    counter: TokenCounter,
    budget: Mutex<TokenBudget>,
    retry: RetryPolicy,
    events: Option<EventBus>,
}

impl LlmGateway {
    pub fn new(profile: impl Into<String>, settings: LlmSettings, backend: Arc<dyn Provider>) -> Self {
        let budget = TokenBudget::new(settings.max_input_tokens);
        Self {
            profile: profile.into(),
            settings,
            backend,
            counter: TokenCounter::default(),
            budget: Mutex::new(budget),
            retry: RetryPolicy::default(),
            events: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Snapshot of the token counters.
    pub async fn usage(&self) -> TokenBudget {
        *self.budget.lock().await
    }

    /// Ask for a plain text answer.
    pub async fn ask(
        &self,
        messages: &[Message],
        system: &[Message],
        timeout: Option<Duration>,
    ) -> Result<String, ProviderError> {
        let response = self
            .exchange(messages, system, &[], ToolChoice::None, timeout)
            .await?;
        let content = response.message.text().into_owned();
        if content.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "Empty or invalid response from LLM".into(),
            ));
        }
        Ok(content)
    }

    /// Ask for the next action: assistant content plus zero or more tool calls.
    ///
    /// `tool_choice` must be one of `auto`, `required` or `none`; anything
    /// else fails with [`ProviderError::InvalidToolChoice`] before any
    /// backend call.
    pub async fn ask_tool(
        &self,
        messages: &[Message],
        system: &[Message],
        tools: &[ToolDefinition],
        tool_choice: impl AsRef<str>,
        timeout: Option<Duration>,
    ) -> Result<Message, ProviderError> {
        let tool_choice: ToolChoice = tool_choice.as_ref().parse()?;
        let response = self
            .exchange(messages, system, tools, tool_choice, timeout)
            .await?;
        Ok(response.message)
    }

    async fn exchange(
        &self,
        messages: &[Message],
        system: &[Message],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        timeout: Option<Duration>,
    ) -> Result<ProviderResponse, ProviderError> {
        let formatted = self.format_messages(system, messages);
        let input_tokens = self.counter.count_messages(&formatted);
        self.reserve(input_tokens).await?;

        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages: formatted,
            temperature: self.settings.temperature,
            max_tokens: Some(self.settings.max_tokens),
            tools: tools.to_vec(),
            tool_choice,
            timeout: Some(timeout.unwrap_or(Duration::from_secs(self.settings.timeout_secs))),
        };

        match self.send_with_retry(request).await {
            Ok((response, attempts)) => {
                let output_tokens = match response.usage {
                    Some(usage) => u64::from(usage.completion_tokens),
                    None => {
                        self.counter.count_text(&response.message.text())
                            + self.counter.count_tool_calls(&response.message.tool_calls)
                    }
                };
                let totals = {
                    let mut budget = self.budget.lock().await;
                    budget.total_output_tokens += output_tokens;
                    *budget
                };
                info!(
                    profile = %self.profile,
                    input_tokens,
                    output_tokens,
                    total_input = totals.total_input_tokens,
                    total_output = totals.total_output_tokens,
                    "Token usage"
                );
                if let Some(events) = &self.events {
                    events.publish(DomainEvent::LlmExchange {
                        profile: self.profile.clone(),
                        model: response.model.clone(),
                        input_tokens,
                        output_tokens,
                        attempts,
                        timestamp: Utc::now(),
                    });
                }
                Ok(response)
            }
            Err(e) => {
                self.release(input_tokens).await;
                Err(e)
            }
        }
    }

    /// Check and claim `input_tokens` in one critical section.
    async fn reserve(&self, input_tokens: u64) -> Result<(), ProviderError> {
        let mut budget = self.budget.lock().await;
        if let Err(e) = budget.check(input_tokens) {
            warn!(profile = %self.profile, input_tokens, error = %e, "Token budget exceeded");
            return Err(e);
        }
        budget.total_input_tokens += input_tokens;
        Ok(())
    }

    async fn release(&self, input_tokens: u64) {
        let mut budget = self.budget.lock().await;
        budget.total_input_tokens = budget.total_input_tokens.saturating_sub(input_tokens);
    }

    async fn send_with_retry(
        &self,
        request: ProviderRequest,
    ) -> Result<(ProviderResponse, u32), ProviderError> {
        let timeout = request
            .timeout
            .unwrap_or(Duration::from_secs(self.settings.timeout_secs));
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(profile = %self.profile, backend = %self.backend.name(), attempt, "Calling backend");

            let result = match tokio::time::timeout(timeout, self.backend.complete(request.clone())).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "no response from '{}' after {}s",
                    self.backend.name(),
                    timeout.as_secs()
                ))),
            };

            match result {
                Ok(response) => return Ok((response, attempt)),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(&e, attempt);
                    warn!(
                        profile = %self.profile,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Backend call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(profile = %self.profile, attempt, error = %e, "Backend call failed");
                    return Err(e);
                }
            }
        }
    }

    /// System messages first, then the conversation.
    ///
    /// A message's base64 attachment becomes an image block when the profile
    /// is multimodal; otherwise images are dropped.
    fn format_messages(&self, system: &[Message], messages: &[Message]) -> Vec<Message> {
        system
            .iter()
            .chain(messages)
            .map(|m| {
                let mut m = m.clone();
                if self.settings.multimodal {
                    if let Some(image) = m.base64_image.take() {
                        let mut blocks = match std::mem::take(&mut m.content) {
                            MessageContent::Text(text) if text.is_empty() => Vec::new(),
                            MessageContent::Text(text) => vec![ContentBlock::text(text)],
                            MessageContent::Blocks(blocks) => blocks,
                        };
                        blocks.push(ContentBlock::base64_image(&image, ImageDetail::default()));
                        m.content = MessageContent::Blocks(blocks);
                    }
                } else {
                    m.base64_image = None;
                    if let MessageContent::Blocks(blocks) = &mut m.content {
                        blocks.retain(|b| matches!(b, ContentBlock::Text { .. }));
                    }
                }
                m
            })
            .collect()
    }
}
