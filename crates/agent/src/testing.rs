//! Shared test helpers for agent tests.

use std::sync::{Arc, Mutex};
use taskpilot_config::LlmSettings;
use taskpilot_core::error::ProviderError;
use taskpilot_core::message::{Message, MessageToolCall};
use taskpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use taskpilot_providers::{LlmGateway, RetryPolicy};

/// A mock provider that returns a sequence of scripted responses.
///
/// Panics if more calls are made than responses provided.
pub struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, n: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let Some(response) = responses.get(requests.len()).cloned() else {
            panic!(
                "ScriptedProvider: no more responses (call #{}, have {})",
                requests.len(),
                responses.len()
            );
        };
        requests.push(request);
        Ok(response)
    }
}

/// Always fails with a transient network error.
pub struct OfflineProvider;

#[async_trait::async_trait]
impl Provider for OfflineProvider {
    fn name(&self) -> &str {
        "offline"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    respond(Message::assistant(text))
}

pub fn tool_response(content: &str, calls: Vec<MessageToolCall>) -> ProviderResponse {
    respond(Message::assistant_with_tool_calls(content, calls))
}

pub fn call(id: &str, name: &str, arguments: &str) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

fn respond(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn gateway(provider: Arc<dyn Provider>) -> Arc<LlmGateway> {
    Arc::new(
        LlmGateway::new("default", LlmSettings::default(), provider)
            .with_retry(RetryPolicy::immediate(2)),
    )
}
