//! Gateway registry: one shared gateway per named LLM profile.
//!
//! Owned by the application and passed to whoever builds agents. Asking for
//! the same profile twice returns the same `Arc<LlmGateway>`, so token
//! counters and the backend connection are shared for the process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use taskpilot_config::{LlmSection, LlmSettings};
use taskpilot_core::error::ProviderError;
use taskpilot_core::event::EventBus;
use taskpilot_core::provider::Provider;
use tracing::info;

use crate::gateway::{LlmGateway, RetryPolicy};
use crate::openai_compat::OpenAiCompatProvider;

/// Builds the backend for a profile. Swapped out in tests.
pub type BackendFactory =
    Arc<dyn Fn(&str, &LlmSettings) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync>;

pub struct GatewayRegistry {
    llm: LlmSection,
    factory: BackendFactory,
    retry: RetryPolicy,
    events: Option<EventBus>,
    gateways: RwLock<HashMap<String, Arc<LlmGateway>>>,
}

impl GatewayRegistry {
    /// A registry building OpenAI-compatible backends from `llm`.
    pub fn new(llm: LlmSection) -> Self {
        let factory: BackendFactory = Arc::new(|_profile, settings| {
            let provider = OpenAiCompatProvider::from_settings(settings)?;
            Ok(Arc::new(provider) as Arc<dyn Provider>)
        });
        Self {
            llm,
            factory,
            retry: RetryPolicy::default(),
            events: None,
            gateways: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_factory(mut self, factory: BackendFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// The gateway for `profile`, created on first use.
    ///
    /// Unknown profile names get their own gateway with the default settings.
    pub fn gateway(&self, profile: &str) -> Result<Arc<LlmGateway>, ProviderError> {
        if let Some(gw) = self
            .gateways
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(profile)
        {
            return Ok(gw.clone());
        }

        let mut gateways = self.gateways.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have won the race for the write lock
        if let Some(gw) = gateways.get(profile) {
            return Ok(gw.clone());
        }

        let settings = self.llm.resolve(profile);
        let backend = (self.factory)(profile, &settings)?;
        info!(profile, model = %settings.model, backend = %backend.name(), "Created LLM gateway");

        let mut gateway = LlmGateway::new(profile, settings, backend).with_retry(self.retry);
        if let Some(events) = &self.events {
            gateway = gateway.with_events(events.clone());
        }
        let gateway = Arc::new(gateway);
        gateways.insert(profile.to_string(), gateway.clone());
        Ok(gateway)
    }

    /// Names of the profiles with a live gateway.
    pub fn profiles(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .gateways
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use taskpilot_config::LlmOverride;
    use taskpilot_core::message::Message;
    use taskpilot_core::provider::{ProviderRequest, ProviderResponse};

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(format!("model={}", request.model)),
                usage: None,
                model: request.model,
            })
        }
    }

    fn counting_registry(built: Arc<Mutex<Vec<String>>>) -> GatewayRegistry {
        let mut llm = LlmSection::default();
        llm.profiles.insert(
            "vision".into(),
            LlmOverride {
                model: Some("gpt-4o-mini".into()),
                ..LlmOverride::default()
            },
        );
        GatewayRegistry::new(llm).with_factory(Arc::new(move |profile, _settings| {
            built.lock().unwrap().push(profile.to_string());
            Ok(Arc::new(EchoProvider) as Arc<dyn Provider>)
        }))
    }

    #[tokio::test]
    async fn same_profile_returns_same_instance() {
        let built = Arc::new(Mutex::new(Vec::new()));
        let registry = counting_registry(built.clone());

        let a = registry.gateway("default").unwrap();
        let b = registry.gateway("default").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(built.lock().unwrap().len(), 1);

        a.ask(&[Message::user("hi")], &[], None).await.unwrap();
        assert_eq!(b.usage().await, a.usage().await);
        assert!(b.usage().await.total_input_tokens > 0);
    }

    #[tokio::test]
    async fn profiles_resolve_their_own_settings() {
        let built = Arc::new(Mutex::new(Vec::new()));
        let registry = counting_registry(built.clone());

        let vision = registry.gateway("vision").unwrap();
        let answer = vision.ask(&[Message::user("hi")], &[], None).await.unwrap();
        assert_eq!(answer, "model=gpt-4o-mini");

        let unknown = registry.gateway("missing").unwrap();
        assert_eq!(unknown.settings().model, "gpt-4o");
        assert_eq!(registry.profiles(), vec!["missing", "vision"]);
    }

    #[test]
    fn factory_errors_are_not_cached() {
        let registry = GatewayRegistry::new(LlmSection::default()).with_factory(Arc::new(|_, _| {
            Err(ProviderError::NotConfigured("no backend".into()))
        }));
        assert!(registry.gateway("default").is_err());
        assert!(registry.profiles().is_empty());
    }
}
