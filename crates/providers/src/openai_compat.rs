//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, Azure OpenAI deployments, Ollama, vLLM, and any
//! endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming)
//! - Tool use / function calling with a tool-choice policy
//! - Structured content with image blocks

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use taskpilot_config::{ApiType, LlmSettings};
use taskpilot_core::error::ProviderError;
use taskpilot_core::message::{ContentBlock, Message, MessageContent, MessageToolCall};
use taskpilot_core::provider::*;
use tracing::{debug, warn};

/// How requests authenticate and which URL shape they use.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    /// `{base}/chat/completions` with bearer auth
    Standard,
    /// `{base}/openai/deployments/{model}/chat/completions?api-version=...`
    /// with an `api-key` header
    Azure { api_version: String },
}

/// An OpenAI-compatible LLM provider.
///
/// This handles the vast majority of backends since most expose an
/// OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    endpoint: Endpoint,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            endpoint: Endpoint::Standard,
            client,
        })
    }

    /// Build the backend described by a resolved profile.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let api_key = settings.api_key.clone().unwrap_or_default();
        match settings.api_type {
            ApiType::Openai => Self::new("openai", &settings.base_url, api_key, timeout),
            // Ollama ignores the key but rejects an empty bearer header
            ApiType::Ollama => Self::new("ollama", &settings.base_url, "ollama", timeout),
            ApiType::Azure => {
                let api_version = settings.api_version.clone().ok_or_else(|| {
                    ProviderError::NotConfigured("azure profile requires api_version".into())
                })?;
                let mut provider = Self::new("azure", &settings.base_url, api_key, timeout)?;
                provider.endpoint = Endpoint::Azure { api_version };
                Ok(provider)
            }
        }
    }

    fn completions_url(&self, model: &str) -> String {
        match &self.endpoint {
            Endpoint::Standard => format!("{}/chat/completions", self.base_url),
            Endpoint::Azure { api_version } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, model, api_version
            ),
        }
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Self::to_api_content(&m.content),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
                name: m.name.clone(),
            })
            .collect()
    }

    fn to_api_content(content: &MessageContent) -> Option<serde_json::Value> {
        match content {
            MessageContent::Text(text) => Some(serde_json::Value::String(text.clone())),
            MessageContent::Blocks(blocks) => Some(serde_json::Value::Array(
                blocks
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text { text } => {
                            serde_json::json!({ "type": "text", "text": text })
                        }
                        ContentBlock::Image { url, detail, .. } => serde_json::json!({
                            "type": "image_url",
                            "image_url": { "url": url, "detail": detail },
                        }),
                    })
                    .collect(),
            )),
        }
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!(request.tool_choice.as_str());
        }

        body
    }

    /// Turn a decoded API response into our domain response.
    fn parse_response(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let content = match choice.message.content {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            message: Message::assistant_with_tool_calls(content, tool_calls),
            usage,
            model: api_response.model,
        })
    }
}

#[async_trait]
impl taskpilot_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = self.completions_url(&request.model);
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let mut http = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        http = match self.endpoint {
            Endpoint::Standard => http.header("Authorization", format!("Bearer {}", self.api_key)),
            Endpoint::Azure { .. } => http.header("api-key", &self.api_key),
        };
        if let Some(timeout) = request.timeout {
            http = http.timeout(timeout);
        }

        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        Self::parse_response(api_response)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpilot_core::message::ImageDetail;
    use taskpilot_core::Provider;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(
            "openai",
            "https://api.openai.com/v1/",
            "sk-test",
            Duration::from_secs(30),
        )
        .unwrap()
    }

    fn request(tools: Vec<ToolDefinition>, tool_choice: ToolChoice) -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::system("You are helpful"), Message::user("Hello")],
            temperature: 0.0,
            max_tokens: Some(256),
            tools,
            tool_choice,
            timeout: None,
        }
    }

    #[test]
    fn standard_url_trims_trailing_slash() {
        let p = provider();
        assert_eq!(p.name(), "openai");
        assert_eq!(
            p.completions_url("gpt-4o"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn azure_settings_build_deployment_url() {
        let settings = LlmSettings {
            base_url: "https://acme.openai.azure.com".into(),
            api_type: ApiType::Azure,
            api_version: Some("2024-08-01-preview".into()),
            model: "gpt4o-deploy".into(),
            ..LlmSettings::default()
        };
        let p = OpenAiCompatProvider::from_settings(&settings).unwrap();
        assert_eq!(
            p.completions_url(&settings.model),
            "https://acme.openai.azure.com/openai/deployments/gpt4o-deploy/chat/completions?api-version=2024-08-01-preview"
        );
    }

    #[test]
    fn azure_without_version_is_not_configured() {
        let settings = LlmSettings {
            api_type: ApiType::Azure,
            ..LlmSettings::default()
        };
        assert!(matches!(
            OpenAiCompatProvider::from_settings(&settings),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn message_conversion_with_blocks_and_tool_reply() {
        let messages = vec![
            Message::user(vec![
                ContentBlock::text("what is this?"),
                ContentBlock::base64_image("aGVsbG8=", ImageDetail::High),
            ]),
            Message::tool_result("call_1", "web_search", "3 results"),
        ];
        let api = OpenAiCompatProvider::to_api_messages(&messages);
        let blocks = api[0].content.as_ref().unwrap().as_array().unwrap();
        assert_eq!(blocks[1]["type"], "image_url");
        assert_eq!(blocks[1]["image_url"]["detail"], "high");
        assert_eq!(api[1].role, "tool");
        assert_eq!(api[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(api[1].name.as_deref(), Some("web_search"));
    }

    #[test]
    fn body_includes_tool_choice_only_with_tools() {
        let body = OpenAiCompatProvider::build_body(&request(vec![], ToolChoice::Required));
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["max_tokens"], 256);

        let tools = vec![ToolDefinition {
            name: "terminate".into(),
            description: "End the run".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let body = OpenAiCompatProvider::build_body(&request(tools, ToolChoice::Required));
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"][0]["function"]["name"], "terminate");
        assert_eq!(body["tools"][0]["type"], "function");
    }

    #[test]
    fn parse_response_with_tool_calls_and_null_content() {
        let raw = serde_json::json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": { "name": "terminate", "arguments": "{\"status\":\"success\"}" }
                    }]
                }
            }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 18, "total_tokens": 138 }
        });
        let api: ApiResponse = serde_json::from_value(raw).unwrap();
        let response = OpenAiCompatProvider::parse_response(api).unwrap();
        assert_eq!(response.message.text(), "");
        assert_eq!(response.message.tool_calls[0].name, "terminate");
        assert_eq!(response.usage.unwrap().completion_tokens, 18);
    }

    #[test]
    fn parse_response_without_choices_is_invalid() {
        let api: ApiResponse =
            serde_json::from_value(serde_json::json!({ "model": "m", "choices": [] })).unwrap();
        assert!(matches!(
            OpenAiCompatProvider::parse_response(api),
            Err(ProviderError::InvalidResponse(_))
        ));
    }
}
