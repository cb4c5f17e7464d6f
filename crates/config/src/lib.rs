//! Configuration loading, validation, and profile resolution for TaskPilot.
//!
//! Loads configuration from `config/config.toml` (or the file named by
//! `TASKPILOT_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.
//!
//! The `[llm]` table holds the default model profile. Every nested
//! `[llm.<name>]` table is a named profile whose fields override the default:
//!
//! ```toml
//! [llm]
//! model = "gpt-4o"
//! base_url = "https://api.openai.com/v1"
//! max_input_tokens = 100000
//!
//! [llm.vision]
//! model = "gpt-4o-mini"
//! multimodal = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use taskpilot_core::ToolChoice;

/// Name of the profile every lookup falls back to.
pub const DEFAULT_PROFILE: &str = "default";

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default LLM profile plus named overrides
    #[serde(default)]
    pub llm: LlmSection,

    /// Agent behaviour
    #[serde(default)]
    pub agent: AgentSection,

    /// Python sandbox limits
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Web search engines
    #[serde(default)]
    pub search: SearchConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Wire protocol flavour of an LLM endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    Openai,
    Azure,
    Ollama,
}

/// The `[llm]` table.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Ceiling on cumulative input tokens for the profile's gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u64>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub api_type: ApiType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Whether images are forwarded to the model
    #[serde(default)]
    pub multimodal: bool,

    /// Per-exchange timeout
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Named profiles (`[llm.<name>]` tables)
    #[serde(flatten, default)]
    pub profiles: HashMap<String, LlmOverride>,
}

fn default_model() -> String {
    "gpt-4o".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    1.0
}
fn default_llm_timeout() -> u64 {
    300
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            max_tokens: default_max_tokens(),
            max_input_tokens: None,
            temperature: default_temperature(),
            api_type: ApiType::default(),
            api_version: None,
            multimodal: false,
            timeout_secs: default_llm_timeout(),
            profiles: HashMap::new(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for LlmSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSection")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("max_tokens", &self.max_tokens)
            .field("max_input_tokens", &self.max_input_tokens)
            .field("temperature", &self.temperature)
            .field("api_type", &self.api_type)
            .field("api_version", &self.api_version)
            .field("multimodal", &self.multimodal)
            .field("timeout_secs", &self.timeout_secs)
            .field("profiles", &self.profiles)
            .finish()
    }
}

/// A named `[llm.<name>]` profile. Unset fields inherit from `[llm]`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LlmOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_type: Option<ApiType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multimodal: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for LlmOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmOverride")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("max_input_tokens", &self.max_input_tokens)
            .field("api_type", &self.api_type)
            .finish_non_exhaustive()
    }
}

/// Fully resolved, read-only settings for one named profile.
#[derive(Clone, PartialEq)]
pub struct LlmSettings {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub max_input_tokens: Option<u64>,
    pub temperature: f32,
    pub api_type: ApiType,
    pub api_version: Option<String>,
    pub multimodal: bool,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("max_tokens", &self.max_tokens)
            .field("max_input_tokens", &self.max_input_tokens)
            .field("temperature", &self.temperature)
            .field("api_type", &self.api_type)
            .field("api_version", &self.api_version)
            .field("multimodal", &self.multimodal)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        LlmSection::default().base_settings()
    }
}

impl LlmSection {
    fn base_settings(&self) -> LlmSettings {
        LlmSettings {
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            max_tokens: self.max_tokens,
            max_input_tokens: self.max_input_tokens,
            temperature: self.temperature,
            api_type: self.api_type,
            api_version: self.api_version.clone(),
            multimodal: self.multimodal,
            timeout_secs: self.timeout_secs,
        }
    }

    /// Resolve a profile name to concrete settings.
    ///
    /// Unknown names fall back to the default profile.
    pub fn resolve(&self, name: &str) -> LlmSettings {
        let base = self.base_settings();
        if name == DEFAULT_PROFILE {
            return base;
        }
        let Some(p) = self.profiles.get(name) else {
            tracing::warn!(profile = %name, "Unknown LLM profile, using default");
            return base;
        };
        LlmSettings {
            model: p.model.clone().unwrap_or(base.model),
            base_url: p.base_url.clone().unwrap_or(base.base_url),
            api_key: p.api_key.clone().or(base.api_key),
            max_tokens: p.max_tokens.unwrap_or(base.max_tokens),
            max_input_tokens: p.max_input_tokens.or(base.max_input_tokens),
            temperature: p.temperature.unwrap_or(base.temperature),
            api_type: p.api_type.unwrap_or(base.api_type),
            api_version: p.api_version.clone().or(base.api_version),
            multimodal: p.multimodal.unwrap_or(base.multimodal),
            timeout_secs: p.timeout_secs.unwrap_or(base.timeout_secs),
        }
    }
}

/// The `[agent]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_name")]
    pub name: String,

    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Observation truncation limit in characters
    #[serde(default = "default_max_observe")]
    pub max_observe: Option<usize>,

    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Directory the agent is told it may work in
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Whether the stuck-state monitor is wired into the step loop
    #[serde(default = "default_true")]
    pub stuck_detection: bool,
}

fn default_agent_name() -> String {
    "taskpilot".into()
}
fn default_max_steps() -> u32 {
    20
}
fn default_max_observe() -> Option<usize> {
    Some(10_000)
}
fn default_workspace_root() -> PathBuf {
    PathBuf::from("workspace")
}
fn default_true() -> bool {
    true
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            max_steps: default_max_steps(),
            max_observe: default_max_observe(),
            tool_choice: ToolChoice::default(),
            workspace_root: default_workspace_root(),
            stuck_detection: true,
        }
    }
}

/// The `[sandbox]` table: limits for the Python execution tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter executable
    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,

    /// Working directory for child processes (defaults to the agent workspace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    /// Captured output beyond this many bytes is cut off
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

fn default_python() -> String {
    "python3".into()
}
fn default_sandbox_timeout() -> u64 {
    5
}
fn default_max_output() -> usize {
    64 * 1024
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            timeout_secs: default_sandbox_timeout(),
            work_dir: None,
            max_output_bytes: default_max_output(),
        }
    }
}

/// The `[search]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Primary engine name
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Engines tried in order when the primary fails
    #[serde(default)]
    pub fallback_engines: Vec<String>,

    #[serde(default = "default_num_results")]
    pub num_results: usize,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_engine() -> String {
    "duckduckgo".into()
}
fn default_num_results() -> usize {
    5
}
fn default_search_timeout() -> u64 {
    10
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            fallback_engines: Vec::new(),
            num_results: default_num_results(),
            timeout_secs: default_search_timeout(),
        }
    }
}

/// The `[logging]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    ///
    /// Lookup order: `TASKPILOT_CONFIG`, `./config/config.toml`,
    /// `./config/config.example.toml`, built-in defaults.
    ///
    /// Environment overrides:
    /// - `TASKPILOT_API_KEY`, then `OPENAI_API_KEY`, fill a missing default api_key
    /// - `TASKPILOT_MODEL` replaces the default model
    pub fn load() -> Result<Self, ConfigError> {
        let path = match std::env::var("TASKPILOT_CONFIG") {
            Ok(p) => PathBuf::from(p),
            Err(_) => Self::default_path(),
        };
        Self::load_with_env(&path)
    }

    /// [`load_from`](Self::load_from) followed by the environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `config/config.toml` if present, else the example file next to it.
    pub fn default_path() -> PathBuf {
        let dir = PathBuf::from("config");
        let primary = dir.join("config.toml");
        if primary.exists() {
            return primary;
        }
        dir.join("config.example.toml")
    }

    fn apply_env_overrides(&mut self) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = std::env::var("TASKPILOT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("TASKPILOT_MODEL") {
            self.llm.model = model;
        }
    }

    /// Resolve a named LLM profile.
    pub fn resolve_llm(&self, name: &str) -> LlmSettings {
        self.llm.resolve(name)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let temperatures = std::iter::once(("default", Some(self.llm.temperature))).chain(
            self.llm
                .profiles
                .iter()
                .map(|(name, p)| (name.as_str(), p.temperature)),
        );
        for (name, temperature) in temperatures {
            if let Some(t) = temperature
                && !(0.0..=2.0).contains(&t)
            {
                return Err(ConfigError::ValidationError(format!(
                    "llm profile '{name}': temperature must be between 0.0 and 2.0"
                )));
            }
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be > 0".into(),
            ));
        }

        if self.sandbox.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sandbox.timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if the default profile has an API key.
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.is_some()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
