//! LLM access for TaskPilot.
//!
//! Agents talk to an [`LlmGateway`] obtained from a [`GatewayRegistry`]. The
//! gateway estimates input tokens with a [`TokenCounter`], enforces the
//! profile's budget, and retries transient backend failures. Backends
//! implement `taskpilot_core::Provider`; [`OpenAiCompatProvider`] is the HTTP one.

pub mod gateway;
pub mod openai_compat;
pub mod registry;
pub mod token_counter;

pub use gateway::{LlmGateway, RetryPolicy, TokenBudget};
pub use openai_compat::OpenAiCompatProvider;
pub use registry::{BackendFactory, GatewayRegistry};
pub use token_counter::{HeuristicTokenizer, TokenCounter, Tokenizer};
