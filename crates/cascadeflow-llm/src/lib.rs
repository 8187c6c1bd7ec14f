//! # cascadeflow-llm
//!
//! Abstraction layer over upstream LLM providers. The cascade engine speaks
//! [`LlmProvider`]; OpenAI- and Anthropic-shaped backends plus a
//! deterministic mock implement it.

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use mock::{MockProvider, MockResponse};
pub use openai::OpenAiProvider;
pub use provider::{LlmChunk, LlmProvider, LlmRequest, LlmResponse, StopReason};
