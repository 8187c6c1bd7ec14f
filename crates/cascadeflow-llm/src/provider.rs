use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cascadeflow_core::{ChatMessage, Result, ToolCall, ToolSpec, Usage};

/// A request to an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Bare model name (provider prefix already stripped).
    pub model: String,
    /// Conversation history.
    pub messages: Vec<ChatMessage>,
    /// System prompt, kept separate for providers that want it top-level.
    pub system: Option<String>,
    /// Available tools in the universal shape.
    pub tools: Vec<ToolSpec>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whether the caller wants a streaming response.
    pub stream: bool,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            tools: vec![],
            max_tokens: 1024,
            temperature: 0.7,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    ContentFilter,
}

/// A complete (non-streaming) response from an LLM.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    /// Mean token probability when the provider exposes logprobs.
    pub confidence: Option<f64>,
    pub stop_reason: StopReason,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A chunk of a streaming response.
#[derive(Debug, Clone)]
pub enum LlmChunk {
    TextDelta(String),
    ToolCall(ToolCall),
    /// Usage stats, sent at end of stream.
    Usage(Usage),
    Done(StopReason),
    /// An error occurred mid-stream.
    Error {
        message: String,
        status_code: Option<u16>,
    },
}

/// Trait implemented by each upstream provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name, e.g. "openai".
    fn name(&self) -> &str;

    /// Models this provider is known to serve.
    fn models(&self) -> Vec<String>;

    /// Send a non-streaming request.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Send a streaming request. Returns a receiver for chunks.
    async fn stream(&self, request: &LlmRequest) -> Result<tokio::sync::mpsc::Receiver<LlmChunk>>;

    /// Check whether this provider is usable.
    async fn health_check(&self) -> Result<()>;
}
