//! Mock LLM provider for deterministic testing.
//!
//! Returns pre-configured responses without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use cascadeflow_core::{CascadeError, Result, ToolCall, Usage};

use crate::provider::*;

/// A pre-configured response from the mock provider.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    pub confidence: Option<f64>,
    /// If set, the provider returns this error instead.
    pub error: Option<(String, Option<u16>)>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: Usage::new(100, 50),
            confidence: None,
            error: None,
        }
    }
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn error(message: &str, status_code: Option<u16>) -> Self {
        Self {
            error: Some((message.to_string(), status_code)),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Usage::new(input_tokens, output_tokens);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A mock provider that replays queued responses in order.
pub struct MockProvider {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// All requests received, for assertions in tests.
    pub requests: Arc<Mutex<Vec<LlmRequest>>>,
    name: String,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
            name: name.into(),
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.responses.lock().push(MockResponse::text(text));
        self
    }

    /// Queue a tool call response.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.responses.lock().push(MockResponse {
            tool_calls: vec![ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4()),
                name: name.to_string(),
                arguments: args,
            }],
            stop_reason: StopReason::ToolUse,
            ..Default::default()
        });
        self
    }

    /// Queue an error response.
    pub fn with_error(self, message: &str, status_code: Option<u16>) -> Self {
        self.responses.lock().push(MockResponse::error(message, status_code));
        self
    }

    /// Queue a fully custom response.
    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.responses.lock().push(resp);
        self
    }

    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<LlmRequest>>> {
        Arc::clone(&self.requests)
    }

    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            MockResponse::text("(mock: no more queued responses)")
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();

        if let Some((message, status_code)) = mock.error {
            return Err(match status_code {
                Some(status_code) => CascadeError::Upstream {
                    status_code,
                    message,
                    payload: None,
                },
                None => CascadeError::Transport(message),
            });
        }

        Ok(LlmResponse {
            content: mock.text,
            tool_calls: mock.tool_calls.clone(),
            usage: mock.usage,
            confidence: mock.confidence,
            stop_reason: mock.stop_reason,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> Result<mpsc::Receiver<LlmChunk>> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            if let Some((message, status_code)) = mock.error {
                let _ = tx.send(LlmChunk::Error { message, status_code }).await;
                return;
            }

            // Stream the text word by word.
            let words: Vec<&str> = mock.text.split_whitespace().collect();
            let last = words.len().saturating_sub(1);
            for (i, word) in words.iter().enumerate() {
                let delta = if i == last {
                    (*word).to_string()
                } else {
                    format!("{word} ")
                };
                let _ = tx.send(LlmChunk::TextDelta(delta)).await;
            }

            for tc in mock.tool_calls {
                let _ = tx.send(LlmChunk::ToolCall(tc)).await;
            }

            let _ = tx.send(LlmChunk::Usage(mock.usage)).await;
            let _ = tx.send(LlmChunk::Done(mock.stop_reason)).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascadeflow_core::ChatMessage;

    fn request() -> LlmRequest {
        LlmRequest::new("mock-model", vec![ChatMessage::user("Hello")])
    }

    #[tokio::test]
    async fn test_mock_text_response() {
        let provider = MockProvider::new("mock").with_response("Hello!");
        let resp = provider.complete(&request()).await.unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert!(!resp.has_tool_calls());
    }

    #[tokio::test]
    async fn test_mock_tool_call() {
        let provider =
            MockProvider::new("mock").with_tool_call("shell_exec", serde_json::json!({"command": "ls"}));
        let resp = provider.complete(&request()).await.unwrap();
        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls[0].name, "shell_exec");
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
    }

    #[tokio::test]
    async fn test_mock_upstream_error_carries_status() {
        let provider = MockProvider::new("mock").with_error("overloaded", Some(529));
        let err = provider.complete(&request()).await.unwrap_err();
        assert_eq!(err.upstream_status(), Some(529));
    }

    #[tokio::test]
    async fn test_mock_streaming_reassembles_text() {
        let provider = MockProvider::new("mock")
            .with_mock_response(MockResponse::text("Hello world").with_usage(10, 2));
        let mut rx = provider
            .stream(&LlmRequest {
                stream: true,
                ..request()
            })
            .await
            .unwrap();

        let mut text = String::new();
        let mut saw_done = false;
        let mut usage = Usage::default();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                LlmChunk::TextDelta(t) => text.push_str(&t),
                LlmChunk::Usage(u) => usage = u,
                LlmChunk::Done(_) => saw_done = true,
                _ => {}
            }
        }
        assert_eq!(text, "Hello world");
        assert!(saw_done);
        assert_eq!(usage.total_tokens(), 12);
    }

    #[tokio::test]
    async fn test_mock_multiple_responses_in_order() {
        let provider = MockProvider::new("mock")
            .with_response("first")
            .with_response("second");
        assert_eq!(provider.complete(&request()).await.unwrap().content, "first");
        assert_eq!(provider.complete(&request()).await.unwrap().content, "second");
        let recorded = provider.recorded_requests();
        assert_eq!(recorded.lock().len(), 2);
    }
}
