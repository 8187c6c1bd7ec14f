use async_trait::async_trait;
use tracing::info;

use cascadeflow_core::{CascadeError, Result, Role, ToolCall, Usage};

use crate::provider::*;

/// OpenAI-compatible API provider (works with OpenAI, Azure, Together, Groq,
/// vLLM, and anything else speaking the chat-completions shape).
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            provider_name: "openai".into(),
        }
    }

    /// Use a custom base URL (for Azure, Together, vLLM, etc.)
    pub fn with_base_url(mut self, url: String, name: String) -> Self {
        self.base_url = url;
        self.provider_name = name;
        self
    }

    fn build_body(&self, request: &LlmRequest, stream: bool) -> serde_json::Value {
        let mut messages = Vec::new();

        if let Some(ref system) = request.system {
            messages.push(serde_json::json!({
                "role": "system",
                "content": system,
            }));
        }

        for msg in &request.messages {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(serde_json::json!({
                "role": role,
                "content": msg.content,
            }));
        }

        let mut body = serde_json::json!({
            "model": &request.model,
            "temperature": request.temperature,
            "messages": messages,
            "logprobs": true,
        });

        // Newer OpenAI models (o1, o3, gpt-5, …) require max_completion_tokens
        if uses_max_completion_tokens(&request.model) {
            body["max_completion_tokens"] = serde_json::json!(request.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
        }

        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> =
                request.tools.iter().map(|t| t.to_openai_format()).collect();
            body["tools"] = serde_json::json!(tools);
        }

        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        body
    }
}

/// Mean token probability from a chat-completions logprobs block.
fn mean_token_probability(choice: &serde_json::Value) -> Option<f64> {
    let tokens = choice["logprobs"]["content"].as_array()?;
    if tokens.is_empty() {
        return None;
    }
    let sum: f64 = tokens
        .iter()
        .filter_map(|t| t["logprob"].as_f64())
        .sum();
    let mean = sum / tokens.len() as f64;
    Some(mean.exp().clamp(0.0, 1.0))
}

fn parse_tool_calls(message: &serde_json::Value) -> Vec<ToolCall> {
    message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    Some(ToolCall {
                        id: c["id"].as_str()?.to_string(),
                        name: c["function"]["name"].as_str()?.to_string(),
                        arguments: serde_json::from_str(
                            c["function"]["arguments"].as_str().unwrap_or("{}"),
                        )
                        .unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn models(&self) -> Vec<String> {
        vec![
            "gpt-4o".into(),
            "gpt-4o-mini".into(),
            "gpt-4.1".into(),
            "gpt-4.1-mini".into(),
            "o3".into(),
            "o3-mini".into(),
        ]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.build_body(request, false);

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CascadeError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let payload: Option<serde_json::Value> = resp.json().await.ok();
            return Err(CascadeError::Upstream {
                status_code: status,
                message: format!("{} chat completion failed", self.provider_name),
                payload,
            });
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CascadeError::Provider(e.to_string()))?;

        let choice = &data["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let tool_calls = parse_tool_calls(&choice["message"]);
        let has_tool_calls = !tool_calls.is_empty();
        let confidence = mean_token_probability(choice);

        let finish_reason = choice["finish_reason"].as_str().unwrap_or("");
        let usage = Usage::from_payload(&data["usage"]);

        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
            confidence,
            stop_reason: match finish_reason {
                "length" => StopReason::MaxTokens,
                "content_filter" => StopReason::ContentFilter,
                _ if has_tool_calls => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            },
        })
    }

    async fn stream(&self, request: &LlmRequest) -> Result<tokio::sync::mpsc::Receiver<LlmChunk>> {
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let body = self.build_body(request, true);

        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();

        tokio::spawn(async move {
            let resp = client
                .post(format!("{base_url}/chat/completions"))
                .header("Authorization", format!("Bearer {api_key}"))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(resp) if resp.status().is_success() => {
                    use futures::StreamExt;
                    let mut stream = resp.bytes_stream();
                    let mut buffer = String::new();
                    // Tool call deltas accumulate by index: (id, name, arguments json)
                    let mut tool_calls: std::collections::HashMap<u64, (String, String, String)> =
                        std::collections::HashMap::new();
                    let mut usage = Usage::default();
                    let mut finish_reason: Option<String> = None;

                    while let Some(chunk_result) = stream.next().await {
                        let bytes = match chunk_result {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                let _ = tx
                                    .send(LlmChunk::Error {
                                        message: e.to_string(),
                                        status_code: None,
                                    })
                                    .await;
                                return;
                            }
                        };
                        buffer.push_str(&String::from_utf8_lossy(&bytes));

                        while let Some(newline_pos) = buffer.find('\n') {
                            let line = buffer[..newline_pos].trim().to_string();
                            buffer = buffer[newline_pos + 1..].to_string();

                            if line.is_empty() || line.starts_with(':') {
                                continue;
                            }
                            let Some(data) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if data.trim() == "[DONE]" {
                                let mut indices: Vec<_> = tool_calls.keys().copied().collect();
                                indices.sort_unstable();
                                for idx in indices {
                                    let (id, name, args) = &tool_calls[&idx];
                                    let arguments: serde_json::Value =
                                        serde_json::from_str(args).unwrap_or_default();
                                    let _ = tx
                                        .send(LlmChunk::ToolCall(ToolCall {
                                            id: id.clone(),
                                            name: name.clone(),
                                            arguments,
                                        }))
                                        .await;
                                }
                                let stop = match finish_reason.as_deref() {
                                    Some("length") => StopReason::MaxTokens,
                                    Some("content_filter") => StopReason::ContentFilter,
                                    _ if !tool_calls.is_empty() => StopReason::ToolUse,
                                    _ => StopReason::EndTurn,
                                };
                                let _ = tx.send(LlmChunk::Usage(usage)).await;
                                let _ = tx.send(LlmChunk::Done(stop)).await;
                                return;
                            }
                            let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                                continue;
                            };
                            let delta = &event["choices"][0]["delta"];
                            if let Some(text) = delta["content"].as_str() {
                                if !text.is_empty() {
                                    let _ = tx.send(LlmChunk::TextDelta(text.to_string())).await;
                                }
                            }
                            if let Some(tcs) = delta["tool_calls"].as_array() {
                                for tc in tcs {
                                    let idx = tc["index"].as_u64().unwrap_or(0);
                                    let entry = tool_calls.entry(idx).or_default();
                                    if let Some(id) = tc["id"].as_str() {
                                        entry.0 = id.to_string();
                                    }
                                    if let Some(name) = tc["function"]["name"].as_str() {
                                        entry.1.push_str(name);
                                    }
                                    if let Some(args) = tc["function"]["arguments"].as_str() {
                                        entry.2.push_str(args);
                                    }
                                }
                            }
                            if let Some(fr) = event["choices"][0]["finish_reason"].as_str() {
                                finish_reason = Some(fr.to_string());
                            }
                            // Usage arrives in the final chunk with stream_options
                            if event.get("usage").map(|u| !u.is_null()).unwrap_or(false) {
                                usage = Usage::from_payload(&event["usage"]);
                            }
                        }
                    }
                    // Stream ended without [DONE]
                    let _ = tx.send(LlmChunk::Done(StopReason::EndTurn)).await;
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let text = resp.text().await.unwrap_or_default();
                    let _ = tx
                        .send(LlmChunk::Error {
                            message: text,
                            status_code: Some(status),
                        })
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(LlmChunk::Error {
                            message: e.to_string(),
                            status_code: None,
                        })
                        .await;
                }
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<()> {
        info!(provider = self.provider_name, "checking API health");
        if self.api_key.is_empty() {
            return Err(CascadeError::Provider(format!(
                "{} API key not set",
                self.provider_name
            )));
        }
        Ok(())
    }
}

/// Returns true for models that require `max_completion_tokens` instead of `max_tokens`.
fn uses_max_completion_tokens(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("o1")
        || m.starts_with("o3")
        || m.starts_with("o4")
        || m.contains("gpt-5")
        || m.contains("gpt5")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_max_completion_tokens_gate() {
        assert!(uses_max_completion_tokens("o3-mini"));
        assert!(uses_max_completion_tokens("gpt-5"));
        assert!(!uses_max_completion_tokens("gpt-4o-mini"));
    }

    #[test]
    fn test_mean_token_probability() {
        let choice = json!({
            "logprobs": {
                "content": [
                    {"token": "a", "logprob": 0.0},
                    {"token": "b", "logprob": 0.0},
                ]
            }
        });
        let p = mean_token_probability(&choice).unwrap();
        assert!((p - 1.0).abs() < 1e-9);

        let missing = json!({"logprobs": null});
        assert!(mean_token_probability(&missing).is_none());
    }

    #[test]
    fn test_parse_tool_calls() {
        let message = json!({
            "tool_calls": [{
                "id": "call_1",
                "function": {"name": "get_weather", "arguments": "{\"city\":\"Zurich\"}"},
            }]
        });
        let calls = parse_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].arguments["city"], "Zurich");
    }
}
