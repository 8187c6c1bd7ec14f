use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use cascadeflow_core::{CascadeError, Result, Role, ToolCall, Usage};

use crate::provider::*;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages API provider.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.anthropic.com/v1".into(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn build_body(&self, request: &LlmRequest, stream: bool) -> serde_json::Value {
        let mut messages = Vec::new();
        for msg in &request.messages {
            match msg.role {
                // System turns travel in the top-level "system" field.
                Role::System => continue,
                Role::User => messages.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content,
                })),
                Role::Assistant => messages.push(serde_json::json!({
                    "role": "assistant",
                    "content": msg.content,
                })),
            }
        }

        let mut body = serde_json::json!({
            "model": &request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });

        let system = request.system.clone().or_else(|| {
            let joined: Vec<&str> = request
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.content.as_str())
                .collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined.join("\n"))
            }
        });
        if let Some(system) = system {
            body["system"] = serde_json::json!(system);
        }

        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> =
                request.tools.iter().map(|t| t.to_anthropic_format()).collect();
            body["tools"] = serde_json::json!(tools);
        }

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        body
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn models(&self) -> Vec<String> {
        vec![
            "claude-opus-4-1".into(),
            "claude-sonnet-4-5".into(),
            "claude-3-5-haiku-latest".into(),
        ]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.build_body(request, false);

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| CascadeError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let payload: Option<serde_json::Value> = resp.json().await.ok();
            return Err(CascadeError::Upstream {
                status_code: status,
                message: "anthropic message request failed".into(),
                payload,
            });
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CascadeError::Provider(e.to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(blocks) = data["content"].as_array() {
            for block in blocks {
                match block["type"].as_str() {
                    Some("text") => content.push_str(block["text"].as_str().unwrap_or("")),
                    Some("tool_use") => tool_calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].clone(),
                    }),
                    _ => {}
                }
            }
        }

        let usage = Usage::from_payload(&data["usage"]);
        let has_tool_calls = !tool_calls.is_empty();

        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
            // The messages API exposes no token-level confidence signal.
            confidence: None,
            stop_reason: match data["stop_reason"].as_str() {
                Some("max_tokens") => StopReason::MaxTokens,
                Some("tool_use") => StopReason::ToolUse,
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
                .post(format!("{base_url}/messages"))
                .header("x-api-key", &api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(resp) if resp.status().is_success() => {
                    use futures::StreamExt;
                    let mut stream = resp.bytes_stream();
                    let mut buffer = String::new();
                    let mut usage = Usage::default();
                    let mut stop_reason = StopReason::EndTurn;
                    // In-flight tool_use block: (id, name, accumulated json)
                    let mut pending_tool: Option<(String, String, String)> = None;

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

                            let Some(data) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                                continue;
                            };

                            match event["type"].as_str() {
                                Some("message_start") => {
                                    usage.merge(&Usage::from_payload(
                                        &event["message"]["usage"],
                                    ));
                                }
                                Some("content_block_start") => {
                                    let block = &event["content_block"];
                                    if block["type"].as_str() == Some("tool_use") {
                                        pending_tool = Some((
                                            block["id"].as_str().unwrap_or_default().to_string(),
                                            block["name"].as_str().unwrap_or_default().to_string(),
                                            String::new(),
                                        ));
                                    }
                                }
                                Some("content_block_delta") => {
                                    let delta = &event["delta"];
                                    match delta["type"].as_str() {
                                        Some("text_delta") => {
                                            if let Some(text) = delta["text"].as_str() {
                                                let _ = tx
                                                    .send(LlmChunk::TextDelta(text.to_string()))
                                                    .await;
                                            }
                                        }
                                        Some("input_json_delta") => {
                                            if let Some((_, _, args)) = pending_tool.as_mut() {
                                                args.push_str(
                                                    delta["partial_json"].as_str().unwrap_or(""),
                                                );
                                            }
                                        }
                                        _ => {}
                                    }
                                }
                                Some("content_block_stop") => {
                                    if let Some((id, name, args)) = pending_tool.take() {
                                        let arguments =
                                            serde_json::from_str(&args).unwrap_or_default();
                                        stop_reason = StopReason::ToolUse;
                                        let _ = tx
                                            .send(LlmChunk::ToolCall(ToolCall {
                                                id,
                                                name,
                                                arguments,
                                            }))
                                            .await;
                                    }
                                }
                                Some("message_delta") => {
                                    usage.merge(&Usage::from_payload(&event["usage"]));
                                    if event["delta"]["stop_reason"].as_str()
                                        == Some("max_tokens")
                                    {
                                        stop_reason = StopReason::MaxTokens;
                                    }
                                }
                                Some("message_stop") => {
                                    let _ = tx.send(LlmChunk::Usage(usage)).await;
                                    let _ = tx.send(LlmChunk::Done(stop_reason)).await;
                                    return;
                                }
                                Some("error") => {
                                    let _ = tx
                                        .send(LlmChunk::Error {
                                            message: event["error"]["message"]
                                                .as_str()
                                                .unwrap_or("anthropic stream error")
                                                .to_string(),
                                            status_code: Some(529),
                                        })
                                        .await;
                                    return;
                                }
                                _ => {}
                            }
                        }
                    }
                    let _ = tx.send(LlmChunk::Done(stop_reason)).await;
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
        info!(provider = "anthropic", "checking API health");
        if self.api_key.is_empty() {
            return Err(CascadeError::Provider("anthropic API key not set".into()));
        }
        Ok(())
    }
}
