//! Internal event stream → SSE wire translation.
//!
//! The translator is a small state machine (INIT / BUFFERING_DRAFT /
//! STREAMING_ACCEPTED / STREAMING_VERIFIER / CLOSED). Draft-phase chunks are
//! held back until the draft decision resolves: flushed in order on accept,
//! discarded on reject. The client never sees rejected-draft content.

use std::convert::Infallible;

use axum::response::sse::Event as SseEvent;
use futures::stream::Stream;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use cascadeflow_core::{ChunkPhase, StreamEvent};

use crate::errors::{ApiFamily, WireError, map_upstream};

/// Per-stream identifiers and options.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub id: String,
    pub model: String,
    pub created: i64,
    /// Client sent `stream_options.include_usage`.
    pub include_usage: bool,
    /// Extra fields merged into the `cascadeflow` object of stream chunks.
    pub cascadeflow: Value,
}

fn sse_json(value: &Value) -> SseEvent {
    SseEvent::default().data(value.to_string())
}

fn sse_done() -> SseEvent {
    SseEvent::default().data("[DONE]")
}

/// Usage block with both snake_case and camelCase totals. The camelCase
/// mirror keeps older OpenAI SDK builds happy.
fn usage_block(result: &Value, content: &str) -> Value {
    let meta = &result["metadata"];
    let prompt = result["prompt_tokens"]
        .as_u64()
        .or_else(|| meta["draft_prompt_tokens"].as_u64());
    let completion = result["completion_tokens"]
        .as_u64()
        .or_else(|| meta["draft_completion_tokens"].as_u64());
    let total = result["total_tokens"]
        .as_u64()
        .filter(|t| *t > 0)
        .or_else(|| match (prompt, completion) {
            (Some(p), Some(c)) if p + c > 0 => Some(p + c),
            _ => None,
        })
        .unwrap_or_else(|| (content.split_whitespace().count() as u64).max(1));

    let mut usage = json!({
        "total_tokens": total,
        "totalTokens": total,
    });
    if let Some(prompt) = prompt {
        usage["prompt_tokens"] = json!(prompt);
    }
    if let Some(completion) = completion {
        usage["completion_tokens"] = json!(completion);
    }
    usage
}

fn map_stream_error(message: String, status_code: Option<u16>, family: ApiFamily) -> WireError {
    match status_code {
        Some(status) => map_upstream(status, &message, family),
        None => WireError {
            status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            error_type: match family {
                ApiFamily::OpenAi => "server_error",
                ApiFamily::Anthropic => "api_error",
            },
            message,
        },
    }
}

/// Translate engine events into OpenAI chat-completion SSE chunks.
pub fn openai_sse(
    mut rx: mpsc::Receiver<StreamEvent>,
    ctx: StreamContext,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    async_stream::stream! {
        let chunk_envelope = |delta: Value, finish_reason: Value| {
            let mut chunk = json!({
                "id": ctx.id,
                "object": "chat.completion.chunk",
                "created": ctx.created,
                "model": ctx.model,
                "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}],
            });
            if !ctx.cascadeflow.is_null() {
                chunk["cascadeflow"] = ctx.cascadeflow.clone();
            }
            chunk
        };

        // Initial role chunk.
        yield Ok(sse_json(&chunk_envelope(
            json!({"role": "assistant", "content": ""}),
            Value::Null,
        )));

        let mut buffered: Vec<String> = Vec::new();
        let mut decided = false;
        let mut accepted = false;
        let mut content = String::new();
        let mut tool_calls: Vec<Value> = Vec::new();
        let mut usage: Option<Value> = None;

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Routing { .. } | StreamEvent::Switch { .. } => {}
                StreamEvent::TextChunk { content: text, phase } => {
                    let emit = match phase {
                        ChunkPhase::Draft if !decided => {
                            buffered.push(text);
                            None
                        }
                        ChunkPhase::Draft => accepted.then_some(text),
                        ChunkPhase::Direct | ChunkPhase::Verifier => Some(text),
                    };
                    if let Some(text) = emit {
                        content.push_str(&text);
                        yield Ok(sse_json(&chunk_envelope(
                            json!({"content": text}),
                            Value::Null,
                        )));
                    }
                }
                StreamEvent::DraftDecision { accepted: decision, .. } => {
                    decided = true;
                    accepted = decision;
                    if decision {
                        for text in buffered.drain(..) {
                            content.push_str(&text);
                            yield Ok(sse_json(&chunk_envelope(
                                json!({"content": text}),
                                Value::Null,
                            )));
                        }
                    } else {
                        buffered.clear();
                    }
                }
                StreamEvent::ToolCallComplete { tool_call } => {
                    let rendered = json!({
                        "id": tool_call.id,
                        "type": "function",
                        "function": {
                            "name": tool_call.name,
                            "arguments": tool_call.arguments.to_string(),
                        },
                    });
                    tool_calls.push(rendered.clone());
                    yield Ok(sse_json(&chunk_envelope(
                        json!({"tool_calls": [rendered]}),
                        Value::Null,
                    )));
                }
                StreamEvent::Complete { data } => {
                    let result = &data["result"];
                    // A complete event with no preceding chunks still has to
                    // surface its content as a real delta so SDKs accumulate it.
                    if content.is_empty() {
                        if let Some(text) = result["content"].as_str() {
                            if !text.is_empty() {
                                content = text.to_string();
                                yield Ok(sse_json(&chunk_envelope(
                                    json!({"content": text}),
                                    Value::Null,
                                )));
                            }
                        }
                    }
                    usage = Some(usage_block(result, &content));
                    break;
                }
                StreamEvent::Error { message, status_code } => {
                    let wire = map_stream_error(message, status_code, ApiFamily::OpenAi);
                    yield Ok(sse_json(&wire.to_stream_chunk(&ctx.id, &ctx.model)));
                    yield Ok(sse_done());
                    return;
                }
            }
        }

        let usage = usage.unwrap_or_else(|| usage_block(&Value::Null, &content));
        let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };

        // Stop chunk carries a message mirror of everything accumulated.
        let mut message = json!({"role": "assistant", "content": content});
        if !tool_calls.is_empty() {
            message["tool_calls"] = json!(tool_calls);
        }
        let mut stop = json!({
            "id": ctx.id,
            "object": "chat.completion.chunk",
            "created": ctx.created,
            "model": ctx.model,
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": finish_reason,
                "message": message,
            }],
            "usage": usage,
        });
        if !ctx.cascadeflow.is_null() {
            stop["cascadeflow"] = ctx.cascadeflow.clone();
        }
        yield Ok(sse_json(&stop));

        if ctx.include_usage {
            yield Ok(sse_json(&json!({
                "id": ctx.id,
                "object": "chat.completion.chunk",
                "created": ctx.created,
                "model": ctx.model,
                "choices": [],
                "usage": usage,
            })));
        }

        yield Ok(sse_done());
    }
}

/// Translate engine events into Anthropic messages SSE.
pub fn anthropic_sse(
    mut rx: mpsc::Receiver<StreamEvent>,
    ctx: StreamContext,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    async_stream::stream! {
        let mut start = json!({
            "type": "message_start",
            "message": {
                "id": ctx.id,
                "type": "message",
                "role": "assistant",
                "model": ctx.model,
                "content": [],
                "usage": {"input_tokens": 0, "output_tokens": 0},
            },
        });
        if !ctx.cascadeflow.is_null() {
            start["cascadeflow"] = ctx.cascadeflow.clone();
        }
        yield Ok(SseEvent::default().event("message_start").data(start.to_string()));

        let mut buffered: Vec<String> = Vec::new();
        let mut decided = false;
        let mut accepted = false;
        let mut emitted = String::new();

        let delta_event = |text: &str| {
            let payload = json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": text},
            });
            SseEvent::default()
                .event("content_block_delta")
                .data(payload.to_string())
        };

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Routing { .. }
                | StreamEvent::Switch { .. }
                | StreamEvent::ToolCallComplete { .. } => {}
                StreamEvent::TextChunk { content: text, phase } => {
                    let emit = match phase {
                        ChunkPhase::Draft if !decided => {
                            buffered.push(text);
                            None
                        }
                        ChunkPhase::Draft => accepted.then_some(text),
                        ChunkPhase::Direct | ChunkPhase::Verifier => Some(text),
                    };
                    if let Some(text) = emit {
                        emitted.push_str(&text);
                        yield Ok(delta_event(&text));
                    }
                }
                StreamEvent::DraftDecision { accepted: decision, .. } => {
                    decided = true;
                    accepted = decision;
                    if decision {
                        for text in buffered.drain(..) {
                            emitted.push_str(&text);
                            yield Ok(delta_event(&text));
                        }
                    } else {
                        buffered.clear();
                    }
                }
                StreamEvent::Complete { data } => {
                    let result = &data["result"];
                    if emitted.is_empty() {
                        if let Some(text) = result["content"].as_str() {
                            if !text.is_empty() {
                                emitted.push_str(text);
                                yield Ok(delta_event(text));
                            }
                        }
                    }
                    break;
                }
                StreamEvent::Error { message, status_code } => {
                    let wire = map_stream_error(message, status_code, ApiFamily::Anthropic);
                    let payload = json!({
                        "type": "error",
                        "error": {"type": wire.error_type, "message": wire.message},
                    });
                    yield Ok(SseEvent::default().event("error").data(payload.to_string()));
                    yield Ok(sse_done());
                    return;
                }
            }
        }

        yield Ok(
            SseEvent::default()
                .event("message_stop")
                .data(json!({"type": "message_stop"}).to_string()),
        );
        yield Ok(sse_done());
    }
}
