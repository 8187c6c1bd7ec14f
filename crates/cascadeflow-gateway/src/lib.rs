//! # cascadeflow-gateway
//!
//! Multi-tenant HTTP gateway exposing OpenAI- and Anthropic-compatible
//! endpoints over the speculative cascade. Handles auth, demo-mode quotas,
//! virtual model resolution, SSE translation, and telemetry recording.

pub mod config;
pub mod demo;
pub mod errors;
pub mod mock;
pub mod translate;

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response, Sse},
    routing::{get, post},
};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};

use cascadeflow_core::{
    ChunkPhase, StreamEvent, extract_prompt_text, normalize_tools,
    message::parse_messages,
};
use cascadeflow_engine::{CascadeEngine, CascadeRequest};
use cascadeflow_telemetry::{CostTracker, MetricsCollector};

pub use config::{FileConfig, GatewayConfig, GatewayMode, RESERVED_VIRTUAL_MODELS};
use demo::{DemoDecision, DemoLimiter};
use errors::{ApiFamily, WireError, map_error};
use translate::StreamContext;

/// Shared server state. Inject fresh copies in tests; the binary builds one
/// per process.
pub struct AppState {
    pub config: GatewayConfig,
    /// Present in agent mode only.
    pub engine: Option<Arc<CascadeEngine>>,
    pub tracker: Arc<CostTracker>,
    pub metrics: Arc<MetricsCollector>,
    pub demo: DemoLimiter,
}

/// Demo quota info attached to successful demo responses.
#[derive(Debug, Clone, Copy)]
struct DemoInfo {
    remaining: u32,
    limit: u32,
}

/// Build the Axum router.
pub fn build_router(
    config: GatewayConfig,
    engine: Option<Arc<CascadeEngine>>,
    tracker: Arc<CostTracker>,
    metrics: Arc<MetricsCollector>,
) -> Router {
    let demo = DemoLimiter::new(config.demo_max_queries, config.demo_window);
    let state = Arc::new(AppState {
        config,
        engine,
        tracker,
        metrics,
        demo,
    });

    // Periodically evict expired demo windows.
    tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(300)).await;
                state.demo.cleanup();
            }
        }
    });

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/v1/models", get(models_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/completions", post(completions_handler))
        .route("/v1/embeddings", post(embeddings_handler))
        .route("/v1/messages", post(messages_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gateway_headers_middleware,
        ))
        .with_state(state)
}

/// Start the HTTP server. Returns after shutdown.
pub async fn serve(
    listener: tokio::net::TcpListener,
    router: Router,
) -> cascadeflow_core::Result<()> {
    axum::serve(listener, router)
        .await
        .map_err(|e| cascadeflow_core::CascadeError::Config(format!("server error: {e}")))?;
    Ok(())
}

// ── Middleware ─────────────────────────────────────────────────

fn endpoint_label(path: &str) -> (&'static str, Option<&'static str>) {
    match path {
        "/health" => ("health", None),
        "/stats" => ("stats", None),
        "/v1/models" => ("models.list", Some("openai")),
        "/v1/chat/completions" => ("chat.completions", Some("openai")),
        "/v1/completions" => ("completions", Some("openai")),
        "/v1/embeddings" => ("embeddings", Some("openai")),
        "/v1/messages" => ("messages", Some("anthropic")),
        _ => ("unknown", None),
    }
}

/// Attach the gateway identification headers and the CORS origin to every
/// response.
async fn gateway_headers_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let (endpoint, api) = endpoint_label(request.uri().path());
    let mut response = next.run(request).await;

    if state.config.gateway_headers {
        let headers = response.headers_mut();
        headers.insert("X-Cascadeflow-Gateway", HeaderValue::from_static("cascadeflow"));
        headers.insert(
            "X-Cascadeflow-Gateway-Mode",
            HeaderValue::from_static(state.config.mode.as_str()),
        );
        headers.insert(
            "X-Cascadeflow-Gateway-Endpoint",
            HeaderValue::from_static(endpoint),
        );
        if let Some(api) = api {
            headers.insert("X-Cascadeflow-Gateway-API", HeaderValue::from_static(api));
        }
    }
    if let Some(origin) = &state.config.cors_allow_origin {
        if let Ok(value) = HeaderValue::from_str(origin) {
            response
                .headers_mut()
                .insert("Access-Control-Allow-Origin", value);
        }
    }

    response
}

// ── Auth & demo gating ─────────────────────────────────────────

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Client IP for demo-quota keying: X-Forwarded-For, then X-Real-IP, then
/// localhost.
fn extract_client_ip(headers: &HeaderMap) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

/// Gate a billable endpoint. Returns demo info for demo requests, or the
/// finished error response for refused ones. Runs before any model work so a
/// refused request produces no cost entry.
fn check_access(
    state: &AppState,
    headers: &HeaderMap,
    family: ApiFamily,
) -> Result<Option<DemoInfo>, Response> {
    let token = bearer_token(headers);

    let authorized = match &state.config.auth_token {
        Some(expected) => token == Some(expected.as_str()),
        None => !state.config.demo_mode,
    };
    if authorized {
        return Ok(None);
    }

    if !state.config.demo_mode {
        warn!("unauthorized request, invalid or missing bearer token");
        let wire = WireError {
            status: StatusCode::UNAUTHORIZED,
            error_type: match family {
                ApiFamily::OpenAi => "invalid_request_error",
                ApiFamily::Anthropic => "authentication_error",
            },
            message: "invalid or missing bearer token".into(),
        };
        return Err((wire.status, Json(wire.body(family))).into_response());
    }

    // Demo mode: anonymous (or wrong-token) callers get a per-IP quota.
    let ip = extract_client_ip(headers);
    match state.demo.check(ip) {
        DemoDecision::Allowed { remaining } => Ok(Some(DemoInfo {
            remaining,
            limit: state.demo.max_queries(),
        })),
        DemoDecision::Limited => {
            info!(client_ip = %ip, "demo quota exhausted");
            let wire = WireError {
                status: StatusCode::TOO_MANY_REQUESTS,
                error_type: match family {
                    ApiFamily::OpenAi => "rate_limit_exceeded",
                    ApiFamily::Anthropic => "rate_limit_error",
                },
                message: "Demo limit reached. Please try again later.".into(),
            };
            Err((wire.status, Json(wire.body(family))).into_response())
        }
    }
}

fn stats_authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let token = bearer_token(headers);
    match (&state.config.stats_auth_token, &state.config.auth_token) {
        (Some(stats_token), _) => token == Some(stats_token.as_str()),
        (None, Some(auth_token)) => token == Some(auth_token.as_str()),
        (None, None) => true,
    }
}

// ── Shared response assembly ───────────────────────────────────

struct ResponseMeta {
    model_used: String,
    draft_accepted: bool,
    quality_score: f64,
    complexity: String,
    cascade_overhead_ms: f64,
    cost: f64,
}

fn cascadeflow_object(
    state: &AppState,
    endpoint: &str,
    meta: &ResponseMeta,
    demo: Option<DemoInfo>,
) -> Value {
    let mut metadata = json!({
        "draft_accepted": meta.draft_accepted,
        "quality_score": meta.quality_score,
        "complexity": meta.complexity,
        "cascade_overhead": meta.cascade_overhead_ms,
    });
    if let Some(demo) = demo {
        metadata["demo_queries_remaining"] = json!(demo.remaining);
        metadata["demo_queries_limit"] = json!(demo.limit);
    }
    let mut object = json!({
        "model_used": meta.model_used,
        "metadata": metadata,
        "cost": meta.cost,
    });
    if state.config.include_gateway_metadata {
        object["gateway"] = json!({"endpoint": endpoint});
    }
    object
}

fn parse_json_body(bytes: &Bytes, family: ApiFamily) -> Result<Value, Response> {
    serde_json::from_slice::<Value>(bytes).map_err(|_| {
        let wire = WireError::invalid_request("Invalid JSON payload");
        (wire.status, Json(wire.body(family))).into_response()
    })
}

fn require_model<'a>(body: &'a Value, family: ApiFamily) -> Result<&'a str, Response> {
    body.get("model")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            let wire = WireError::invalid_request("Model is required");
            (wire.status, Json(wire.body(family))).into_response()
        })
}

fn require_messages<'a>(body: &'a Value, family: ApiFamily) -> Result<&'a Vec<Value>, Response> {
    body.get("messages")
        .and_then(|m| m.as_array())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            let wire = WireError::invalid_request("Messages are required");
            (wire.status, Json(wire.body(family))).into_response()
        })
}

fn wire_error_response(err: &cascadeflow_core::CascadeError, family: ApiFamily) -> Response {
    let wire = map_error(err, family);
    (wire.status, Json(wire.body(family))).into_response()
}

/// Outcome of running the pipeline, normalized across mock and agent mode.
struct PipelineOutput {
    content: String,
    tool_calls: Vec<Value>,
    input_tokens: u64,
    output_tokens: u64,
    meta: ResponseMeta,
}

/// Mock-mode execution: deterministic response, heuristic cascade decision.
fn run_mock(state: &AppState, resolved: &str, virtual_model: &str, prompt: &str) -> PipelineOutput {
    let draft_accepted = mock::decide_draft_acceptance(prompt);
    let content = mock::build_response_text(prompt);
    let input_tokens = mock::estimate_tokens(prompt);
    let output_tokens = mock::estimate_tokens(&content);
    let total = input_tokens + output_tokens;
    let cost = total as f64 * state.config.token_cost;

    let mut metadata = Map::new();
    metadata.insert("virtual_model".into(), json!(virtual_model));
    metadata.insert("draft_accepted".into(), json!(draft_accepted));
    metadata.insert("input_tokens".into(), json!(input_tokens));
    metadata.insert("output_tokens".into(), json!(output_tokens));
    state
        .tracker
        .add_cost(resolved, "proxy", total, cost, None, metadata);
    state.metrics.record(cost, 0.0, 0.0, draft_accepted, &Map::new());

    PipelineOutput {
        content,
        tool_calls: vec![],
        input_tokens,
        output_tokens,
        meta: ResponseMeta {
            model_used: resolved.to_string(),
            draft_accepted,
            quality_score: if draft_accepted { 0.9 } else { 0.3 },
            complexity: if draft_accepted { "simple" } else { "complex" }.to_string(),
            cascade_overhead_ms: 0.0,
            cost,
        },
    }
}

/// Agent-mode execution through the cascade engine.
async fn run_agent(
    state: &AppState,
    engine: &Arc<CascadeEngine>,
    virtual_model: &str,
    request: CascadeRequest,
) -> cascadeflow_core::Result<PipelineOutput> {
    let result = engine.run(&request).await?;

    let total = result
        .metadata
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let mut metadata = result.metadata.clone();
    metadata.insert("virtual_model".into(), json!(virtual_model));
    state
        .tracker
        .add_cost(&result.model_used, "cascade", total, result.cost, None, metadata);
    state.metrics.record(
        result.cost,
        result.cost_saved,
        result
            .metadata
            .get("cascade_overhead_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0),
        result.draft_accepted,
        &result.metadata,
    );

    let input_tokens = result
        .metadata
        .get(if result.draft_accepted {
            "draft_prompt_tokens"
        } else {
            "verifier_prompt_tokens"
        })
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let output_tokens = result
        .metadata
        .get(if result.draft_accepted {
            "draft_completion_tokens"
        } else {
            "verifier_completion_tokens"
        })
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let tool_calls = result
        .tool_calls
        .clone()
        .unwrap_or_default()
        .iter()
        .map(|tc| {
            json!({
                "id": tc.id,
                "type": "function",
                "function": {"name": tc.name, "arguments": tc.arguments.to_string()},
            })
        })
        .collect();

    Ok(PipelineOutput {
        content: result.content.clone(),
        tool_calls,
        input_tokens,
        output_tokens,
        meta: ResponseMeta {
            model_used: result.model_used.clone(),
            draft_accepted: result.draft_accepted,
            quality_score: result.quality_score,
            complexity: result.complexity.clone(),
            cascade_overhead_ms: result
                .metadata
                .get("cascade_overhead_ms")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            cost: result.cost,
        },
    })
}

/// Fabricate the event stream for a mock response so streaming clients go
/// through the same translator as agent mode.
fn mock_event_stream(output: &PipelineOutput) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(16);
    let content = output.content.clone();
    let prompt_tokens = output.input_tokens;
    let completion_tokens = output.output_tokens;
    let draft_accepted = output.meta.draft_accepted;
    let model_used = output.meta.model_used.clone();
    let cost = output.meta.cost;

    tokio::spawn(async move {
        let _ = tx
            .send(StreamEvent::Routing {
                data: json!({"strategy": "mock"}),
            })
            .await;
        // Two chunks, like any real stream would produce.
        let midpoint = content.len() / 2;
        let midpoint = (0..=midpoint)
            .rev()
            .find(|i| content.is_char_boundary(*i))
            .unwrap_or(0);
        let (head, tail) = content.split_at(midpoint);
        for part in [head, tail] {
            if !part.is_empty() {
                let _ = tx
                    .send(StreamEvent::TextChunk {
                        content: part.to_string(),
                        phase: ChunkPhase::Direct,
                    })
                    .await;
            }
        }
        let _ = tx
            .send(StreamEvent::Complete {
                data: json!({"result": {
                    "content": content,
                    "model_used": model_used,
                    "draft_accepted": draft_accepted,
                    "prompt_tokens": prompt_tokens,
                    "completion_tokens": completion_tokens,
                    "total_tokens": prompt_tokens + completion_tokens,
                    "cost": cost,
                }}),
            })
            .await;
    });

    rx
}

/// Tap an agent event stream to record telemetry when the result completes,
/// forwarding every event untouched.
fn instrument_stream(
    state: Arc<AppState>,
    virtual_model: String,
    mut rx: mpsc::Receiver<StreamEvent>,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, out) = mpsc::channel(256);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let StreamEvent::Complete { data } = &event {
                let result = &data["result"];
                let cost = result["cost"].as_f64().unwrap_or(0.0);
                let saved = result["cost_saved"].as_f64().unwrap_or(0.0);
                let accepted = result["draft_accepted"].as_bool().unwrap_or(false);
                let tokens = result["total_tokens"].as_u64().unwrap_or(0);
                let model = result["model_used"].as_str().unwrap_or("cascade").to_string();
                let mut metadata = result["metadata"].as_object().cloned().unwrap_or_default();
                metadata.insert("virtual_model".into(), json!(virtual_model));
                let overhead = metadata
                    .get("cascade_overhead_ms")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                state
                    .tracker
                    .add_cost(&model, "cascade", tokens, cost, None, metadata.clone());
                state.metrics.record(cost, saved, overhead, accepted, &metadata);
            }
            if let StreamEvent::Error { .. } = &event {
                state.metrics.record_error();
            }
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });
    out
}

fn stream_context(
    resolved: &str,
    virtual_model: &str,
    include_usage: bool,
    demo: Option<DemoInfo>,
    id_prefix: &str,
) -> StreamContext {
    let mut cascadeflow = json!({
        "virtual_model": virtual_model,
        "resolved_model": resolved,
    });
    if let Some(demo) = demo {
        cascadeflow["metadata"] = json!({
            "demo_queries_remaining": demo.remaining,
            "demo_queries_limit": demo.limit,
        });
    }
    StreamContext {
        id: format!("{id_prefix}-{}", uuid::Uuid::new_v4().simple()),
        model: resolved.to_string(),
        created: chrono::Utc::now().timestamp(),
        include_usage,
        cascadeflow,
    }
}

// ── Handlers ───────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "mode": state.config.mode.as_str(),
    }))
}

async fn stats_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !stats_authorized(&state, &headers) {
        let wire = WireError {
            status: StatusCode::UNAUTHORIZED,
            error_type: "invalid_request_error",
            message: "invalid or missing bearer token".into(),
        };
        return (wire.status, Json(wire.body(ApiFamily::OpenAi))).into_response();
    }

    Json(json!({
        "summary": state.metrics.summary(),
        "costs": state.tracker.summary(),
    }))
    .into_response()
}

async fn models_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let created = chrono::Utc::now().timestamp();
    let mut ids: Vec<&str> = RESERVED_VIRTUAL_MODELS.to_vec();
    for model in &state.config.advertise_models {
        ids.push(model.as_str());
    }
    let data: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "cascadeflow",
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let family = ApiFamily::OpenAi;
    let demo = match check_access(&state, &headers, family) {
        Ok(demo) => demo,
        Err(response) => return response,
    };

    let body = match parse_json_body(&bytes, family) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let model = match require_model(&body, family) {
        Ok(model) => model.to_string(),
        Err(response) => return response,
    };
    let messages = match require_messages(&body, family) {
        Ok(messages) => messages.clone(),
        Err(response) => return response,
    };

    let resolved = state.config.resolve_model(&model).to_string();
    let wants_stream = body["stream"].as_bool().unwrap_or(false);
    let streaming = wants_stream && state.config.allow_streaming;
    let include_usage = body["stream_options"]["include_usage"]
        .as_bool()
        .unwrap_or(false);
    let tools = body["tools"]
        .as_array()
        .map(|tools| normalize_tools(tools))
        .unwrap_or_default();

    match (&state.engine, state.config.mode) {
        (Some(engine), GatewayMode::Agent) => {
            let request = CascadeRequest {
                messages: parse_messages(&messages),
                tools,
                max_tokens: body["max_tokens"].as_u64().map(|v| v as u32),
                temperature: body["temperature"].as_f64().map(|v| v as f32),
            };
            if streaming {
                let rx = engine.stream(request);
                let rx = instrument_stream(Arc::clone(&state), model.clone(), rx);
                let ctx = stream_context(&resolved, &model, include_usage, demo, "chatcmpl");
                return Sse::new(translate::openai_sse(rx, ctx)).into_response();
            }
            match run_agent(&state, engine, &model, request).await {
                Ok(output) => openai_chat_response(&state, &resolved, output, demo),
                Err(err) => {
                    state.metrics.record_error();
                    wire_error_response(&err, family)
                }
            }
        }
        _ => {
            let prompt = extract_prompt_text(&messages);
            let output = run_mock(&state, &resolved, &model, &prompt);
            if streaming {
                let rx = mock_event_stream(&output);
                let ctx = stream_context(&resolved, &model, include_usage, demo, "chatcmpl");
                return Sse::new(translate::openai_sse(rx, ctx)).into_response();
            }
            openai_chat_response(&state, &resolved, output, demo)
        }
    }
}

fn openai_chat_response(
    state: &AppState,
    resolved: &str,
    output: PipelineOutput,
    demo: Option<DemoInfo>,
) -> Response {
    let finish_reason = if output.tool_calls.is_empty() {
        "stop"
    } else {
        "tool_calls"
    };
    let mut message = json!({"role": "assistant", "content": output.content});
    if !output.tool_calls.is_empty() {
        message["tool_calls"] = json!(output.tool_calls);
    }

    Json(json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": resolved,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": output.input_tokens,
            "completion_tokens": output.output_tokens,
            "total_tokens": output.input_tokens + output.output_tokens,
        },
        "cascadeflow": cascadeflow_object(state, "chat.completions", &output.meta, demo),
    }))
    .into_response()
}

async fn completions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let family = ApiFamily::OpenAi;
    let demo = match check_access(&state, &headers, family) {
        Ok(demo) => demo,
        Err(response) => return response,
    };
    let body = match parse_json_body(&bytes, family) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let model = match require_model(&body, family) {
        Ok(model) => model.to_string(),
        Err(response) => return response,
    };
    let prompt = match &body["prompt"] {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        _ => {
            let wire = WireError::invalid_request("Prompt is required");
            return (wire.status, Json(wire.body(family))).into_response();
        }
    };

    let resolved = state.config.resolve_model(&model).to_string();

    let output = match (&state.engine, state.config.mode) {
        (Some(engine), GatewayMode::Agent) => {
            match run_agent(&state, engine, &model, CascadeRequest::from_prompt(&prompt)).await {
                Ok(output) => output,
                Err(err) => {
                    state.metrics.record_error();
                    return wire_error_response(&err, family);
                }
            }
        }
        _ => run_mock(&state, &resolved, &model, &prompt),
    };

    Json(json!({
        "id": format!("cmpl-{}", uuid::Uuid::new_v4().simple()),
        "object": "text_completion",
        "created": chrono::Utc::now().timestamp(),
        "model": resolved,
        "choices": [{
            "text": output.content,
            "index": 0,
            "logprobs": null,
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": output.input_tokens,
            "completion_tokens": output.output_tokens,
            "total_tokens": output.input_tokens + output.output_tokens,
        },
        "cascadeflow": cascadeflow_object(&state, "completions", &output.meta, demo),
    }))
    .into_response()
}

async fn embeddings_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let family = ApiFamily::OpenAi;
    if let Err(response) = check_access(&state, &headers, family) {
        return response;
    }
    let body = match parse_json_body(&bytes, family) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let model = match require_model(&body, family) {
        Ok(model) => model.to_string(),
        Err(response) => return response,
    };

    let inputs: Vec<String> = match &body["input"] {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i.as_str().map(|s| s.to_string()))
            .collect(),
        _ => {
            let wire = WireError::invalid_request("Input is required");
            return (wire.status, Json(wire.body(family))).into_response();
        }
    };

    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(index, text)| {
            json!({
                "object": "embedding",
                "index": index,
                "embedding": mock::mock_embedding(text),
            })
        })
        .collect();
    let tokens: u64 = inputs.iter().map(|t| mock::estimate_tokens(t)).sum();

    Json(json!({
        "object": "list",
        "data": data,
        "model": state.config.resolve_model(&model),
        "usage": {"prompt_tokens": tokens, "total_tokens": tokens},
    }))
    .into_response()
}

async fn messages_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Response {
    let family = ApiFamily::Anthropic;
    let demo = match check_access(&state, &headers, family) {
        Ok(demo) => demo,
        Err(response) => return response,
    };
    let body = match parse_json_body(&bytes, family) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let model = match require_model(&body, family) {
        Ok(model) => model.to_string(),
        Err(response) => return response,
    };
    let messages = match require_messages(&body, family) {
        Ok(messages) => messages.clone(),
        Err(response) => return response,
    };

    let resolved = state.config.resolve_model(&model).to_string();
    let wants_stream = body["stream"].as_bool().unwrap_or(false);
    let streaming = wants_stream && state.config.allow_streaming;
    let tools = body["tools"]
        .as_array()
        .map(|tools| normalize_tools(tools))
        .unwrap_or_default();

    match (&state.engine, state.config.mode) {
        (Some(engine), GatewayMode::Agent) => {
            let request = CascadeRequest {
                messages: parse_messages(&messages),
                tools,
                max_tokens: body["max_tokens"].as_u64().map(|v| v as u32),
                temperature: body["temperature"].as_f64().map(|v| v as f32),
            };
            if streaming {
                let rx = engine.stream(request);
                let rx = instrument_stream(Arc::clone(&state), model.clone(), rx);
                let ctx = stream_context(&resolved, &model, false, demo, "msg");
                return Sse::new(translate::anthropic_sse(rx, ctx)).into_response();
            }
            match run_agent(&state, engine, &model, request).await {
                Ok(output) => anthropic_message_response(&state, &resolved, output, demo),
                Err(err) => {
                    state.metrics.record_error();
                    wire_error_response(&err, family)
                }
            }
        }
        _ => {
            let prompt = extract_prompt_text(&messages);
            let output = run_mock(&state, &resolved, &model, &prompt);
            if streaming {
                let rx = mock_event_stream(&output);
                let ctx = stream_context(&resolved, &model, false, demo, "msg");
                return Sse::new(translate::anthropic_sse(rx, ctx)).into_response();
            }
            anthropic_message_response(&state, &resolved, output, demo)
        }
    }
}

fn anthropic_message_response(
    state: &AppState,
    resolved: &str,
    output: PipelineOutput,
    demo: Option<DemoInfo>,
) -> Response {
    let mut content = vec![json!({"type": "text", "text": output.content})];
    for tc in &output.tool_calls {
        content.push(json!({
            "type": "tool_use",
            "id": tc["id"],
            "name": tc["function"]["name"],
            "input": serde_json::from_str::<Value>(
                tc["function"]["arguments"].as_str().unwrap_or("{}")
            )
            .unwrap_or_default(),
        }));
    }

    Json(json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": resolved,
        "content": content,
        "stop_reason": if output.tool_calls.is_empty() { "end_turn" } else { "tool_use" },
        "usage": {
            "input_tokens": output.input_tokens,
            "output_tokens": output.output_tokens,
        },
        "cascadeflow": cascadeflow_object(state, "messages", &output.meta, demo),
    }))
    .into_response()
}
