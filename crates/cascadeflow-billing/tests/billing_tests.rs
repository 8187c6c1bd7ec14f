//! Billing client and background-reporting tests against local fixtures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use axum::{Json, Router, extract::State, http::HeaderMap, routing::post};
use parking_lot::Mutex as PlMutex;
use serde_json::{Value, json};

use cascadeflow_billing::{
    BillingProxyService, PaygenticClient, PaygenticConfig, QuantityMode, UsageReporter,
};
use cascadeflow_core::CascadeError;
use cascadeflow_proxy::{ProxyHandler, ProxyRequest, ProxyRoute, ProxyRouter, ProxyService};

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Clone, Default)]
struct BillingFixture {
    hits: Arc<AtomicU32>,
    fail_first: Arc<AtomicU32>,
    delay_ms: u64,
    last: Arc<PlMutex<Option<(HeaderMap, Value)>>>,
}

async fn usage_endpoint(
    State(fixture): State<BillingFixture>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (axum::http::StatusCode, Json<Value>) {
    if fixture.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(fixture.delay_ms)).await;
    }
    let hit = fixture.hits.fetch_add(1, Ordering::SeqCst);
    if hit < fixture.fail_first.load(Ordering::SeqCst) {
        return (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "temporarily unavailable"})),
        );
    }
    *fixture.last.lock() = Some((headers, body));
    (axum::http::StatusCode::OK, Json(json!({"ok": true})))
}

fn billing_app(fixture: BillingFixture) -> Router {
    Router::new()
        .route("/v0/usage", post(usage_endpoint))
        .route("/v0/customers", post(usage_endpoint))
        .with_state(fixture)
}

fn config(base_url: &str) -> PaygenticConfig {
    let mut config = PaygenticConfig::new("test-key", "merchant-1", "metric-1")
        .with_base_url(base_url);
    config.max_retries = 2;
    config.retry_backoff = Duration::from_millis(1);
    config
}

#[tokio::test]
async fn usage_event_carries_auth_and_idempotency() {
    let fixture = BillingFixture::default();
    let base_url = spawn(billing_app(fixture.clone())).await;
    let client = PaygenticClient::new(config(&base_url));

    let response = client
        .create_usage_event(
            "cust-1",
            42,
            Some("2026-02-16T20:00:00Z"),
            Some("idem-123"),
            Some(&json!({"source": "test"})),
        )
        .await
        .unwrap();
    assert_eq!(response, json!({"ok": true}));

    let (headers, body) = fixture.last.lock().clone().unwrap();
    assert_eq!(headers.get("authorization").unwrap(), "Bearer test-key");
    assert_eq!(headers.get("idempotency-key").unwrap(), "idem-123");
    assert_eq!(
        body,
        json!({
            "idempotencyKey": "idem-123",
            "customerId": "cust-1",
            "merchantId": "merchant-1",
            "timestamp": "2026-02-16T20:00:00Z",
            "properties": [{"billableMetricId": "metric-1", "quantity": 42}],
            "metadata": {"source": "test"},
        })
    );
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let fixture = BillingFixture::default();
    fixture.fail_first.store(1, Ordering::SeqCst);
    let base_url = spawn(billing_app(fixture.clone())).await;
    let client = PaygenticClient::new(config(&base_url));

    let response = client
        .create_usage_event("cust-1", 7, None, None, None)
        .await
        .unwrap();
    assert_eq!(response, json!({"ok": true}));
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn non_transient_errors_raise_structured_api_error() {
    async fn bad_request() -> (axum::http::StatusCode, Json<Value>) {
        (
            axum::http::StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid metric"})),
        )
    }
    let app = Router::new().route("/v0/usage", post(bad_request));
    let base_url = spawn(app).await;
    let client = PaygenticClient::new(config(&base_url));

    let err = client
        .create_usage_event("cust-1", 7, None, None, None)
        .await
        .unwrap_err();
    match err {
        CascadeError::BillingApi {
            status_code,
            message,
        } => {
            assert_eq!(status_code, Some(400));
            assert!(message.contains("invalid metric"));
        }
        other => panic!("expected billing api error, got {other:?}"),
    }
}

#[tokio::test]
async fn customer_address_is_validated() {
    let client = PaygenticClient::new(config("http://127.0.0.1:9"));
    let err = client
        .create_customer("a@b.c", "A", &json!({"line1": "Main St 1", "city": "Zurich"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CascadeError::InvalidRequest(_)));
}

fn proxy_result(tokens: u64, cost: f64) -> cascadeflow_proxy::ProxyResult {
    cascadeflow_proxy::ProxyResult {
        status_code: 200,
        headers: Default::default(),
        data: json!({}),
        provider: "openai".into(),
        model: "gpt-4o".into(),
        latency_ms: 12.0,
        usage: Some(cascadeflow_core::Usage::new(tokens / 2, tokens - tokens / 2)),
        cost: Some(cost),
    }
}

#[tokio::test]
async fn quantity_modes() {
    let client = |mode| {
        UsageReporter::new(PaygenticClient::new(config("http://127.0.0.1:9")))
            .with_quantity_mode(mode)
    };

    assert_eq!(client(QuantityMode::Tokens).quantity(&proxy_result(120, 0.5)), Some(120));
    assert_eq!(client(QuantityMode::Tokens).quantity(&proxy_result(0, 0.5)), None);
    assert_eq!(client(QuantityMode::Requests).quantity(&proxy_result(0, 0.0)), Some(1));
    assert_eq!(
        client(QuantityMode::CostUsd).quantity(&proxy_result(10, 0.5)),
        Some(500_000)
    );
    assert_eq!(client(QuantityMode::CostUsd).quantity(&proxy_result(10, 0.0)), None);
}

/// Upstream the proxy forwards to.
async fn upstream_chat(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "id": "chatcmpl-1",
        "model": body["model"],
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
    }))
}

#[tokio::test]
async fn background_reporting_never_blocks_the_request() {
    let upstream = spawn(Router::new().route("/v1/chat/completions", post(upstream_chat))).await;

    // Billing endpoint is slow: 100ms per call.
    let fixture = BillingFixture {
        delay_ms: 100,
        ..Default::default()
    };
    let billing_url = spawn(billing_app(fixture.clone())).await;

    let route = ProxyRoute::new("openai-route", "openai", &upstream).with_models(&["gpt-4o"]);
    let service = ProxyService::new(ProxyRouter::new(vec![route]), ProxyHandler::new());
    let reporter = UsageReporter::new(PaygenticClient::new(config(&billing_url)));
    let billing = BillingProxyService::new(service, reporter);

    let request = ProxyRequest::post(
        "/v1/chat/completions",
        json!({"model": "openai:gpt-4o", "messages": []}),
    )
    .with_header("x-cascadeflow-customer-id", "cust-42")
    .with_header("x-request-id", "req-1");

    let started = Instant::now();
    let result = billing.handle(&request).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.status_code, 200);
    assert!(
        elapsed < Duration::from_millis(80),
        "handle() blocked on billing: {elapsed:?}"
    );

    // The report completes during flush.
    billing.flush(Duration::from_secs(2)).await;
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 1);
    let (_, body) = fixture.last.lock().clone().unwrap();
    assert_eq!(body["customerId"], "cust-42");
    assert_eq!(body["properties"][0]["quantity"], 15);
}

#[tokio::test]
async fn requests_without_customer_header_are_not_reported() {
    let upstream = spawn(Router::new().route("/v1/chat/completions", post(upstream_chat))).await;
    let fixture = BillingFixture::default();
    let billing_url = spawn(billing_app(fixture.clone())).await;

    let route = ProxyRoute::new("openai-route", "openai", &upstream).with_models(&["gpt-4o"]);
    let service = ProxyService::new(ProxyRouter::new(vec![route]), ProxyHandler::new());
    let reporter = UsageReporter::new(PaygenticClient::new(config(&billing_url)));
    let billing = BillingProxyService::new(service, reporter);

    let request = ProxyRequest::post(
        "/v1/chat/completions",
        json!({"model": "openai:gpt-4o", "messages": []}),
    );
    billing.handle(&request).await.unwrap();
    billing.flush(Duration::from_secs(1)).await;

    assert_eq!(fixture.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn billing_failures_are_fail_open() {
    let upstream = spawn(Router::new().route("/v1/chat/completions", post(upstream_chat))).await;
    // No billing server at all.
    let route = ProxyRoute::new("openai-route", "openai", &upstream).with_models(&["gpt-4o"]);
    let service = ProxyService::new(ProxyRouter::new(vec![route]), ProxyHandler::new());
    let reporter = UsageReporter::new(PaygenticClient::new(config("http://127.0.0.1:9")))
        .with_quantity_mode(QuantityMode::Requests);
    let billing = BillingProxyService::new(service, reporter).with_foreground_reporting();

    let request = ProxyRequest::post(
        "/v1/chat/completions",
        json!({"model": "openai:gpt-4o", "messages": []}),
    )
    .with_header("x-cascadeflow-customer-id", "cust-42");

    // The request succeeds even though reporting cannot reach billing.
    let result = billing.handle(&request).await.unwrap();
    assert_eq!(result.status_code, 200);
}
