use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cascadeflow_core::{CascadeError, Result};
use cascadeflow_proxy::{ProxyRequest, ProxyResult, ProxyService};

pub const DEFAULT_LIVE_URL: &str = "https://api.paygentic.io";
pub const DEFAULT_SANDBOX_URL: &str = "https://api.sandbox.paygentic.io";

const TRANSIENT_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];
const DEFAULT_CUSTOMER_HEADER: &str = "x-cascadeflow-customer-id";
const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";

/// Configuration for the Paygentic API client.
#[derive(Debug, Clone)]
pub struct PaygenticConfig {
    pub api_key: String,
    pub merchant_id: String,
    pub billable_metric_id: String,
    pub base_url: Option<String>,
    pub sandbox: bool,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl PaygenticConfig {
    pub fn new(
        api_key: impl Into<String>,
        merchant_id: impl Into<String>,
        billable_metric_id: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            merchant_id: merchant_id.into(),
            billable_metric_id: billable_metric_id.into(),
            base_url: None,
            sandbox: false,
            timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn resolved_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if self.sandbox => DEFAULT_SANDBOX_URL.to_string(),
            None => DEFAULT_LIVE_URL.to_string(),
        }
    }

    /// Load from `PAYGENTIC_*` environment variables.
    ///
    /// Required: `PAYGENTIC_API_KEY`, `PAYGENTIC_MERCHANT_ID`,
    /// `PAYGENTIC_BILLABLE_METRIC_ID`. Optional: `PAYGENTIC_BASE_URL`,
    /// `PAYGENTIC_SANDBOX`, `PAYGENTIC_TIMEOUT_SECONDS`,
    /// `PAYGENTIC_MAX_RETRIES`, `PAYGENTIC_RETRY_BACKOFF_SECONDS`.
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| -> Result<String> {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    CascadeError::Config(format!("missing required environment variable: {name}"))
                })
        };

        let mut config = Self::new(
            required("PAYGENTIC_API_KEY")?,
            required("PAYGENTIC_MERCHANT_ID")?,
            required("PAYGENTIC_BILLABLE_METRIC_ID")?,
        );

        config.base_url = std::env::var("PAYGENTIC_BASE_URL").ok().filter(|v| !v.is_empty());
        config.sandbox = std::env::var("PAYGENTIC_SANDBOX")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        if let Ok(timeout) = std::env::var("PAYGENTIC_TIMEOUT_SECONDS") {
            let secs: f64 = timeout
                .parse()
                .map_err(|_| CascadeError::Config("bad PAYGENTIC_TIMEOUT_SECONDS".into()))?;
            config.timeout = Duration::from_secs_f64(secs);
        }
        if let Ok(retries) = std::env::var("PAYGENTIC_MAX_RETRIES") {
            config.max_retries = retries
                .parse()
                .map_err(|_| CascadeError::Config("bad PAYGENTIC_MAX_RETRIES".into()))?;
        }
        if let Ok(backoff) = std::env::var("PAYGENTIC_RETRY_BACKOFF_SECONDS") {
            let secs: f64 = backoff
                .parse()
                .map_err(|_| CascadeError::Config("bad PAYGENTIC_RETRY_BACKOFF_SECONDS".into()))?;
            config.retry_backoff = Duration::from_secs_f64(secs);
        }

        Ok(config)
    }
}

fn iso_timestamp(value: Option<&str>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

/// Canonical string form for an idempotency-key part. Maps and lists render
/// as compact JSON with sorted keys so key order never changes the key.
fn canonical_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => value.to_string(),
        other => other.to_string(),
    }
}

fn hex_digest_prefix(input: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, input.as_bytes());
    digest.as_ref()[..12]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Thin Paygentic API client with deterministic idempotency support.
pub struct PaygenticClient {
    config: PaygenticConfig,
    client: reqwest::Client,
}

impl PaygenticClient {
    pub fn new(config: PaygenticConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &PaygenticConfig {
        &self.config
    }

    /// Build a deterministic idempotency key: `scope_` plus the first 24 hex
    /// chars of SHA-256 over the `|`-joined canonical parts.
    pub fn create_idempotency_key(&self, scope: &str, parts: &[Value]) -> String {
        let joined = parts.iter().map(canonical_part).collect::<Vec<_>>().join("|");
        format!("{scope}_{}", hex_digest_prefix(&joined))
    }

    fn url(&self, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        format!("{}{}", self.config.resolved_base_url(), path)
    }

    async fn request(
        &self,
        path: &str,
        payload: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<Value> {
        let mut last_transport: Option<String> = None;

        for attempt in 0..=self.config.max_retries {
            let mut builder = self
                .client
                .post(self.url(path))
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .header("Content-Type", "application/json")
                .timeout(self.config.timeout);
            if let Some(key) = idempotency_key {
                builder = builder.header("Idempotency-Key", key);
            }

            let response = match builder.json(payload).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_transport = Some(e.to_string());
                    if attempt >= self.config.max_retries {
                        break;
                    }
                    tokio::time::sleep(self.config.retry_backoff * 2u32.pow(attempt)).await;
                    continue;
                }
            };

            let status = response.status().as_u16();
            if status >= 400 {
                if TRANSIENT_STATUS_CODES.contains(&status) && attempt < self.config.max_retries {
                    debug!(status, attempt, "transient billing failure, retrying");
                    tokio::time::sleep(self.config.retry_backoff * 2u32.pow(attempt)).await;
                    continue;
                }
                let body = response.text().await.unwrap_or_default();
                let payload: Value =
                    serde_json::from_str(&body).unwrap_or(Value::String(body));
                return Err(CascadeError::BillingApi {
                    status_code: Some(status),
                    message: format!("billing request failed with status {status}: {payload}"),
                });
            }

            let body = response.text().await.unwrap_or_default();
            if body.is_empty() {
                return Ok(json!({}));
            }
            return Ok(serde_json::from_str(&body).unwrap_or(json!({"raw": body})));
        }

        Err(CascadeError::BillingApi {
            status_code: None,
            message: format!(
                "billing transport failed after retries: {}",
                last_transport.unwrap_or_default()
            ),
        })
    }

    pub async fn create_customer(
        &self,
        email: &str,
        name: &str,
        address: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<Value> {
        for field in ["line1", "city", "country", "postalCode"] {
            if address.get(field).and_then(|v| v.as_str()).unwrap_or("").is_empty() {
                return Err(CascadeError::InvalidRequest(format!(
                    "customer address missing required field: {field}"
                )));
            }
        }

        let payload = json!({
            "merchantId": self.config.merchant_id,
            "consumer": {
                "email": email,
                "name": name,
                "address": address,
            },
        });
        self.request("/v0/customers", &payload, idempotency_key).await
    }

    pub async fn create_subscription(
        &self,
        plan_id: &str,
        name: &str,
        customer_id: &str,
        started_at: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<Value> {
        let payload = json!({
            "name": name,
            "planId": plan_id,
            "customerId": customer_id,
            "startedAt": iso_timestamp(started_at),
            "autoCharge": false,
            "taxExempt": false,
        });
        self.request("/v0/subscriptions", &payload, idempotency_key).await
    }

    pub async fn create_usage_event(
        &self,
        customer_id: &str,
        quantity: u64,
        timestamp: Option<&str>,
        idempotency_key: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<Value> {
        let effective_timestamp = iso_timestamp(timestamp);
        let idem = match idempotency_key {
            Some(key) => key.to_string(),
            None => self.create_idempotency_key(
                "usage",
                &[
                    json!(self.config.merchant_id),
                    json!(customer_id),
                    json!(self.config.billable_metric_id),
                    json!(effective_timestamp),
                    json!(quantity),
                ],
            ),
        };

        let mut payload = json!({
            "idempotencyKey": idem,
            "customerId": customer_id,
            "merchantId": self.config.merchant_id,
            "timestamp": effective_timestamp,
            "properties": [{
                "billableMetricId": self.config.billable_metric_id,
                "quantity": quantity,
            }],
        });
        if let Some(metadata) = metadata {
            payload["metadata"] = metadata.clone();
        }

        self.request("/v0/usage", &payload, Some(&idem)).await
    }
}

/// How a proxy result converts to a billable quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuantityMode {
    #[default]
    Tokens,
    CostUsd,
    Requests,
}

/// Maps proxy results to Paygentic usage events.
pub struct UsageReporter {
    client: PaygenticClient,
    quantity_mode: QuantityMode,
    cost_scale: u64,
    customer_header: String,
    request_id_header: String,
}

impl UsageReporter {
    pub fn new(client: PaygenticClient) -> Self {
        Self {
            client,
            quantity_mode: QuantityMode::Tokens,
            cost_scale: 1_000_000,
            customer_header: DEFAULT_CUSTOMER_HEADER.to_string(),
            request_id_header: DEFAULT_REQUEST_ID_HEADER.to_string(),
        }
    }

    pub fn with_quantity_mode(mut self, mode: QuantityMode) -> Self {
        self.quantity_mode = mode;
        self
    }

    pub fn with_cost_scale(mut self, cost_scale: u64) -> Self {
        self.cost_scale = cost_scale.max(1);
        self
    }

    pub fn customer_header(&self) -> &str {
        &self.customer_header
    }

    pub fn request_id_header(&self) -> &str {
        &self.request_id_header
    }

    /// Billable quantity for a result. Zero quantities are skipped entirely.
    pub fn quantity(&self, result: &ProxyResult) -> Option<u64> {
        match self.quantity_mode {
            QuantityMode::Requests => Some(1),
            QuantityMode::Tokens => {
                let tokens = result.usage.map(|u| u.total_tokens()).unwrap_or(0);
                (tokens > 0).then_some(tokens)
            }
            QuantityMode::CostUsd => {
                let cost = result.cost.unwrap_or(0.0);
                let scaled = (cost * self.cost_scale as f64).round();
                (scaled > 0.0).then_some(scaled as u64)
            }
        }
    }

    fn build_metadata(&self, result: &ProxyResult) -> Value {
        let mut metadata = Map::new();
        metadata.insert("integration".into(), json!("cascadeflow-paygentic"));
        metadata.insert("provider".into(), json!(result.provider));
        metadata.insert("model".into(), json!(result.model));
        metadata.insert("latency_ms".into(), json!(result.latency_ms));
        metadata.insert("cost_usd".into(), json!(result.cost));
        if let Some(usage) = result.usage {
            metadata.insert("input_tokens".into(), json!(usage.input_tokens));
            metadata.insert("output_tokens".into(), json!(usage.output_tokens));
            metadata.insert("total_tokens".into(), json!(usage.total_tokens()));
        }
        if self.quantity_mode == QuantityMode::CostUsd {
            metadata.insert("cost_scale".into(), json!(self.cost_scale));
        }
        Value::Object(metadata)
    }

    /// Report one proxy result. Fail-open: billing errors are logged and
    /// swallowed, never surfaced to the request path.
    pub async fn report(
        &self,
        result: &ProxyResult,
        customer_id: &str,
        request_id: Option<&str>,
    ) -> Option<Value> {
        let quantity = self.quantity(result)?;
        let timestamp = iso_timestamp(None);
        let idem = self.client.create_idempotency_key(
            "usage",
            &[
                json!(customer_id),
                json!(request_id.unwrap_or("no-request-id")),
                json!(result.provider),
                json!(result.model),
                json!(format!("{:?}", self.quantity_mode).to_lowercase()),
                json!(quantity),
                json!(timestamp),
            ],
        );

        match self
            .client
            .create_usage_event(
                customer_id,
                quantity,
                Some(&timestamp),
                Some(&idem),
                Some(&self.build_metadata(result)),
            )
            .await
        {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(error = %e, "usage reporting failed (ignored)");
                None
            }
        }
    }
}

/// Wraps [`ProxyService`] and reports usage after each response.
///
/// In background mode (default) reports run in tracked tokio tasks so the
/// request path never waits on billing; `flush` awaits them at shutdown.
pub struct BillingProxyService {
    service: ProxyService,
    reporter: std::sync::Arc<UsageReporter>,
    report_in_background: bool,
    pending: Mutex<Vec<JoinHandle<()>>>,
    max_pending: usize,
}

impl BillingProxyService {
    pub fn new(service: ProxyService, reporter: UsageReporter) -> Self {
        Self {
            service,
            reporter: std::sync::Arc::new(reporter),
            report_in_background: true,
            pending: Mutex::new(Vec::new()),
            max_pending: 1024,
        }
    }

    pub fn with_foreground_reporting(mut self) -> Self {
        self.report_in_background = false;
        self
    }

    pub fn pending_tasks(&self) -> usize {
        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.len()
    }

    pub async fn handle(&self, request: &ProxyRequest) -> Result<ProxyResult> {
        let result = self.service.handle(request).await?;

        let customer_id = header_value(&request.headers, self.reporter.customer_header());
        let Some(customer_id) = customer_id else {
            return Ok(result);
        };
        let request_id = header_value(&request.headers, self.reporter.request_id_header());

        if self.report_in_background {
            let reporter = std::sync::Arc::clone(&self.reporter);
            let report_result = result.clone();
            let handle = tokio::spawn(async move {
                reporter
                    .report(&report_result, &customer_id, request_id.as_deref())
                    .await;
            });
            let mut pending = self.pending.lock();
            pending.retain(|h| !h.is_finished());
            // Oldest tasks are dropped (not cancelled) past the cap; the set
            // must not grow without bound.
            if pending.len() >= self.max_pending {
                pending.remove(0);
            }
            pending.push(handle);
        } else {
            self.reporter
                .report(&result, &customer_id, request_id.as_deref())
                .await;
        }

        Ok(result)
    }

    /// Await in-flight background reports, aborting stragglers at timeout.
    pub async fn flush(&self, timeout: Duration) -> usize {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending.lock());
        if handles.is_empty() {
            return 0;
        }
        let count = handles.len();
        let joined = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, joined).await.is_err() {
            warn!("billing flush timed out with reports still pending");
        }
        count
    }
}

fn header_value(headers: &std::collections::HashMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_deterministic() {
        let client = PaygenticClient::new(PaygenticConfig::new("k", "m", "metric"));
        let parts = [json!("m"), json!("cust-1"), json!("metric"), json!("2026-02-16T20:00:00Z"), json!(42)];
        let a = client.create_idempotency_key("usage", &parts);
        let b = client.create_idempotency_key("usage", &parts);
        assert_eq!(a, b);
        assert!(a.starts_with("usage_"));
        assert_eq!(a.len(), "usage_".len() + 24);
    }

    #[test]
    fn idempotency_key_differs_per_tuple() {
        let client = PaygenticClient::new(PaygenticConfig::new("k", "m", "metric"));
        let a = client.create_idempotency_key("usage", &[json!("cust-1"), json!(42)]);
        let b = client.create_idempotency_key("usage", &[json!("cust-1"), json!(43)]);
        assert_ne!(a, b);
    }

    #[test]
    fn idempotency_key_ignores_map_key_order() {
        let client = PaygenticClient::new(PaygenticConfig::new("k", "m", "metric"));
        let a = client.create_idempotency_key(
            "usage",
            &[serde_json::from_str::<Value>("{\"a\":1,\"b\":2}").unwrap()],
        );
        let b = client.create_idempotency_key(
            "usage",
            &[serde_json::from_str::<Value>("{\"b\":2,\"a\":1}").unwrap()],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn resolved_base_url_prefers_explicit_then_sandbox() {
        let explicit = PaygenticConfig::new("k", "m", "b").with_base_url("https://x.test/");
        assert_eq!(explicit.resolved_base_url(), "https://x.test");

        let mut sandbox = PaygenticConfig::new("k", "m", "b");
        sandbox.sandbox = true;
        assert_eq!(sandbox.resolved_base_url(), DEFAULT_SANDBOX_URL);

        assert_eq!(
            PaygenticConfig::new("k", "m", "b").resolved_base_url(),
            DEFAULT_LIVE_URL
        );
    }
}
