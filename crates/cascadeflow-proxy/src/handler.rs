use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value, json};
use tracing::debug;

use cascadeflow_core::{CascadeError, Result, Usage};
use cascadeflow_pricing::PricingResolver;
use cascadeflow_telemetry::CostTracker;

use crate::models::{ModelRegistry, ProxyPlan, ProxyResult};

/// Execute proxy plans against upstream providers.
pub struct ProxyHandler {
    client: reqwest::Client,
    resolver: PricingResolver,
    registry: ModelRegistry,
    cost_tracker: Option<Arc<CostTracker>>,
}

impl Default for ProxyHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            resolver: PricingResolver::new(),
            registry: ModelRegistry::new(),
            cost_tracker: None,
        }
    }

    pub fn with_cost_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Execute a plan: one upstream HTTP request, no retries at this layer.
    pub async fn execute(&self, plan: &ProxyPlan) -> Result<ProxyResult> {
        let url = format!("{}{}", plan.route.base_url, plan.request.path);
        let method = reqwest::Method::from_bytes(plan.request.method.as_bytes())
            .map_err(|_| CascadeError::Routing(format!("bad method {}", plan.request.method)))?;

        // Route defaults first, request headers override.
        let mut builder = self.client.request(method, &url).timeout(plan.route.timeout);
        for (name, value) in &plan.route.default_headers {
            builder = builder.header(name, value);
        }
        let mut has_authorization = false;
        for (name, value) in &plan.request.headers {
            if name.eq_ignore_ascii_case("authorization") {
                has_authorization = true;
            }
            builder = builder.header(name, value);
        }
        if let Some(api_key) = &plan.route.api_key {
            if !has_authorization {
                builder = builder.header("Authorization", format!("Bearer {api_key}"));
            }
        }

        let start = Instant::now();
        let response = builder
            .json(&plan.request.body)
            .send()
            .await
            .map_err(|e| CascadeError::Transport(format!("proxy transport error: {e}")))?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let status_code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let raw = response
            .text()
            .await
            .map_err(|e| CascadeError::Transport(format!("proxy body read error: {e}")))?;

        let data = parse_body(&content_type, &raw);

        if status_code >= 400 {
            return Err(CascadeError::Upstream {
                status_code,
                message: format!("upstream error ({status_code})"),
                payload: Some(data),
            });
        }

        let usage = data
            .get("usage")
            .filter(|u| u.is_object())
            .map(Usage::from_payload);
        let cost = usage.map(|usage| {
            let fallback = plan
                .route
                .cost_per_1k_tokens
                .or_else(|| self.registry.get(&plan.model).and_then(|e| e.cost_per_1k_tokens));
            self.resolver
                .resolve_cost(&plan.model, &usage, None, None, fallback)
        });

        if let (Some(tracker), Some(usage), Some(cost)) = (&self.cost_tracker, usage, cost) {
            let mut metadata = Map::new();
            metadata.insert("proxy".into(), json!(true));
            metadata.insert("route".into(), json!(plan.route.name));
            tracker.add_cost(&plan.model, &plan.provider, usage.total_tokens(), cost, None, metadata);
        }

        debug!(
            model = %plan.model,
            provider = %plan.provider,
            status_code,
            latency_ms,
            "proxied upstream call"
        );

        Ok(ProxyResult {
            status_code,
            headers,
            data,
            provider: plan.provider.clone(),
            model: plan.model.clone(),
            latency_ms,
            usage,
            cost,
        })
    }
}

/// Parse an upstream body: JSON when declared, JSON-then-text otherwise.
fn parse_body(content_type: &str, raw: &str) -> Value {
    if content_type.contains("application/json") {
        return serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_body_prefers_json() {
        let value = parse_body("application/json", "{\"ok\":true}");
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn parse_body_falls_back_to_text() {
        let value = parse_body("text/plain", "plain response");
        assert_eq!(value, Value::String("plain response".to_string()));
    }

    #[test]
    fn parse_body_sniffs_json_without_content_type() {
        let value = parse_body("", "{\"usage\":{\"prompt_tokens\":3}}");
        assert_eq!(value["usage"]["prompt_tokens"], 3);
    }
}
