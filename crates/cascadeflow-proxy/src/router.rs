use std::collections::HashMap;

use cascadeflow_core::{CascadeError, Result};
use serde_json::Map;

use crate::models::{ModelRegistry, ProxyPlan, ProxyRequest, ProxyRoute};

/// Route proxy requests to provider-specific upstreams.
///
/// Model identifiers are parsed in order: explicit `provider:model` or
/// `provider/model` prefix, then registry lookup, then the configured
/// default provider.
pub struct ProxyRouter {
    routes: Vec<ProxyRoute>,
    routes_by_provider: HashMap<String, usize>,
    default_provider: Option<String>,
    registry: ModelRegistry,
}

impl ProxyRouter {
    pub fn new(routes: Vec<ProxyRoute>) -> Self {
        let routes_by_provider = routes
            .iter()
            .enumerate()
            .map(|(i, r)| (r.provider.clone(), i))
            .collect();
        Self {
            routes,
            routes_by_provider,
            default_provider: None,
            registry: ModelRegistry::new(),
        }
    }

    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Create an execution plan: pick the route, strip the provider prefix,
    /// and rewrite the body to the bare model name.
    pub fn plan(&self, request: &ProxyRequest) -> Result<ProxyPlan> {
        let model = request
            .body
            .get("model")
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| CascadeError::Routing("proxy request is missing a model name".into()))?;

        let (provider, bare_model) = self.parse_model(model);
        let route = self.resolve_route(provider.as_deref(), &bare_model)?.ok_or_else(|| {
            CascadeError::Routing(format!("no proxy route found for model '{model}'"))
        })?;

        let mut body = request.body.clone();
        body["model"] = serde_json::Value::String(bare_model.clone());

        let mut metadata = Map::new();
        metadata.insert("original_model".into(), serde_json::Value::String(model.to_string()));

        Ok(ProxyPlan {
            provider: route.provider.clone(),
            route: route.clone(),
            request: ProxyRequest {
                method: request.method.clone(),
                path: request.path.clone(),
                headers: request.headers.clone(),
                body,
            },
            model: bare_model,
            metadata,
        })
    }

    /// Split `provider:model` / `provider/model` prefixes, falling back to
    /// the registry and then the default provider.
    fn parse_model(&self, model: &str) -> (Option<String>, String) {
        for separator in [':', '/'] {
            if let Some((provider, model_name)) = model.split_once(separator) {
                if self.routes_by_provider.contains_key(provider) {
                    return (Some(provider.to_string()), model_name.to_string());
                }
            }
        }

        if let Some(provider) = self.registry.provider_for(model) {
            return (Some(provider), model.to_string());
        }

        (self.default_provider.clone(), model.to_string())
    }

    fn resolve_route(&self, provider: Option<&str>, model: &str) -> Result<Option<&ProxyRoute>> {
        if let Some(provider) = provider {
            if let Some(&idx) = self.routes_by_provider.get(provider) {
                let route = &self.routes[idx];
                if !route.models.is_empty() && !route.models.contains(model) {
                    return Err(CascadeError::Routing(format!(
                        "model '{model}' is not configured for provider '{provider}'"
                    )));
                }
                return Ok(Some(route));
            }
        }

        Ok(self.routes.iter().find(|r| r.models.contains(model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routes() -> Vec<ProxyRoute> {
        vec![
            ProxyRoute::new("openai-route", "openai", "https://api.openai.test")
                .with_models(&["gpt-4o", "gpt-4o-mini"]),
            ProxyRoute::new("anthropic-route", "anthropic", "https://api.anthropic.test")
                .with_models(&["claude-sonnet-4-5"]),
        ]
    }

    #[test]
    fn route_with_provider_prefix() {
        let router = ProxyRouter::new(routes());
        let request = ProxyRequest::post(
            "/v1/chat/completions",
            json!({"model": "openai:gpt-4o", "messages": []}),
        );

        let plan = router.plan(&request).unwrap();

        assert_eq!(plan.provider, "openai");
        assert_eq!(plan.model, "gpt-4o");
        assert_eq!(plan.route.name, "openai-route");
        assert_eq!(plan.request.body["model"], "gpt-4o");
        assert_eq!(plan.metadata["original_model"], "openai:gpt-4o");
    }

    #[test]
    fn route_with_slash_prefix() {
        let router = ProxyRouter::new(routes());
        let request = ProxyRequest::post(
            "/v1/messages",
            json!({"model": "anthropic/claude-sonnet-4-5", "messages": []}),
        );

        let plan = router.plan(&request).unwrap();

        assert_eq!(plan.provider, "anthropic");
        assert_eq!(plan.model, "claude-sonnet-4-5");
        assert_eq!(plan.route.name, "anthropic-route");
    }

    #[test]
    fn route_with_registry_lookup() {
        let router = ProxyRouter::new(routes());
        let request = ProxyRequest::post(
            "/v1/chat/completions",
            json!({"model": "gpt-4o", "messages": []}),
        );

        let plan = router.plan(&request).unwrap();

        assert_eq!(plan.provider, "openai");
        assert_eq!(plan.model, "gpt-4o");
    }

    #[test]
    fn route_by_whitelist_scan() {
        let route = ProxyRoute::new("custom-route", "custom", "https://proxy.custom")
            .with_models(&["my-model"]);
        let router = ProxyRouter::new(vec![route]);
        let request =
            ProxyRequest::post("/v1/completions", json!({"model": "my-model", "prompt": "hi"}));

        let plan = router.plan(&request).unwrap();

        assert_eq!(plan.provider, "custom");
        assert_eq!(plan.model, "my-model");
    }

    #[test]
    fn missing_model_is_a_routing_error() {
        let router = ProxyRouter::new(routes());
        let request = ProxyRequest::post("/v1/chat/completions", json!({}));
        assert!(matches!(
            router.plan(&request),
            Err(CascadeError::Routing(_))
        ));
    }

    #[test]
    fn unknown_model_is_a_routing_error() {
        let router = ProxyRouter::new(routes());
        let request = ProxyRequest::post(
            "/v1/chat/completions",
            json!({"model": "totally-unknown-model", "messages": []}),
        );
        assert!(matches!(
            router.plan(&request),
            Err(CascadeError::Routing(_))
        ));
    }

    #[test]
    fn whitelisted_provider_rejects_other_models() {
        let router = ProxyRouter::new(routes());
        let request = ProxyRequest::post(
            "/v1/chat/completions",
            json!({"model": "openai:not-in-whitelist", "messages": []}),
        );
        assert!(matches!(
            router.plan(&request),
            Err(CascadeError::Routing(_))
        ));
    }

    #[test]
    fn default_provider_catches_unknown_models() {
        let route = ProxyRoute::new("openai-route", "openai", "https://api.openai.test");
        let router = ProxyRouter::new(vec![route]).with_default_provider("openai");
        let request = ProxyRequest::post(
            "/v1/chat/completions",
            json!({"model": "my-finetune", "messages": []}),
        );

        let plan = router.plan(&request).unwrap();
        assert_eq!(plan.provider, "openai");
        assert_eq!(plan.model, "my-finetune");
    }
}
