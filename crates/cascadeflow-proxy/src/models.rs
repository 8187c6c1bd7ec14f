use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde_json::{Map, Value};

use cascadeflow_core::Usage;

/// Upstream binding for a provider.
#[derive(Debug, Clone)]
pub struct ProxyRoute {
    pub name: String,
    pub provider: String,
    pub base_url: String,
    /// Optional model whitelist. Empty means the route accepts any model.
    pub models: HashSet<String>,
    pub default_headers: HashMap<String, String>,
    pub timeout: Duration,
    pub api_key: Option<String>,
    /// Per-route flat rate override, USD per 1K total tokens.
    pub cost_per_1k_tokens: Option<f64>,
}

impl ProxyRoute {
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            base_url: base_url.into(),
            models: HashSet::new(),
            default_headers: HashMap::new(),
            timeout: Duration::from_secs(60),
            api_key: None,
            cost_per_1k_tokens: None,
        }
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cost_per_1k_tokens(mut self, rate: f64) -> Self {
        self.cost_per_1k_tokens = Some(rate);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }
}

/// Normalized proxy request payload.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl ProxyRequest {
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: "POST".into(),
            path: path.into(),
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Execution plan binding a request to a route. The plan's body always
/// carries the bare model name.
#[derive(Debug, Clone)]
pub struct ProxyPlan {
    pub route: ProxyRoute,
    pub request: ProxyRequest,
    pub model: String,
    pub provider: String,
    pub metadata: Map<String, Value>,
}

/// Proxy execution result with extracted telemetry.
#[derive(Debug, Clone)]
pub struct ProxyResult {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub data: Value,
    pub provider: String,
    pub model: String,
    pub latency_ms: f64,
    pub usage: Option<Usage>,
    pub cost: Option<f64>,
}

/// Registry entry for a known model.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub name: String,
    pub provider: String,
    /// Default USD per 1K total tokens. Non-authoritative; route overrides
    /// and external pricing win.
    pub cost_per_1k_tokens: Option<f64>,
}

/// Maps bare model names to their providers and default rates.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };
        for (name, provider, cost) in [
            ("gpt-4o", "openai", Some(0.00625)),
            ("gpt-4o-mini", "openai", Some(0.000375)),
            ("gpt-4.1", "openai", Some(0.005)),
            ("gpt-4.1-mini", "openai", Some(0.001)),
            ("gpt-3.5-turbo", "openai", Some(0.001)),
            ("claude-opus-4-1", "anthropic", Some(0.045)),
            ("claude-sonnet-4-5", "anthropic", Some(0.009)),
            ("claude-3-5-haiku-latest", "anthropic", Some(0.0024)),
        ] {
            registry.insert(RegistryEntry {
                name: name.to_string(),
                provider: provider.to_string(),
                cost_per_1k_tokens: cost,
            });
        }
        registry
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, entry: RegistryEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, model: &str) -> Option<&RegistryEntry> {
        self.entries.get(model)
    }

    /// Resolve a provider for a bare model name, falling back to family
    /// prefix heuristics for models not explicitly registered.
    pub fn provider_for(&self, model: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(model) {
            return Some(entry.provider.clone());
        }
        let lower = model.to_lowercase();
        if lower.starts_with("gpt-")
            || lower.starts_with("o1")
            || lower.starts_with("o3")
            || lower.starts_with("o4")
            || lower.starts_with("text-embedding")
        {
            return Some("openai".to_string());
        }
        if lower.starts_with("claude") {
            return Some("anthropic".to_string());
        }
        None
    }
}
