use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use cascadeflow_core::{CascadeError, ModelConfig, Result};

/// How the gateway answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    /// Deterministic local responses, no upstream calls.
    Mock,
    /// Full cascade against real providers.
    Agent,
}

impl GatewayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayMode::Mock => "mock",
            GatewayMode::Agent => "agent",
        }
    }
}

/// Runtime gateway configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub mode: GatewayMode,
    pub allow_streaming: bool,
    /// Attach the X-Cascadeflow-Gateway-* response headers.
    pub gateway_headers: bool,
    /// Embed the `gateway` block in the cascadeflow response envelope.
    pub include_gateway_metadata: bool,
    pub cors_allow_origin: Option<String>,
    /// Flat USD per token used by mock-mode cost accounting.
    pub token_cost: f64,
    /// Extra model ids advertised by /v1/models.
    pub advertise_models: Vec<String>,
    /// Virtual model rewrites applied before dispatch.
    pub virtual_models: HashMap<String, String>,
    pub demo_mode: bool,
    pub demo_max_queries: u32,
    pub demo_window: Duration,
    pub auth_token: Option<String>,
    pub stats_auth_token: Option<String>,
}

/// The client-facing names reserved for virtual routing.
pub const RESERVED_VIRTUAL_MODELS: [&str; 6] = [
    "cascadeflow",
    "cascadeflow-auto",
    "cascadeflow-fast",
    "cascadeflow-quality",
    "cascadeflow-cheap",
    "cascadeflow-cost",
];

pub fn default_virtual_models() -> HashMap<String, String> {
    [
        ("cascadeflow-auto", "cascadeflow-auto-resolved"),
        ("cascadeflow-fast", "cascadeflow-fast-resolved"),
        ("cascadeflow-quality", "cascadeflow-quality-resolved"),
        ("cascadeflow-cheap", "cascadeflow-cheap-resolved"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8084,
            mode: GatewayMode::Mock,
            allow_streaming: true,
            gateway_headers: true,
            include_gateway_metadata: false,
            cors_allow_origin: None,
            token_cost: 0.00001,
            advertise_models: vec![],
            virtual_models: default_virtual_models(),
            demo_mode: false,
            demo_max_queries: 10,
            demo_window: Duration::from_secs(3600),
            auth_token: None,
            stats_auth_token: None,
        }
    }
}

impl GatewayConfig {
    /// Resolve a client-facing model name through the virtual model map.
    /// Unknown names pass through untouched.
    pub fn resolve_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.virtual_models.get(model).map(|s| s.as_str()).unwrap_or(model)
    }
}

// ── File config (TOML) ─────────────────────────────────────────

/// On-disk configuration, `cascadeflow.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub gateway: GatewaySection,
    pub models: ModelsSection,
    pub virtual_models: HashMap<String, String>,
    pub budgets: HashMap<String, BudgetSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub mode: Option<GatewayMode>,
    pub cors_allow_origin: Option<String>,
    pub token_cost: Option<f64>,
    pub auth_token: Option<String>,
    pub stats_auth_token: Option<String>,
    pub demo_mode: Option<bool>,
    pub demo_max_queries: Option<u32>,
    pub demo_window_seconds: Option<u64>,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            mode: None,
            cors_allow_origin: None,
            token_cost: None,
            auth_token: None,
            stats_auth_token: None,
            demo_mode: None,
            demo_max_queries: None,
            demo_window_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub drafter: Option<ModelConfig>,
    pub verifier: Option<ModelConfig>,
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub daily: Option<f64>,
    pub weekly: Option<f64>,
    pub monthly: Option<f64>,
    pub total: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            CascadeError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Fold file settings into a runtime config (file < flags; callers apply
    /// flag overrides afterwards).
    pub fn apply_to(&self, config: &mut GatewayConfig) {
        let g = &self.gateway;
        if let Some(host) = &g.host {
            config.host = host.clone();
        }
        if let Some(port) = g.port {
            config.port = port;
        }
        if let Some(mode) = g.mode {
            config.mode = mode;
        }
        if let Some(origin) = &g.cors_allow_origin {
            config.cors_allow_origin = Some(origin.clone());
        }
        if let Some(token_cost) = g.token_cost {
            config.token_cost = token_cost;
        }
        if let Some(token) = &g.auth_token {
            config.auth_token = Some(token.clone());
        }
        if let Some(token) = &g.stats_auth_token {
            config.stats_auth_token = Some(token.clone());
        }
        if let Some(demo) = g.demo_mode {
            config.demo_mode = demo;
        }
        if let Some(max) = g.demo_max_queries {
            config.demo_max_queries = max;
        }
        if let Some(secs) = g.demo_window_seconds {
            config.demo_window = Duration::from_secs(secs);
        }
        for (name, target) in &self.virtual_models {
            config.virtual_models.insert(name.clone(), target.clone());
        }
    }
}
