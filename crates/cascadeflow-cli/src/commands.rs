use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use cascadeflow_core::{CascadeError, Result};
use cascadeflow_engine::{CascadeConfig, CascadeEngine};
use cascadeflow_gateway::{FileConfig, GatewayConfig, GatewayMode, build_router};
use cascadeflow_telemetry::{BudgetConfig, CostTracker, EnforcementMode, MetricsCollector};

use crate::presets;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Agent when a config file or provider keys are present, else mock.
    Auto,
    Mock,
    Agent,
}

/// cascadeflow — speculative-cascade LLM routing gateway
#[derive(Parser)]
#[command(name = "cascadeflow", version, about, long_about = None)]
pub struct Cli {
    /// Bind host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port (0 picks an ephemeral port)
    #[arg(long, default_value_t = 8084)]
    port: u16,

    /// Gateway mode
    #[arg(long, value_enum, default_value = "auto")]
    mode: ModeArg,

    /// Optional cascadeflow.toml config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model preset for agent mode
    #[arg(long, default_value = "balanced")]
    preset: String,

    /// Disable streaming responses
    #[arg(long)]
    no_stream: bool,

    /// Embed gateway metadata in response envelopes
    #[arg(long)]
    include_gateway_metadata: bool,

    /// Do not attach X-Cascadeflow-Gateway-* response headers
    #[arg(long)]
    no_gateway_headers: bool,

    /// Value for Access-Control-Allow-Origin on every response
    #[arg(long)]
    cors_allow_origin: Option<String>,

    /// Flat USD per token for mock-mode cost accounting
    #[arg(long)]
    token_cost: Option<f64>,

    /// Extra model id to advertise via /v1/models (repeatable)
    #[arg(long = "advertise-model")]
    advertise_model: Vec<String>,

    /// Virtual model mapping name=target (repeatable)
    #[arg(long = "virtual-model", value_parser = parse_key_val)]
    virtual_model: Vec<(String, String)>,

    /// Accept unauthenticated requests under a per-IP demo quota
    #[arg(long)]
    demo_mode: bool,

    /// Demo queries allowed per window
    #[arg(long)]
    demo_max_queries: Option<u32>,

    /// Demo quota window in seconds
    #[arg(long)]
    demo_window_seconds: Option<u64>,

    /// Require this bearer token on API endpoints
    #[arg(long)]
    auth_token: Option<String>,

    /// Separate bearer token for /stats
    #[arg(long)]
    stats_auth_token: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .ok_or_else(|| format!("expected name=target, got '{s}'"))
}

impl Cli {
    fn init_logging(&self) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(if self.verbose { "debug" } else { "info" })
        });
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }

    fn build_config(&self, file: Option<&FileConfig>) -> GatewayConfig {
        let mut config = GatewayConfig {
            host: self.host.clone(),
            port: self.port,
            ..GatewayConfig::default()
        };
        if let Some(file) = file {
            file.apply_to(&mut config);
        }

        // Flags override the file.
        config.host = self.host.clone();
        config.port = self.port;
        config.allow_streaming = !self.no_stream;
        config.include_gateway_metadata = self.include_gateway_metadata;
        config.gateway_headers = !self.no_gateway_headers;
        if let Some(origin) = &self.cors_allow_origin {
            config.cors_allow_origin = Some(origin.clone());
        }
        if let Some(token_cost) = self.token_cost {
            config.token_cost = token_cost;
        }
        config.advertise_models = self.advertise_model.clone();
        for (name, target) in &self.virtual_model {
            config.virtual_models.insert(name.clone(), target.clone());
        }
        if self.demo_mode {
            config.demo_mode = true;
        }
        if let Some(max) = self.demo_max_queries {
            config.demo_max_queries = max;
        }
        if let Some(secs) = self.demo_window_seconds {
            config.demo_window = Duration::from_secs(secs);
        }
        if let Some(token) = &self.auth_token {
            config.auth_token = Some(token.clone());
        }
        if let Some(token) = &self.stats_auth_token {
            config.stats_auth_token = Some(token.clone());
        }
        config
    }

    fn build_engine(&self, file: Option<&FileConfig>) -> Result<Arc<CascadeEngine>> {
        let resolved = presets::resolve(&self.preset)?;

        let mut drafter = resolved.drafter;
        let mut verifier = resolved.verifier;
        let mut threshold = None;
        if let Some(file) = file {
            if let Some(model) = &file.models.drafter {
                drafter = model.clone();
            }
            if let Some(model) = &file.models.verifier {
                verifier = model.clone();
            }
            threshold = file.models.confidence_threshold;
        }

        let mut config = CascadeConfig::new(drafter, verifier);
        if let Some(threshold) = threshold {
            config.confidence_threshold = threshold;
        }

        Ok(Arc::new(CascadeEngine::new(
            config,
            resolved.drafter_provider,
            resolved.verifier_provider,
        )))
    }

    fn build_tracker(&self, file: Option<&FileConfig>) -> Arc<CostTracker> {
        let mut tracker = CostTracker::new().with_max_entries(100_000);
        if let Some(file) = file {
            if !file.budgets.is_empty() {
                tracker = tracker.with_enforcement_mode(EnforcementMode::Strict);
                for (tier, budget) in &file.budgets {
                    tracker = tracker.with_tier_budget(
                        tier.clone(),
                        BudgetConfig {
                            daily: budget.daily,
                            weekly: budget.weekly,
                            monthly: budget.monthly,
                            total: budget.total,
                        },
                    );
                }
            }
        }
        Arc::new(tracker)
    }

    /// Run the gateway until interrupted.
    pub async fn run(self) -> Result<()> {
        self.init_logging();

        let file = match &self.config {
            Some(path) => Some(FileConfig::load(path)?),
            None => None,
        };

        let mut config = self.build_config(file.as_ref());

        let mode = match self.mode {
            ModeArg::Mock => GatewayMode::Mock,
            ModeArg::Agent => GatewayMode::Agent,
            ModeArg::Auto => {
                if self.config.is_some() || presets::provider_key_present() {
                    GatewayMode::Agent
                } else {
                    GatewayMode::Mock
                }
            }
        };
        config.mode = mode;

        let engine = match mode {
            GatewayMode::Agent => Some(self.build_engine(file.as_ref())?),
            GatewayMode::Mock => None,
        };
        let tracker = self.build_tracker(file.as_ref());
        let metrics = Arc::new(MetricsCollector::new());

        let bind = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .map_err(|e| CascadeError::Config(format!("failed to bind {bind}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| CascadeError::Config(format!("failed to read bound address: {e}")))?;

        // Readiness affordance for supervisors and e2e harnesses.
        if let Ok(port_file) = std::env::var("CASCADEFLOW_GATEWAY_PORT_FILE") {
            if let Err(e) = std::fs::write(&port_file, addr.port().to_string()) {
                warn!(error = %e, port_file, "failed to write port file");
            }
        }

        let router = build_router(config, engine, tracker, metrics);

        info!(mode = mode.as_str(), %addr, "gateway listening");
        println!(
            "cascadeflow gateway ({}) running at http://{}/v1",
            mode.as_str(),
            addr
        );
        println!(
            "Endpoints: POST /v1/chat/completions, POST /v1/messages, GET /health, GET /stats"
        );

        tokio::select! {
            result = cascadeflow_gateway::serve(listener, router) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_virtual_model_pairs() {
        let cli = Cli::parse_from([
            "cascadeflow",
            "--virtual-model",
            "cascadeflow-auto=gpt-4o-mini",
            "--virtual-model",
            "cascadeflow-fast=claude-3-5-haiku-latest",
        ]);
        assert_eq!(cli.virtual_model.len(), 2);
        assert_eq!(cli.virtual_model[0].0, "cascadeflow-auto");
        assert_eq!(cli.virtual_model[1].1, "claude-3-5-haiku-latest");
    }

    #[test]
    fn rejects_malformed_virtual_model() {
        assert!(Cli::try_parse_from(["cascadeflow", "--virtual-model", "nope"]).is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "cascadeflow",
            "--demo-mode",
            "--demo-max-queries",
            "3",
            "--no-stream",
            "--token-cost",
            "0",
            "--auth-token",
            "secret",
        ]);
        let config = cli.build_config(None);
        assert!(config.demo_mode);
        assert_eq!(config.demo_max_queries, 3);
        assert!(!config.allow_streaming);
        assert_eq!(config.token_cost, 0.0);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
    }
}
