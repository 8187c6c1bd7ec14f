use serde::{Deserialize, Serialize};

/// Declarative model descriptor. Created once at startup, read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Bare model name, e.g. "gpt-4o-mini".
    pub name: String,
    /// Owning provider, e.g. "openai".
    pub provider: String,
    /// Baseline USD per 1K total tokens, used when the price book has no entry.
    pub cost: f64,
    /// Typical end-to-end latency in milliseconds.
    pub speed_ms: u64,
    /// Subjective quality score in [0, 1].
    pub quality_score: f64,
    /// Domain tags this model is good at ("general", "code", ...).
    pub domains: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            provider: String::new(),
            cost: 0.0,
            speed_ms: 1000,
            quality_score: 0.8,
            domains: vec!["general".to_string()],
        }
    }
}

impl ModelConfig {
    pub fn new(name: impl Into<String>, provider: impl Into<String>, cost: f64) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            cost,
            ..Default::default()
        }
    }

    pub fn with_quality(mut self, quality_score: f64) -> Self {
        self.quality_score = quality_score;
        self
    }

    pub fn with_speed_ms(mut self, speed_ms: u64) -> Self {
        self.speed_ms = speed_ms;
        self
    }

    pub fn with_domains(mut self, domains: &[&str]) -> Self {
        self.domains = domains.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn supports_domain(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d == domain)
    }
}
