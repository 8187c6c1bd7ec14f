//! Drafter/verifier presets resolved from available provider keys.

use std::sync::Arc;

use cascadeflow_core::{CascadeError, ModelConfig, Result};
use cascadeflow_llm::{AnthropicProvider, LlmProvider, OpenAiProvider};

pub const PRESETS: [&str; 5] = [
    "balanced",
    "cost_optimized",
    "speed_optimized",
    "quality_optimized",
    "development",
];

/// A resolved drafter/verifier pair with its providers.
pub struct ResolvedModels {
    pub drafter: ModelConfig,
    pub verifier: ModelConfig,
    pub drafter_provider: Arc<dyn LlmProvider>,
    pub verifier_provider: Arc<dyn LlmProvider>,
}

pub fn provider_key_present() -> bool {
    ["OPENAI_API_KEY", "ANTHROPIC_API_KEY", "GROQ_API_KEY", "TOGETHER_API_KEY"]
        .iter()
        .any(|name| std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false))
}

fn openai_pair(preset: &str) -> (ModelConfig, ModelConfig) {
    let drafter = ModelConfig::new("gpt-4o-mini", "openai", 0.000375)
        .with_speed_ms(700)
        .with_quality(0.80);
    let verifier = match preset {
        "quality_optimized" => ModelConfig::new("gpt-4.1", "openai", 0.005)
            .with_speed_ms(1800)
            .with_quality(0.96)
            .with_domains(&["general", "expert"]),
        _ => ModelConfig::new("gpt-4o", "openai", 0.00625)
            .with_speed_ms(1400)
            .with_quality(0.93)
            .with_domains(&["general", "expert"]),
    };
    (drafter, verifier)
}

fn anthropic_pair(preset: &str) -> (ModelConfig, ModelConfig) {
    let drafter = ModelConfig::new("claude-3-5-haiku-latest", "anthropic", 0.0024)
        .with_speed_ms(600)
        .with_quality(0.78);
    let verifier = match preset {
        "quality_optimized" => ModelConfig::new("claude-opus-4-1", "anthropic", 0.045)
            .with_speed_ms(2200)
            .with_quality(0.97)
            .with_domains(&["general", "expert"]),
        _ => ModelConfig::new("claude-sonnet-4-5", "anthropic", 0.009)
            .with_speed_ms(1200)
            .with_quality(0.94)
            .with_domains(&["general", "expert"]),
    };
    (drafter, verifier)
}

/// Resolve a preset against the keys present in the environment.
///
/// OpenAI wins ties; `speed_optimized` prefers Anthropic's faster drafter
/// when both key sets are available.
pub fn resolve(preset: &str) -> Result<ResolvedModels> {
    if !PRESETS.contains(&preset) {
        return Err(CascadeError::Config(format!(
            "unknown preset '{preset}' (expected one of: {})",
            PRESETS.join(", ")
        )));
    }

    let openai_key = std::env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty());
    let anthropic_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|v| !v.is_empty());

    let use_anthropic = match (&openai_key, &anthropic_key) {
        (Some(_), Some(_)) => preset == "speed_optimized",
        (None, Some(_)) => true,
        (Some(_), None) => false,
        (None, None) => {
            return Err(CascadeError::Config(
                "no provider API keys found; set OPENAI_API_KEY or ANTHROPIC_API_KEY, \
                 or run with --mode mock"
                    .into(),
            ));
        }
    };

    if use_anthropic {
        let key = anthropic_key.expect("checked above");
        let (drafter, verifier) = anthropic_pair(preset);
        let provider: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(key));
        Ok(ResolvedModels {
            drafter,
            verifier,
            drafter_provider: Arc::clone(&provider),
            verifier_provider: provider,
        })
    } else {
        let key = openai_key.expect("checked above");
        let (drafter, verifier) = openai_pair(preset);
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(key));
        Ok(ResolvedModels {
            drafter,
            verifier,
            drafter_provider: Arc::clone(&provider),
            verifier_provider: provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(matches!(
            resolve("turbo-extreme"),
            Err(CascadeError::Config(_))
        ));
    }

    #[test]
    fn preset_pairs_order_cheap_to_expensive() {
        let (drafter, verifier) = openai_pair("balanced");
        assert!(drafter.cost < verifier.cost);
        let (drafter, verifier) = anthropic_pair("quality_optimized");
        assert!(drafter.cost < verifier.cost);
    }
}
