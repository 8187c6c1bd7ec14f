use serde_json::{Map, Value};

use cascadeflow_core::{ModelConfig, Usage};
use cascadeflow_pricing::PricingResolver;

/// Structured cost breakdown for one cascade execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostBreakdown {
    pub draft_cost: f64,
    pub verifier_cost: f64,
    pub total_cost: f64,
    /// Positive on an accepted draft (the verifier call that never happened),
    /// negative on a rejected one (the drafter tokens were wasted work).
    pub cost_saved: f64,
}

/// Stateless cost arithmetic for cascade results.
///
/// Token counts come from the result metadata; prices come from the price
/// book with the model's own per-1K rate as the fallback.
pub struct CostCalculator {
    drafter: ModelConfig,
    verifier: ModelConfig,
    resolver: PricingResolver,
}

fn meta_u64(metadata: &Map<String, Value>, key: &str) -> u64 {
    metadata.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

impl CostCalculator {
    pub fn new(drafter: ModelConfig, verifier: ModelConfig) -> Self {
        Self {
            drafter,
            verifier,
            resolver: PricingResolver::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: PricingResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Cost of running `model` over the given token counts.
    pub fn model_cost(&self, model: &ModelConfig, input_tokens: u64, output_tokens: u64) -> f64 {
        let usage = Usage::new(input_tokens, output_tokens);
        self.resolver
            .resolve_cost(&model.name, &usage, None, None, Some(model.cost))
    }

    /// Break down the cost of one cascade execution from its metadata.
    pub fn calculate(&self, draft_accepted: bool, metadata: &Map<String, Value>) -> CostBreakdown {
        let draft_in = meta_u64(metadata, "draft_prompt_tokens");
        let draft_out = meta_u64(metadata, "draft_completion_tokens");
        let draft_cost = self.model_cost(&self.drafter, draft_in, draft_out);

        if draft_accepted {
            // The verifier never ran; savings are what it would have cost to
            // produce the same tokens.
            let avoided = self.model_cost(&self.verifier, draft_in, draft_out);
            CostBreakdown {
                draft_cost,
                verifier_cost: 0.0,
                total_cost: draft_cost,
                cost_saved: avoided - draft_cost,
            }
        } else {
            let verifier_in = meta_u64(metadata, "verifier_prompt_tokens");
            let verifier_out = meta_u64(metadata, "verifier_completion_tokens");
            let verifier_cost = self.model_cost(&self.verifier, verifier_in, verifier_out);
            CostBreakdown {
                draft_cost,
                verifier_cost,
                total_cost: draft_cost + verifier_cost,
                cost_saved: -draft_cost,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> CostCalculator {
        let drafter = ModelConfig::new("drafter-test", "custom", 1.0);
        let verifier = ModelConfig::new("verifier-test", "custom", 2.0);
        CostCalculator::new(drafter, verifier)
    }

    fn metadata(pairs: &[(&str, u64)]) -> Map<String, Value> {
        let mut map = Map::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), json!(v));
        }
        map
    }

    #[test]
    fn accepted_draft_charges_drafter_only() {
        let breakdown = calculator().calculate(
            true,
            &metadata(&[("draft_prompt_tokens", 100), ("draft_completion_tokens", 50)]),
        );
        assert!((breakdown.draft_cost - 0.15).abs() < 1e-9);
        assert!((breakdown.verifier_cost - 0.0).abs() < 1e-9);
        assert!((breakdown.total_cost - 0.15).abs() < 1e-9);
        assert!((breakdown.cost_saved - 0.15).abs() < 1e-9);
    }

    #[test]
    fn rejected_draft_charges_both_models() {
        let breakdown = calculator().calculate(
            false,
            &metadata(&[
                ("draft_prompt_tokens", 100),
                ("draft_completion_tokens", 20),
                ("verifier_prompt_tokens", 100),
                ("verifier_completion_tokens", 40),
            ]),
        );
        assert!((breakdown.draft_cost - 0.12).abs() < 1e-9);
        assert!((breakdown.verifier_cost - 0.28).abs() < 1e-9);
        assert!((breakdown.total_cost - 0.40).abs() < 1e-9);
        assert!((breakdown.cost_saved - (-0.12)).abs() < 1e-9);
    }

    #[test]
    fn missing_token_counts_are_zero() {
        let breakdown = calculator().calculate(false, &Map::new());
        assert_eq!(breakdown.total_cost, 0.0);
        assert_eq!(breakdown.cost_saved, 0.0);
    }

    #[test]
    fn pricebook_models_use_real_prices() {
        // gpt-4o-mini exists in the price book, so the per-1K config rate is
        // ignored in its favor.
        let drafter = ModelConfig::new("gpt-4o-mini", "openai", 0.0);
        let verifier = ModelConfig::new("gpt-4o", "openai", 0.0);
        let calc = CostCalculator::new(drafter, verifier);
        let breakdown = calc.calculate(
            true,
            &metadata(&[("draft_prompt_tokens", 1000), ("draft_completion_tokens", 1000)]),
        );
        assert!(breakdown.draft_cost > 0.0);
        assert!(breakdown.cost_saved > 0.0);
    }
}
