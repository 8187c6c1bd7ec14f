//! # cascadeflow-pricing
//!
//! Internal price book and the priority-ordered cost resolver. Resolution
//! order: provider-reported cost, external table cost, internal price book,
//! flat fallback rate, zero.

use std::collections::HashMap;

use cascadeflow_core::Usage;
use serde::{Deserialize, Serialize};

/// Per-model pricing in USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    #[serde(default)]
    pub cached_input_per_1k: f64,
}

impl ModelPrice {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
            cached_input_per_1k: 0.0,
        }
    }

    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.input_tokens as f64 / 1000.0) * self.input_per_1k
            + (usage.output_tokens as f64 / 1000.0) * self.output_per_1k
            + (usage.cached_input_tokens as f64 / 1000.0) * self.cached_input_per_1k
    }
}

/// Internal default pricing table.
///
/// Only the handful of entries below are authoritative; real deployments are
/// expected to supply pricing through route overrides, the external-cost
/// argument, or `with_price`.
#[derive(Debug, Clone)]
pub struct PriceBook {
    prices: HashMap<String, ModelPrice>,
}

impl Default for PriceBook {
    fn default() -> Self {
        let mut prices = HashMap::new();
        prices.insert("gpt-4o".to_string(), ModelPrice::new(0.0025, 0.01));
        prices.insert("gpt-4o-mini".to_string(), ModelPrice::new(0.00015, 0.0006));
        prices.insert("gpt-3.5-turbo".to_string(), ModelPrice::new(0.0005, 0.0015));
        Self { prices }
    }
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    pub fn get(&self, model: &str) -> Option<&ModelPrice> {
        self.prices.get(model)
    }
}

/// Resolve costs in strict priority order.
#[derive(Debug, Clone, Default)]
pub struct PricingResolver {
    pricebook: PriceBook,
}

impl PricingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pricebook(pricebook: PriceBook) -> Self {
        Self { pricebook }
    }

    /// Resolve the USD cost of a call.
    ///
    /// Priority: `provider_cost` > `external_cost` > price book > fallback
    /// rate per 1K total tokens > 0.0.
    pub fn resolve_cost(
        &self,
        model: &str,
        usage: &Usage,
        provider_cost: Option<f64>,
        external_cost: Option<f64>,
        fallback_rate_per_1k: Option<f64>,
    ) -> f64 {
        if let Some(cost) = provider_cost {
            return cost;
        }
        if let Some(cost) = external_cost {
            return cost;
        }
        if let Some(price) = self.pricebook.get(model) {
            return price.cost(usage);
        }
        if let Some(rate) = fallback_rate_per_1k {
            return (usage.total_tokens() as f64 / 1000.0) * rate;
        }
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_cost_wins_over_everything() {
        let resolver = PricingResolver::new();
        let usage = Usage::new(100, 50);
        let cost = resolver.resolve_cost(
            "gpt-4o-mini",
            &usage,
            Some(0.123),
            Some(0.222),
            Some(1.0),
        );
        assert_eq!(cost, 0.123);
    }

    #[test]
    fn external_cost_beats_pricebook() {
        let resolver = PricingResolver::new();
        let usage = Usage::new(100, 50);
        let cost = resolver.resolve_cost("gpt-4o-mini", &usage, None, Some(0.222), None);
        assert_eq!(cost, 0.222);
    }

    #[test]
    fn pricebook_matches_per_1k_arithmetic() {
        let resolver = PricingResolver::new();
        let usage = Usage::new(1000, 1000);
        let cost = resolver.resolve_cost("gpt-4o", &usage, None, None, None);
        assert!((cost - (0.0025 + 0.01)).abs() < 1e-12);
        assert!(cost > 0.0);
    }

    #[test]
    fn cached_input_tokens_are_priced() {
        let book = PriceBook::new().with_price(
            "cached-model",
            ModelPrice {
                input_per_1k: 0.002,
                output_per_1k: 0.004,
                cached_input_per_1k: 0.001,
            },
        );
        let resolver = PricingResolver::with_pricebook(book);
        let usage = Usage {
            input_tokens: 1000,
            output_tokens: 0,
            cached_input_tokens: 2000,
        };
        let cost = resolver.resolve_cost("cached-model", &usage, None, None, None);
        assert!((cost - 0.004).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_uses_fallback_rate_then_zero() {
        let resolver = PricingResolver::new();
        let usage = Usage::new(500, 500);
        let cost = resolver.resolve_cost("unknown-model", &usage, None, None, Some(0.01));
        assert!((cost - 0.01).abs() < 1e-12);

        let cost = resolver.resolve_cost("unknown-model", &usage, None, None, None);
        assert_eq!(cost, 0.0);
    }
}
