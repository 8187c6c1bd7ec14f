use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical token usage across providers and execution paths.
///
/// Providers disagree on field names (`prompt_tokens` vs `input_tokens`);
/// everything inside the gateway speaks this one shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: u64,
}

fn coerce_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        _ => None,
    }
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cached_input_tokens: 0,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Build canonical usage from a provider payload, accepting both the
    /// OpenAI-style and Anthropic-style key sets. Missing or non-integer
    /// values coerce to zero.
    pub fn from_payload(payload: &Value) -> Self {
        let obj = match payload.as_object() {
            Some(o) => o,
            None => return Self::default(),
        };

        let input_tokens = coerce_u64(obj.get("input_tokens"))
            .or_else(|| coerce_u64(obj.get("prompt_tokens")))
            .unwrap_or(0);
        let output_tokens = coerce_u64(obj.get("output_tokens"))
            .or_else(|| coerce_u64(obj.get("completion_tokens")))
            .unwrap_or(0);
        let cached_input_tokens = coerce_u64(obj.get("cached_input_tokens"))
            .or_else(|| coerce_u64(obj.get("cache_read_input_tokens")))
            .unwrap_or(0);

        Self {
            input_tokens,
            output_tokens,
            cached_input_tokens,
        }
    }

    /// Four-field dictionary including the derived total.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "input_tokens": self.input_tokens,
            "output_tokens": self.output_tokens,
            "cached_input_tokens": self.cached_input_tokens,
            "total_tokens": self.total_tokens(),
        })
    }

    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_input_tokens += other.cached_input_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_openai_legacy_fields() {
        let usage = Usage::from_payload(&json!({
            "prompt_tokens": 12,
            "completion_tokens": 8,
            "cache_read_input_tokens": 3,
        }));
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 8);
        assert_eq!(usage.cached_input_tokens, 3);
        assert_eq!(usage.total_tokens(), 20);
    }

    #[test]
    fn prefers_canonical_fields_over_synonyms() {
        let usage = Usage::from_payload(&json!({
            "input_tokens": 5,
            "prompt_tokens": 99,
            "output_tokens": 7,
        }));
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.output_tokens, 7);
    }

    #[test]
    fn coerces_garbage_to_zero() {
        let usage = Usage::from_payload(&json!({
            "prompt_tokens": "not-a-number",
            "completion_tokens": null,
        }));
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.output_tokens, 0);
        assert_eq!(Usage::from_payload(&json!("nope")), Usage::default());
    }

    #[test]
    fn round_trips_with_total() {
        let usage = Usage::new(100, 50);
        let value = usage.to_value();
        assert_eq!(value["total_tokens"], 150);
        assert_eq!(Usage::from_payload(&value), usage);
    }
}
