use once_cell::sync::Lazy;
use regex::Regex;

static MATH_EXPR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\s*[+\-*/^=]\s*\d+").unwrap());

/// Deterministic classification of an incoming query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryClassification {
    /// Domain tag: "code", "math", "analysis", or "general".
    pub domain: String,
    /// Difficulty estimate in [0, 1], fed to the alignment scorer.
    pub difficulty: f64,
}

impl QueryClassification {
    /// Coarse complexity label used in response metadata.
    pub fn complexity(&self) -> &'static str {
        if self.difficulty < 0.3 {
            "simple"
        } else if self.difficulty < 0.7 {
            "moderate"
        } else {
            "complex"
        }
    }
}

/// Classify a query by surface features only. No model calls, no state.
pub fn classify_query(query: &str) -> QueryClassification {
    let lower = query.to_lowercase();
    let word_count = query.split_whitespace().count();

    const CODE_MARKERS: &[&str] = &[
        "```", "def ", "fn ", "class ", "import ", "function", "implement", "refactor",
        "debug", "compile", "regex", "algorithm",
    ];
    const MATH_MARKERS: &[&str] = &[
        "calculate", "compute", "solve", "equation", "integral", "derivative", "probability",
        "sum of", "how many",
    ];
    const ANALYSIS_MARKERS: &[&str] = &[
        "explain", "compare", "analyze", "analyse", "difference", "why", "trade-off",
        "tradeoff", "evaluate", "pros and cons",
    ];

    let is_code = CODE_MARKERS.iter().any(|m| lower.contains(m));
    let is_math = !is_code && (MATH_MARKERS.iter().any(|m| lower.contains(m)) || MATH_EXPR.is_match(query));
    let is_analysis = !is_code && !is_math && ANALYSIS_MARKERS.iter().any(|m| lower.contains(m));

    let domain = if is_code {
        "code"
    } else if is_math {
        "math"
    } else if is_analysis {
        "analysis"
    } else {
        "general"
    };

    // Length is the primary difficulty signal; domain markers nudge it up.
    let mut difficulty: f64 = if word_count <= 8 {
        0.25
    } else if word_count <= 25 {
        0.45
    } else if word_count <= 80 {
        0.60
    } else {
        0.75
    };
    if is_code {
        difficulty += 0.15;
    } else if is_analysis {
        difficulty += 0.10;
    } else if is_math && word_count > 8 {
        difficulty += 0.10;
    }

    QueryClassification {
        domain: domain.to_string(),
        difficulty: difficulty.min(1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_factual_queries_are_simple() {
        let c = classify_query("What is the capital of France?");
        assert_eq!(c.domain, "general");
        assert!(c.difficulty < 0.3);
        assert_eq!(c.complexity(), "simple");
    }

    #[test]
    fn code_queries_are_tagged() {
        let c = classify_query("Implement a binary search function in Rust with tests");
        assert_eq!(c.domain, "code");
        assert!(c.difficulty >= 0.5);
    }

    #[test]
    fn math_expressions_are_tagged() {
        let c = classify_query("What is 12 * 9?");
        assert_eq!(c.domain, "math");
    }

    #[test]
    fn analysis_queries_get_higher_difficulty() {
        let c = classify_query(
            "Explain the difference between optimistic and pessimistic locking and when \
             each one is the right choice for a high-throughput system",
        );
        assert_eq!(c.domain, "analysis");
        assert!(c.difficulty >= 0.5);
    }

    #[test]
    fn classification_is_deterministic() {
        let a = classify_query("Explain TCP slow start");
        let b = classify_query("Explain TCP slow start");
        assert_eq!(a, b);
    }
}
