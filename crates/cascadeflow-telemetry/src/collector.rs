use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    pub total_queries: u64,
    pub draft_accepted: u64,
    pub draft_accept_rate: f64,
    pub total_cost: f64,
    pub total_saved: f64,
    /// What the same traffic would have cost verifier-only.
    pub baseline_cost: f64,
    pub savings_percent: f64,
    pub avg_latency_ms: f64,
    pub draft_tokens: u64,
    pub verifier_tokens: u64,
    pub total_tokens: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct CollectorInner {
    total_queries: u64,
    draft_accepted: u64,
    total_cost: f64,
    total_saved: f64,
    latency_ms_sum: f64,
    draft_tokens: u64,
    verifier_tokens: u64,
    total_tokens: u64,
    errors: u64,
}

/// Aggregates request statistics across the gateway's lifetime.
///
/// Shared process-wide behind `Arc`; instantiate fresh copies in tests.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<CollectorInner>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request.
    pub fn record(
        &self,
        cost: f64,
        cost_saved: f64,
        latency_ms: f64,
        draft_accepted: bool,
        metadata: &Map<String, Value>,
    ) {
        let get = |key: &str| metadata.get(key).and_then(|v| v.as_u64()).unwrap_or(0);

        let mut inner = self.inner.lock();
        inner.total_queries += 1;
        if draft_accepted {
            inner.draft_accepted += 1;
        }
        inner.total_cost += cost;
        inner.total_saved += cost_saved;
        inner.latency_ms_sum += latency_ms;
        inner.draft_tokens += get("draft_total_tokens");
        inner.verifier_tokens += get("verifier_total_tokens");
        inner.total_tokens += get("total_tokens");
    }

    pub fn record_error(&self) {
        self.inner.lock().errors += 1;
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock();
        let baseline_cost = inner.total_cost + inner.total_saved;
        let savings_percent = if baseline_cost > 0.0 {
            (inner.total_saved / baseline_cost) * 100.0
        } else {
            0.0
        };
        MetricsSummary {
            total_queries: inner.total_queries,
            draft_accepted: inner.draft_accepted,
            draft_accept_rate: if inner.total_queries > 0 {
                inner.draft_accepted as f64 / inner.total_queries as f64
            } else {
                0.0
            },
            total_cost: inner.total_cost,
            total_saved: inner.total_saved,
            baseline_cost,
            savings_percent,
            avg_latency_ms: if inner.total_queries > 0 {
                inner.latency_ms_sum / inner.total_queries as f64
            } else {
                0.0
            },
            draft_tokens: inner.draft_tokens,
            verifier_tokens: inner.verifier_tokens,
            total_tokens: inner.total_tokens,
            errors: inner.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_includes_savings_and_tokens() {
        let collector = MetricsCollector::new();
        let mut metadata = Map::new();
        metadata.insert("draft_total_tokens".into(), json!(400));
        metadata.insert("verifier_total_tokens".into(), json!(1200));
        metadata.insert("total_tokens".into(), json!(1600));

        collector.record(6.54, 12.18, 120.0, true, &metadata);

        let summary = collector.summary();
        assert!((summary.total_cost - 6.54).abs() < 1e-9);
        assert!((summary.total_saved - 12.18).abs() < 1e-9);
        assert!((summary.baseline_cost - 18.72).abs() < 1e-9);
        assert!((summary.savings_percent - 65.1).abs() < 0.05);
        assert_eq!(summary.draft_tokens, 400);
        assert_eq!(summary.verifier_tokens, 1200);
        assert_eq!(summary.total_tokens, 1600);
        assert!((summary.avg_latency_ms - 120.0).abs() < 1e-9);
    }

    #[test]
    fn accept_rate_tracks_decisions() {
        let collector = MetricsCollector::new();
        let metadata = Map::new();
        collector.record(0.1, 0.0, 50.0, true, &metadata);
        collector.record(0.2, 0.0, 70.0, false, &metadata);
        collector.record(0.1, 0.0, 60.0, true, &metadata);

        let summary = collector.summary();
        assert_eq!(summary.total_queries, 3);
        assert_eq!(summary.draft_accepted, 2);
        assert!((summary.draft_accept_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_collector_is_all_zeroes() {
        let summary = MetricsCollector::new().summary();
        assert_eq!(summary.total_queries, 0);
        assert_eq!(summary.savings_percent, 0.0);
        assert_eq!(summary.avg_latency_ms, 0.0);
    }
}
