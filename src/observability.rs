//! Metrics hooks for the interceptor chain.
//!
//! Mirrors the teacher crate's `CacheMetrics` split: a trait with default no-op
//! methods implementors override selectively, plus a `NoOpMetrics` default used
//! when the caller doesn't wire in a real sink (Prometheus, StatsD, etc).

use crate::method_key::MethodKey;
use crate::subject::Subject;
use std::time::Duration;

/// Trait for interceptor chain metrics collection. Every stage that completes an
/// invocation calls the matching hook; implementors typically forward into
/// `metrics`/`metrics-exporter-prometheus` counters and histograms.
pub trait MetricsSink: Send + Sync {
    /// A stage allowed the call through (cache hit, rate limit admitted, retry
    /// attempt succeeded, etc).
    fn record_stage_outcome(&self, stage: &'static str, method: &MethodKey, outcome: &'static str) {
        debug!("stage={} method={} outcome={}", stage, method, outcome);
    }

    /// Total wall-clock duration of one full chain invocation for `method`.
    fn record_invocation(&self, method: &MethodKey, duration: Duration, success: bool) {
        debug!("method={} duration={:?} success={}", method, duration, success);
    }

    /// A rate-limit rejection for `(method, subject)`.
    fn record_rate_limited(&self, method: &MethodKey, subject: &Subject) {
        warn!("rate limited: method={} subject={}", method, subject);
    }

    /// A retry attempt being scheduled, 1-indexed.
    fn record_retry_attempt(&self, method: &MethodKey, attempt: u32, delay: Duration) {
        debug!("retry: method={} attempt={} delay={:?}", method, attempt, delay);
    }
}

/// Default metrics implementation (no-op beyond the `log` calls the default
/// trait methods already make).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl MetricsSink for NoOpMetrics {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_metrics_does_not_panic() {
        let metrics = NoOpMetrics;
        let method = MethodKey::new("invoice.create");
        metrics.record_stage_outcome("cache", &method, "hit");
        metrics.record_invocation(&method, Duration::from_millis(5), true);
        metrics.record_rate_limited(&method, &Subject::Unknown);
        metrics.record_retry_attempt(&method, 1, Duration::from_millis(100));
    }
}
