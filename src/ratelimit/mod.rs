//! Rate-limit stage: a non-blocking token-bucket admission check keyed by
//! `(methodKey, subjectType, limitForPeriod)` — deliberately *not* keyed by the
//! caller's full subject identity, so the limiter map's cardinality stays
//! bounded regardless of how many distinct callers a method sees.
//!
//! Grounded on `fastnear-near-outlayer/coordinator/src/middleware/throttle.rs`'s
//! use of `governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>` built
//! from a `Quota`.

use crate::context::RequestContext;
use crate::error::Error;
use crate::handler::{HandlerFn, Stage};
use crate::method_key::MethodKey;
use crate::observability::MetricsSink;
use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type Bucket = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// Per-operation rate limit controls. The refresh period is fixed at one
/// second; `limit_for_period` is the number of calls admitted per second.
#[derive(Debug, Clone)]
pub struct RateLimitSpec {
    pub enabled: bool,
    /// Calls admitted per one-second refresh window.
    pub limit_for_period: u32,
}

/// Registry of token buckets keyed by the bounded `(method, subjectType,
/// limitForPeriod)` triple, created lazily on first use.
#[derive(Default)]
pub struct RateLimiterRegistry {
    buckets: DashMap<(String, &'static str, u32), Arc<Bucket>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_for(&self, method: &MethodKey, subject_type: &'static str, spec: &RateLimitSpec) -> Arc<Bucket> {
        let key = (method.to_string(), subject_type, spec.limit_for_period);
        self.buckets
            .entry(key)
            .or_insert_with(|| {
                let quota = Quota::per_second(NonZeroU32::new(spec.limit_for_period.max(1)).unwrap());
                Arc::new(RateLimiter::direct(quota))
            })
            .clone()
    }
}

pub struct RateLimitStage {
    spec: RateLimitSpec,
    registry: Arc<RateLimiterRegistry>,
    metrics: Arc<dyn MetricsSink>,
}

impl RateLimitStage {
    pub fn new(spec: RateLimitSpec, registry: Arc<RateLimiterRegistry>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { spec, registry, metrics }
    }
}

impl Stage for RateLimitStage {
    fn wrap(&self, inner: HandlerFn) -> HandlerFn {
        if !self.spec.enabled {
            return inner;
        }
        let spec = self.spec.clone();
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();

        Arc::new(move |ctx: RequestContext| {
            let spec = spec.clone();
            let registry = registry.clone();
            let metrics = metrics.clone();
            let inner = inner.clone();

            Box::pin(async move {
                if ctx.policy_disabled() {
                    return inner(ctx).await;
                }

                let effective = ctx
                    .cached_policy()
                    .and_then(|p| p.rate_limit_for_period)
                    .map(|n| RateLimitSpec { enabled: spec.enabled, limit_for_period: n })
                    .unwrap_or_else(|| spec.clone());

                let bucket = registry.bucket_for(&ctx.method, ctx.subject.subject_type(), &effective);

                match bucket.check() {
                    Ok(()) => {
                        metrics.record_stage_outcome("rate_limit", &ctx.method, "admitted");
                        inner(ctx).await
                    }
                    Err(not_until) => {
                        let wait = not_until.wait_time_from(governor::clock::DefaultClock::default().now());
                        // §8.6: Retry-After must carry an integer number of seconds, at least 1.
                        let retry_after = wait.max(Duration::from_secs(1));
                        metrics.record_rate_limited(&ctx.method, &ctx.subject);
                        Err(Error::RateLimited { retry_after })
                    }
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use crate::method_key::MethodKey;
    use crate::observability::NoOpMetrics;
    use crate::subject::Subject;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new("corr-1", Subject::Unknown, MethodKey::new("invoice.create"), Args::from_values(vec![json!(1)]))
    }

    #[tokio::test]
    async fn admits_calls_within_quota_then_rejects() {
        let registry = Arc::new(RateLimiterRegistry::new());
        let stage = RateLimitStage::new(
            RateLimitSpec { enabled: true, limit_for_period: 2 },
            registry,
            Arc::new(NoOpMetrics),
        );

        let inner: HandlerFn = Arc::new(|_ctx| Box::pin(async { Ok(json!(1)) }));
        let wrapped = stage.wrap(inner);

        assert!(wrapped(ctx()).await.is_ok());
        assert!(wrapped(ctx()).await.is_ok());
        let third = wrapped(ctx()).await;
        assert!(matches!(third, Err(Error::RateLimited { .. })));
    }

    #[tokio::test]
    async fn rejection_carries_retry_after_of_at_least_one_second() {
        let registry = Arc::new(RateLimiterRegistry::new());
        let stage = RateLimitStage::new(RateLimitSpec { enabled: true, limit_for_period: 1 }, registry, Arc::new(NoOpMetrics));
        let inner: HandlerFn = Arc::new(|_ctx| Box::pin(async { Ok(json!(1)) }));
        let wrapped = stage.wrap(inner);

        wrapped(ctx()).await.unwrap();
        match wrapped(ctx()).await {
            Err(Error::RateLimited { retry_after }) => assert!(retry_after >= Duration::from_secs(1)),
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }
}
