//! Chain composition: wraps a handler outer-to-inner in the fixed order
//! Audit → Idempotency → Cache → RateLimit → Retry → handler (§2, §4.1).
//!
//! A stage whose spec is absent from [`ChainSpec`] is a transparent
//! pass-through — `InterceptorChain::build` simply skips constructing it,
//! rather than constructing a stage that no-ops at call time.

use crate::audit::{AuditSink, AuditSpec, AuditStage};
use crate::backend::CacheBackend;
use crate::cache::{CacheManager, CacheSpec, CacheStage};
use crate::config::Config;
use crate::context::RequestContext;
use crate::error::Error;
use crate::handler::{HandlerFn, Stage};
use crate::idempotency::{IdempotencySpec, IdempotencyStage, IdempotencyStore};
use crate::observability::MetricsSink;
use crate::policy::PolicyStore;
use crate::ratelimit::{RateLimitSpec, RateLimitStage, RateLimiterRegistry};
use crate::retry::{RetrySpec, RetryStage};
use std::sync::Arc;

/// The five per-operation declarations a handler may carry. `None` means the
/// stage is a pass-through for this operation.
#[derive(Clone, Default)]
pub struct ChainSpec {
    pub audit: Option<AuditSpec>,
    pub idempotency: Option<IdempotencySpec>,
    pub cache: Option<CacheSpec>,
    pub rate_limit: Option<RateLimitSpec>,
    pub retry: Option<RetrySpec>,
}

/// Shared collaborators every chain built from this runtime draws on. One
/// `Runtime` is constructed per process; many `ChainSpec`s are built against
/// it, one per registered operation.
pub struct Runtime<B: CacheBackend, P: PolicyStore, I: IdempotencyStore, A: AuditSink> {
    pub policy_store: Arc<P>,
    pub idempotency_store: Arc<I>,
    pub audit_sink: Arc<A>,
    pub cache_manager: Arc<CacheManager<B>>,
    pub rate_limiters: Arc<RateLimiterRegistry>,
    pub metrics: Arc<dyn MetricsSink>,
    pub config: Arc<Config>,
}

pub struct InterceptorChain<B: CacheBackend, P: PolicyStore, I: IdempotencyStore, A: AuditSink> {
    runtime: Arc<Runtime<B, P, I, A>>,
}

impl<B, P, I, A> InterceptorChain<B, P, I, A>
where
    B: CacheBackend + 'static,
    P: PolicyStore + 'static,
    I: IdempotencyStore + 'static,
    A: AuditSink + 'static,
{
    pub fn new(runtime: Arc<Runtime<B, P, I, A>>) -> Self {
        Self { runtime }
    }

    /// Build the wrapped handler for one operation. Building the same
    /// `ChainSpec` twice for the same raw handler produces two independent,
    /// behaviorally identical handlers — wrapping is idempotent because it
    /// always starts from the caller-supplied `handler`, never from a
    /// previously wrapped one.
    pub fn build(&self, spec: ChainSpec, handler: HandlerFn) -> HandlerFn {
        let mut wrapped = handler;

        if let Some(retry_spec) = spec.retry {
            wrapped = RetryStage::new(retry_spec, self.runtime.config.clone(), self.runtime.metrics.clone()).wrap(wrapped);
        }
        if let Some(rl_spec) = spec.rate_limit {
            wrapped = RateLimitStage::new(rl_spec, self.runtime.rate_limiters.clone(), self.runtime.metrics.clone()).wrap(wrapped);
        }
        if let Some(cache_spec) = spec.cache {
            wrapped =
                CacheStage::new(cache_spec, self.runtime.cache_manager.clone(), self.runtime.config.clone(), self.runtime.metrics.clone())
                    .wrap(wrapped);
        }
        if let Some(idem_spec) = spec.idempotency {
            wrapped = IdempotencyStage::new(idem_spec, self.runtime.idempotency_store.clone(), self.runtime.config.clone()).wrap(wrapped);
        }
        if let Some(audit_spec) = spec.audit {
            wrapped =
                AuditStage::new(audit_spec, self.runtime.audit_sink.clone(), self.runtime.config.clone(), self.runtime.metrics.clone())
                    .wrap(wrapped);
        }

        self.with_policy_resolution(wrapped)
    }

    /// Outermost wrap, applied unconditionally: resolves and memoizes the
    /// `(subject, method)` policy once per invocation so every stage below
    /// sees `ctx.cached_policy()` already populated, satisfying "resolve
    /// Policy at most once per invocation" without each stage racing its own
    /// lookup.
    fn with_policy_resolution(&self, inner: HandlerFn) -> HandlerFn {
        let policy_store = self.runtime.policy_store.clone();

        Arc::new(move |ctx: RequestContext| {
            let policy_store = policy_store.clone();
            let inner = inner.clone();

            Box::pin(async move {
                if ctx.cached_policy().is_none() {
                    match policy_store.find(&ctx.subject, &ctx.method).await {
                        Ok(Some(policy)) => {
                            ctx.memoize_policy(policy);
                        }
                        Ok(None) => {
                            ctx.memoize_policy(Default::default());
                        }
                        Err(err) => {
                            log::warn!("policy lookup failed for {}: {}", ctx.method, err);
                            ctx.memoize_policy(Default::default());
                        }
                    }
                }
                inner(ctx).await
            })
        })
    }
}

pub type ChainResult = std::result::Result<serde_json::Value, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use crate::audit::InMemoryAuditSink;
    use crate::backend::InMemoryBackend;
    use crate::idempotency::InMemoryIdempotencyStore;
    use crate::method_key::MethodKey;
    use crate::observability::NoOpMetrics;
    use crate::policy::{InMemoryPolicyStore, Policy};
    use crate::subject::Subject;
    use serde_json::json;
    use std::time::Duration;

    fn runtime() -> Arc<Runtime<InMemoryBackend, InMemoryPolicyStore, InMemoryIdempotencyStore, InMemoryAuditSink>> {
        Arc::new(Runtime {
            policy_store: Arc::new(InMemoryPolicyStore::new()),
            idempotency_store: Arc::new(InMemoryIdempotencyStore::new()),
            audit_sink: Arc::new(InMemoryAuditSink::new()),
            cache_manager: Arc::new(CacheManager::new(InMemoryBackend::new, Arc::new(Config::default()))),
            rate_limiters: Arc::new(RateLimiterRegistry::new()),
            metrics: Arc::new(NoOpMetrics),
            config: Arc::new(Config::default()),
        })
    }

    #[tokio::test]
    async fn pass_through_chain_just_calls_handler() {
        let chain = InterceptorChain::new(runtime());
        let inner: HandlerFn = Arc::new(|_ctx| Box::pin(async { Ok(json!({"ok": true})) }));
        let wrapped = chain.build(ChainSpec::default(), inner);

        let ctx = RequestContext::new("corr-1", Subject::Unknown, MethodKey::new("invoice.read"), Args::from_values(vec![json!(1)]));
        let result = wrapped(ctx).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
    }

    #[tokio::test]
    async fn full_chain_composes_cache_and_audit() {
        let rt = runtime();
        rt.policy_store.upsert(&Subject::Unknown, &MethodKey::new("invoice.read"), Policy::default());
        let chain = InterceptorChain::new(rt.clone());

        let spec = ChainSpec {
            audit: Some(crate::audit::AuditSpec { capture_result: true, ..Default::default() }),
            cache: Some(CacheSpec {
                enabled: true,
                cache_name: "invoices".into(),
                ttl: Some(Duration::from_secs(30)),
                scope: crate::cache::CacheScope::Subject,
            }),
            ..Default::default()
        };

        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let inner: HandlerFn = Arc::new(move |_ctx| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(json!({"id": 1}))
            })
        });
        let wrapped = chain.build(spec, inner);

        let ctx = RequestContext::new("corr-1", Subject::Unknown, MethodKey::new("invoice.read"), Args::from_values(vec![json!(1)]));
        wrapped(ctx.clone()).await.unwrap();
        wrapped(ctx).await.unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1, "second call should be served from cache");
        assert_eq!(rt.audit_sink.rows().len(), 2, "audit records every invocation regardless of cache outcome");
    }

    #[tokio::test]
    async fn policy_disabled_bypasses_every_stage_but_audit() {
        let rt = runtime();
        let method = MethodKey::new("invoice.read");
        rt.policy_store.upsert(&Subject::Unknown, &method, Policy { enabled: Some(false), ..Default::default() });
        let chain = InterceptorChain::new(rt.clone());

        let spec = ChainSpec {
            audit: Some(crate::audit::AuditSpec { capture_result: true, ..Default::default() }),
            cache: Some(CacheSpec {
                enabled: true,
                cache_name: "invoices".into(),
                ttl: Some(Duration::from_secs(30)),
                scope: crate::cache::CacheScope::Subject,
            }),
            ..Default::default()
        };

        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let inner: HandlerFn = Arc::new(move |_ctx| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(json!({"id": 1}))
            })
        });
        let wrapped = chain.build(spec, inner);

        let ctx = RequestContext::new("corr-1", Subject::Unknown, method, Args::from_values(vec![json!(1)]));
        wrapped(ctx.clone()).await.unwrap();
        wrapped(ctx).await.unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2, "disabled policy bypasses the cache stage");
        assert_eq!(rt.audit_sink.rows().len(), 2, "audit still runs even when the policy disables every other stage");
    }
}
