//! Cache stage: short-circuits reads by a stable key derived from
//! `(methodKey, argsHash, subjectKey)`.
//!
//! Distinct from [`manager::CacheManager`]'s own TTL-by-name materialization:
//! the stage resolves its own effective TTL (operation spec, overridden by
//! policy) and clamps it to `Config::cache_ttl_clamp` (default `[1, 3600]`
//! seconds) before asking the manager to write with that TTL, bypassing the
//! named cache's TTL-by-name default for this particular write.

pub mod manager;

pub use manager::CacheManager;

use crate::backend::CacheBackend;
use crate::config::Config;
use crate::context::RequestContext;
use crate::handler::{HandlerFn, Stage};
use crate::observability::MetricsSink;
use crate::subject::Subject;
use std::sync::Arc;
use std::time::Duration;

/// A constant stand-in for the subject component of a GLOBAL-scoped cache
/// key, so every caller lands on the same entry.
const GLOBAL_SCOPE_KEY: &str = "*";

/// Who the cached entry is partitioned by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheScope {
    /// Shared across every caller: the subject never enters the cache key.
    Global,
    /// Partitioned per resolved subject. Falls back to `"anonymous"` when the
    /// subject could not be resolved.
    #[default]
    Subject,
}

/// Per-operation cache controls.
#[derive(Debug, Clone)]
pub struct CacheSpec {
    pub enabled: bool,
    /// Name of the materialized cache this operation reads/writes, following
    /// the TTL-by-name grammar documented on [`manager::CacheManager`].
    pub cache_name: String,
    /// Explicit TTL for entries written by this operation, clamped to
    /// `Config::cache_ttl_clamp`. `None` defers to the named cache's own TTL.
    /// A resolved TTL of zero (from this field or a policy override) disables
    /// caching for that call entirely rather than being clamped up.
    pub ttl: Option<Duration>,
    /// Whether cache keys are partitioned by subject or shared globally.
    pub scope: CacheScope,
}

pub struct CacheStage<B: CacheBackend> {
    spec: CacheSpec,
    manager: Arc<CacheManager<B>>,
    config: Arc<Config>,
    metrics: Arc<dyn MetricsSink>,
}

impl<B: CacheBackend + 'static> CacheStage<B> {
    pub fn new(spec: CacheSpec, manager: Arc<CacheManager<B>>, config: Arc<Config>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { spec, manager, config, metrics }
    }
}

impl<B: CacheBackend + 'static> Stage for CacheStage<B> {
    fn wrap(&self, inner: HandlerFn) -> HandlerFn {
        if !self.spec.enabled {
            return inner;
        }
        let spec = self.spec.clone();
        let manager = self.manager.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();

        Arc::new(move |ctx: RequestContext| {
            let spec = spec.clone();
            let manager = manager.clone();
            let config = config.clone();
            let metrics = metrics.clone();
            let inner = inner.clone();

            Box::pin(async move {
                if ctx.policy_disabled() {
                    return inner(ctx).await;
                }

                let subject_component = match spec.scope {
                    CacheScope::Global => GLOBAL_SCOPE_KEY.to_string(),
                    CacheScope::Subject => match &ctx.subject {
                        Subject::Unknown => "anonymous".to_string(),
                        resolved => resolved.to_string(),
                    },
                };
                let cache_key = format!("{}:{}:{}", ctx.method, ctx.args.deterministic_hash(), subject_component);

                let policy = ctx.cached_policy();
                let requested_ttl_secs = policy.and_then(|p| p.cache_ttl).or(spec.ttl).map(|d| d.as_secs());
                if requested_ttl_secs == Some(0) {
                    // TTL of zero means "bypass caching for this call".
                    return inner(ctx).await;
                }
                let effective_ttl = requested_ttl_secs.map(|secs| Duration::from_secs(config.clamp_cache_ttl(secs)));

                if let Ok(Some(hit)) = manager.get::<serde_json::Value>(&spec.cache_name, &cache_key).await {
                    metrics.record_stage_outcome("cache", &ctx.method, "hit");
                    return Ok(hit);
                }
                metrics.record_stage_outcome("cache", &ctx.method, "miss");

                let result = inner(ctx.clone()).await?;
                if let Err(err) = manager.set_with_ttl(&spec.cache_name, &cache_key, &result, effective_ttl).await {
                    log::warn!("cache stage failed to store entry for {}: {}", ctx.method, err);
                }
                Ok(result)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use crate::backend::InMemoryBackend;
    use crate::method_key::MethodKey;
    use crate::observability::NoOpMetrics;
    use crate::subject::Subject;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> RequestContext {
        RequestContext::new("corr-1", Subject::Unknown, MethodKey::new("invoice.read"), Args::from_values(vec![json!(1)]))
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let manager = Arc::new(CacheManager::new(InMemoryBackend::new, Arc::new(Config::default())));
        let stage = CacheStage::new(
            CacheSpec {
                enabled: true,
                cache_name: "invoices".into(),
                ttl: Some(Duration::from_secs(60)),
                scope: CacheScope::Subject,
            },
            manager,
            Arc::new(Config::default()),
            Arc::new(NoOpMetrics),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let inner: HandlerFn = Arc::new(move |_ctx| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"id": 1}))
            })
        });
        let wrapped = stage.wrap(inner);

        wrapped(ctx()).await.unwrap();
        wrapped(ctx()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_args_miss_independently() {
        let manager = Arc::new(CacheManager::new(InMemoryBackend::new, Arc::new(Config::default())));
        let stage = CacheStage::new(
            CacheSpec { enabled: true, cache_name: "invoices".into(), ttl: None, scope: CacheScope::Subject },
            manager,
            Arc::new(Config::default()),
            Arc::new(NoOpMetrics),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let inner: HandlerFn = Arc::new(move |_ctx| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"ok": true}))
            })
        });
        let wrapped = stage.wrap(inner);

        let mut other_args = ctx();
        other_args.args = Args::from_values(vec![json!(2)]);

        wrapped(ctx()).await.unwrap();
        wrapped(other_args).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn global_scope_shares_entry_across_subjects() {
        let manager = Arc::new(CacheManager::new(InMemoryBackend::new, Arc::new(Config::default())));
        let stage = CacheStage::new(
            CacheSpec { enabled: true, cache_name: "invoices".into(), ttl: None, scope: CacheScope::Global },
            manager,
            Arc::new(Config::default()),
            Arc::new(NoOpMetrics),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let inner: HandlerFn = Arc::new(move |_ctx| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"id": 1}))
            })
        });
        let wrapped = stage.wrap(inner);

        let mut other_subject = ctx();
        other_subject.subject = Subject::User("u2".into());

        wrapped(ctx()).await.unwrap();
        wrapped(other_subject).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "GLOBAL scope ignores the caller's subject entirely");
    }

    #[tokio::test]
    async fn subject_scope_falls_back_to_anonymous_for_unknown_subject() {
        let manager = Arc::new(CacheManager::new(InMemoryBackend::new, Arc::new(Config::default())));
        let stage = CacheStage::new(
            CacheSpec { enabled: true, cache_name: "invoices".into(), ttl: None, scope: CacheScope::Subject },
            manager,
            Arc::new(Config::default()),
            Arc::new(NoOpMetrics),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let inner: HandlerFn = Arc::new(move |_ctx| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"id": 1}))
            })
        });
        let wrapped = stage.wrap(inner);

        // Two distinct, unresolved subjects both land on the "anonymous" key.
        wrapped(ctx()).await.unwrap();
        wrapped(ctx()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_bypasses_caching_for_the_call() {
        let manager = Arc::new(CacheManager::new(InMemoryBackend::new, Arc::new(Config::default())));
        let stage = CacheStage::new(
            CacheSpec {
                enabled: true,
                cache_name: "invoices".into(),
                ttl: Some(Duration::from_secs(0)),
                scope: CacheScope::Subject,
            },
            manager,
            Arc::new(Config::default()),
            Arc::new(NoOpMetrics),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let inner: HandlerFn = Arc::new(move |_ctx| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"id": 1}))
            })
        });
        let wrapped = stage.wrap(inner);

        wrapped(ctx()).await.unwrap();
        wrapped(ctx()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2, "a TTL of zero must disable caching rather than clamp to 1s");
    }
}
