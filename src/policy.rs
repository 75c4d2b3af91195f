//! Per-`(subject, method)` policy overrides, with a short-TTL read-through cache.

use crate::error::Result;
use crate::method_key::MethodKey;
use crate::subject::Subject;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-stage overrides resolved for a `(subject, method)` pair. Every field is
/// optional; an absent field means "use the operation's own declared spec", not
/// "disable the stage".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Policy {
    /// If `Some(false)`, every stage but audit is bypassed for this
    /// `(subject, method)` pair.
    pub enabled: Option<bool>,
    pub audit_enabled: Option<bool>,
    pub idempotency_ttl: Option<Duration>,
    pub cache_ttl: Option<Duration>,
    pub cache_name: Option<String>,
    pub rate_limit_for_period: Option<u32>,
    pub retry_max_attempts: Option<u32>,
    pub retry_base_delay: Option<Duration>,
}

/// Durable store backing policy lookups. Implementations talk to whatever
/// relational store holds policy rows; the core only needs this contract.
#[allow(async_fn_in_trait)]
pub trait PolicyStore: Send + Sync {
    async fn find(&self, subject: &Subject, method: &MethodKey) -> Result<Option<Policy>>;
}

/// In-memory `PolicyStore` for tests and the demo binary.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    rows: DashMap<(String, String), Policy>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, subject: &Subject, method: &MethodKey, policy: Policy) {
        self.rows.insert((subject.to_string(), method.to_string()), policy);
    }
}

impl PolicyStore for InMemoryPolicyStore {
    async fn find(&self, subject: &Subject, method: &MethodKey) -> Result<Option<Policy>> {
        Ok(self.rows.get(&(subject.to_string(), method.to_string())).map(|r| r.clone()))
    }
}

/// Wraps any `PolicyStore` with a read-through cache keyed by `(subjectKey,
/// methodKey)`. Caches an absent result too, so a burst of calls for a subject
/// with no override does not stampede the backing store.
pub struct CachingPolicyStore<S> {
    inner: Arc<S>,
    ttl: Duration,
    cache: DashMap<(String, String), (Option<Policy>, Instant)>,
}

impl<S: PolicyStore> CachingPolicyStore<S> {
    pub fn new(inner: Arc<S>, ttl: Duration) -> Self {
        Self { inner, ttl, cache: DashMap::new() }
    }
}

impl<S: PolicyStore> PolicyStore for CachingPolicyStore<S> {
    async fn find(&self, subject: &Subject, method: &MethodKey) -> Result<Option<Policy>> {
        let key = (subject.to_string(), method.to_string());

        if let Some(entry) = self.cache.get(&key) {
            let (cached, fetched_at) = &*entry;
            if fetched_at.elapsed() < self.ttl {
                return Ok(cached.clone());
            }
        }

        let fresh = self.inner.find(subject, method).await?;
        self.cache.insert(key, (fresh.clone(), Instant::now()));
        Ok(fresh)
    }
}
