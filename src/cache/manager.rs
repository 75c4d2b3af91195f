//! Named caches with a TTL parsed from the name itself.
//!
//! A name follows the grammar `<base>(:ttl=<seconds>)?`, e.g. `"invoices"` or
//! `"invoices:ttl=120"`. Per the naming contract, the *whole* name is the
//! cache's identity: two names sharing a base but differing in TTL suffix (or
//! differing only in whether a suffix is present at all) address distinct
//! materialized caches. Each distinct name lazily gets its own backend
//! instance, built from the manager's factory the first time that name is
//! used. The resolved TTL is clamped to `Config::named_cache_ttl_clamp`
//! (default `[1, 86400]` seconds).

use crate::backend::CacheBackend;
use crate::config::Config;
use crate::error::Result;
use crate::serialization::{deserialize_from_cache, serialize_for_cache};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

fn parse_name(raw: &str) -> (&str, Option<u64>) {
    match raw.split_once(":ttl=") {
        Some((base, suffix)) => (base, suffix.parse::<u64>().ok()),
        None => (raw, None),
    }
}

pub struct CacheManager<B: CacheBackend> {
    /// Builds a fresh, independent `B` for each distinct cache name this
    /// manager ever sees.
    factory: Arc<dyn Fn() -> B + Send + Sync>,
    config: Arc<Config>,
    /// One materialized cache per full name string, created on first use.
    instances: DashMap<String, (B, Duration)>,
}

impl<B: CacheBackend> CacheManager<B> {
    pub fn new(factory: impl Fn() -> B + Send + Sync + 'static, config: Arc<Config>) -> Self {
        Self { factory: Arc::new(factory), config, instances: DashMap::new() }
    }

    fn resolve_ttl(&self, name: &str) -> Duration {
        let (_, suffix_seconds) = parse_name(name);
        let seconds = suffix_seconds
            .map(|s| self.config.clamp_named_cache_ttl(s))
            .unwrap_or_else(|| self.config.named_cache_ttl_clamp.1.min(3600));
        Duration::from_secs(seconds)
    }

    /// Resolve the TTL a name would use, without materializing its cache.
    pub fn ttl_for(&self, name: &str) -> Duration {
        if let Some(existing) = self.instances.get(name) {
            return existing.1;
        }
        self.resolve_ttl(name)
    }

    /// Return the backend and TTL for `name`, building it via the factory on
    /// first use. Subsequent calls with the exact same name reuse it.
    fn instance(&self, name: &str) -> (B, Duration) {
        if let Some(existing) = self.instances.get(name) {
            return existing.clone();
        }
        let ttl = self.resolve_ttl(name);
        let factory = &self.factory;
        self.instances.entry(name.to_string()).or_insert_with(|| (factory(), ttl)).clone()
    }

    pub async fn get<T: DeserializeOwned>(&self, name: &str, key: &str) -> Result<Option<T>> {
        let (backend, _) = self.instance(name);
        match backend.get(key).await? {
            Some(bytes) => Ok(Some(deserialize_from_cache(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, name: &str, key: &str, value: &T) -> Result<()> {
        let (backend, ttl) = self.instance(name);
        let bytes = serialize_for_cache(value)?;
        backend.set(key, bytes, Some(ttl)).await
    }

    /// Write with a caller-supplied TTL, bypassing the name's own TTL
    /// resolution. Used by the cache stage when an operation or policy
    /// specifies its own TTL (clamped separately to `Config::cache_ttl_clamp`).
    pub async fn set_with_ttl<T: Serialize>(&self, name: &str, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let (backend, default_ttl) = self.instance(name);
        let bytes = serialize_for_cache(value)?;
        backend.set(key, bytes, ttl.or(Some(default_ttl))).await
    }

    pub async fn delete(&self, name: &str, key: &str) -> Result<()> {
        let (backend, _) = self.instance(name);
        backend.delete(key).await
    }
}
