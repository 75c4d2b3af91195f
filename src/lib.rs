//! # interceptor-kit
//!
//! A reusable cross-cutting interceptor pipeline for HTTP request handlers,
//! independent of any specific web framework, database driver, or JSON codec.
//!
//! It composes five behaviors around an arbitrary async handler — audit
//! logging, idempotency, caching, rate limiting, and retry — and resolves
//! per-`(subject, method)` policy overrides from a pluggable store.
//!
//! ## Chain order
//!
//! Each operation may declare any subset of five specs. At build time the
//! chain wraps the handler outer-to-inner:
//!
//! 1. **Audit** — records outcome and timing of everything below it.
//! 2. **Idempotency** — short-circuits repeated writes sharing a key.
//! 3. **Cache** — short-circuits reads by stable key.
//! 4. **RateLimit** — rejects calls exceeding the permitted rate for a subject.
//! 5. **Retry** — re-invokes the inner operation on transient failure.
//!
//! A stage whose spec is absent is a transparent pass-through.
//!
//! ## Quick start
//!
//! ```ignore
//! use interceptor_kit::{
//!     backend::InMemoryBackend,
//!     cache::{CacheManager, CacheSpec},
//!     chain::{ChainSpec, InterceptorChain, Runtime},
//!     audit::InMemoryAuditSink,
//!     idempotency::InMemoryIdempotencyStore,
//!     policy::InMemoryPolicyStore,
//!     ratelimit::RateLimiterRegistry,
//!     observability::NoOpMetrics,
//!     config::Config,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = Arc::new(Config::default());
//! let runtime = Arc::new(Runtime {
//!     policy_store: Arc::new(InMemoryPolicyStore::new()),
//!     idempotency_store: Arc::new(InMemoryIdempotencyStore::new()),
//!     audit_sink: Arc::new(InMemoryAuditSink::new()),
//!     cache_manager: Arc::new(CacheManager::new(InMemoryBackend::new, config.clone())),
//!     rate_limiters: Arc::new(RateLimiterRegistry::new()),
//!     metrics: Arc::new(NoOpMetrics),
//!     config,
//! });
//! let chain = InterceptorChain::new(runtime);
//! let handler = chain.build(ChainSpec::default(), Arc::new(|_ctx| Box::pin(async { Ok(serde_json::json!(null)) })));
//! let _ = handler;
//! # }
//! ```
//!
//! ## Glossary
//!
//! - **Subject** — the resolved caller identity (`apiKey:<hash>`, `user:<id>`,
//!   `ip:<addr>`, or `unknown`).
//! - **MethodKey** — the stable identifier of an intercepted operation.
//! - **Policy** — per-`(subject, method)` overrides for any stage's
//!   parameters.
//! - **Correlation id** — a per-request identifier threaded through context
//!   and audit rows; generation is out of scope for this crate.
//! - **Idempotency key** — a client-supplied token whose repeated use for the
//!   same operation should return the original response rather than
//!   re-executing it.
//! - **Named cache** — a materialized cache, addressed by a name following the
//!   `<base>(:ttl=<seconds>)?` grammar (see [`cache::manager`]).

#[macro_use]
extern crate log;

pub mod args;
pub mod audit;
pub mod backend;
pub mod cache;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod idempotency;
pub mod method_key;
pub mod observability;
pub mod policy;
pub mod ratelimit;
pub mod retry;
pub mod serialization;
pub mod subject;

pub use backend::CacheBackend;
pub use chain::{ChainSpec, InterceptorChain, Runtime};
pub use config::Config;
pub use context::RequestContext;
pub use error::{Error, Result};
pub use handler::{HandlerFn, HandlerResult, Stage};
pub use method_key::MethodKey;
pub use subject::{Subject, SubjectResolver};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
