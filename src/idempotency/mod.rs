//! Idempotency stage: durable, concurrency-safe suppression of duplicate writes
//! sharing an idempotency key.
//!
//! Ownership of an in-flight record belongs to the *correlation id* of the
//! request that first claimed it, not to the idempotency key itself — this is
//! what lets the retry stage (innermost, §4.6) re-enter the same claim on a
//! retried attempt without racing against itself. A concurrent duplicate from a
//! different correlation id instead short-polls (`idempotency_poll_interval`
//! steps, up to `idempotency_poll_budget`) waiting for the owner to reach a
//! terminal state.

pub mod cleanup;
pub mod postgres;
pub mod store;

pub use store::{Claim, IdempotencyStore, InMemoryIdempotencyStore};

use crate::config::Config;
use crate::context::RequestContext;
use crate::error::Error;
use crate::handler::{HandlerFn, Stage};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Status of a durable idempotency record. `Pending` records past their
/// `expires_at` are treated as abandoned (owner crashed mid-processing) and are
/// reclaimable both lazily, on the next `acquire_or_get`, and eagerly, by
/// [`cleanup::spawn_cleanup_task`]. A non-expired `Failed` record is a
/// conflict for any other caller, not a reclaimable slot — expiry (or the
/// caller choosing a new key) is the only way past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

/// A durable idempotency record.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub method: String,
    pub request_hash: String,
    pub owner_correlation_id: String,
    pub status: IdempotencyStatus,
    pub response: Option<serde_json::Value>,
    pub ttl: Duration,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now > self.expires_at
    }
}

/// Per-operation idempotency controls.
#[derive(Debug, Clone)]
pub struct IdempotencySpec {
    pub enabled: bool,
    /// If true, a call with no idempotency key fails with
    /// `Error::MissingIdempotencyKey` instead of passing through unsuppressed.
    pub require_key: bool,
    /// How long a terminal (COMPLETED/FAILED) record, or an abandoned PENDING
    /// one, is retained before it is reclaimable. Default: 24 hours, matching
    /// the common convention of a one-day idempotency-key replay window.
    pub ttl: Duration,
    /// If true (default), reusing a key with a different request payload
    /// fails with `Error::IdempotencyKeyConflict`. If false, the payload is
    /// never compared and the key's status alone governs the outcome.
    pub conflict_on_different_request: bool,
    /// If true, a concurrent duplicate immediately fails with
    /// `Error::IdempotencyInFlight` instead of short-polling for the owner's
    /// terminal state.
    pub reject_in_flight: bool,
}

impl Default for IdempotencySpec {
    fn default() -> Self {
        Self {
            enabled: true,
            require_key: false,
            ttl: Duration::from_secs(24 * 3600),
            conflict_on_different_request: true,
            reject_in_flight: false,
        }
    }
}

pub struct IdempotencyStage<S: IdempotencyStore> {
    spec: IdempotencySpec,
    store: Arc<S>,
    config: Arc<Config>,
}

impl<S: IdempotencyStore + 'static> IdempotencyStage<S> {
    pub fn new(spec: IdempotencySpec, store: Arc<S>, config: Arc<Config>) -> Self {
        Self { spec, store, config }
    }
}

impl<S: IdempotencyStore + 'static> Stage for IdempotencyStage<S> {
    fn wrap(&self, inner: HandlerFn) -> HandlerFn {
        if !self.spec.enabled {
            return inner;
        }
        let spec = self.spec.clone();
        let store = self.store.clone();
        let config = self.config.clone();

        Arc::new(move |ctx: RequestContext| {
            let spec = spec.clone();
            let store = store.clone();
            let config = config.clone();
            let inner = inner.clone();

            Box::pin(async move {
                if ctx.policy_disabled() {
                    return inner(ctx).await;
                }

                let Some(key) = ctx.idempotency_key.clone() else {
                    if spec.require_key {
                        return Err(Error::MissingIdempotencyKey);
                    }
                    // No idempotency key presented and none required: this
                    // stage is a pass-through for this call.
                    return inner(ctx).await;
                };
                let request_hash = ctx.args.deterministic_hash();
                let method = ctx.method.to_string();
                let correlation_id = ctx.correlation_id.clone();

                let deadline = Instant::now() + config.idempotency_poll_budget;
                loop {
                    let claim = store
                        .acquire_or_get(&key, &method, &request_hash, &correlation_id, spec.ttl, spec.conflict_on_different_request)
                        .await?;
                    match claim {
                        Claim::Owner => {
                            let outcome = inner(ctx.clone()).await;
                            match outcome {
                                Ok(value) => {
                                    store.mark_completed(&key, &method, &correlation_id, value.clone()).await?;
                                    return Ok(value);
                                }
                                Err(err) => {
                                    store.mark_failed(&key, &method, &correlation_id).await?;
                                    return Err(err);
                                }
                            }
                        }
                        Claim::Completed(response) => return Ok(response),
                        Claim::InFlight => {
                            if spec.reject_in_flight || Instant::now() >= deadline {
                                return Err(Error::IdempotencyInFlight);
                            }
                            tokio::time::sleep(config.idempotency_poll_interval).await;
                        }
                    }
                }
            })
        })
    }
}
