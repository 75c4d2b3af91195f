//! Retry stage: bounded re-invocation of the inner handler on transient
//! failure, with exponential backoff and jitter.
//!
//! This is the innermost stage (§2): it wraps only the handler itself and does
//! not re-enter cache, idempotency, rate-limit, or audit on a retried attempt —
//! those stages already ran once, outside this one, for the whole chain
//! invocation.

use crate::config::Config;
use crate::context::RequestContext;
use crate::error::Error;
use crate::handler::{HandlerFn, Stage};
use crate::observability::MetricsSink;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// A predicate over errors, used for `retryOn`/`ignoreOn` policy overrides.
/// Matching walks the same `Error` the handler raised — there is no nested
/// cause chain to unwind since the core's `Error` is already the leaf type.
pub type ErrorPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Per-operation retry controls.
#[derive(Clone)]
pub struct RetrySpec {
    pub enabled: bool,
    /// Bounded to `Config::retry_attempts_clamp` (default `[1, 20]`).
    pub max_attempts: u32,
    /// Base delay for `base * 2^(attempt-1)` backoff.
    pub base_delay: Duration,
    /// If set, only errors matching this predicate are retried (default:
    /// `Error::is_transient()`).
    pub retry_on: Option<ErrorPredicate>,
    /// If set, errors matching this predicate are never retried even if
    /// `retry_on` would otherwise match.
    pub ignore_on: Option<ErrorPredicate>,
}

impl std::fmt::Debug for RetrySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrySpec")
            .field("enabled", &self.enabled)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            retry_on: None,
            ignore_on: None,
        }
    }
}

impl RetrySpec {
    fn should_retry(&self, err: &Error) -> bool {
        if let Some(ignore) = &self.ignore_on {
            if ignore(err) {
                return false;
            }
        }
        match &self.retry_on {
            Some(predicate) => predicate(err),
            None => err.is_transient(),
        }
    }
}

fn backoff_with_jitter(base: Duration, attempt: u32, jitter_fraction: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let scaled = base.as_secs_f64() * 2f64.powi(exponent as i32);
    let jitter = scaled * jitter_fraction;
    let spread = rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::from_secs_f64((scaled + spread).max(0.0))
}

pub struct RetryStage {
    spec: RetrySpec,
    config: Arc<Config>,
    metrics: Arc<dyn MetricsSink>,
}

impl RetryStage {
    pub fn new(spec: RetrySpec, config: Arc<Config>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { spec, config, metrics }
    }
}

impl Stage for RetryStage {
    fn wrap(&self, inner: HandlerFn) -> HandlerFn {
        if !self.spec.enabled {
            return inner;
        }
        let spec = self.spec.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();
        let max_attempts = config.clamp_retry_attempts(spec.max_attempts);

        Arc::new(move |ctx: RequestContext| {
            let spec = spec.clone();
            let metrics = metrics.clone();
            let config = config.clone();
            let inner = inner.clone();

            Box::pin(async move {
                if ctx.policy_disabled() {
                    return inner(ctx).await;
                }

                let mut attempt = 1;
                loop {
                    match inner(ctx.clone()).await {
                        Ok(value) => return Ok(value),
                        Err(err) => {
                            if attempt >= max_attempts || !spec.should_retry(&err) {
                                return Err(err);
                            }
                            let delay = backoff_with_jitter(spec.base_delay, attempt, config.retry_jitter_fraction);
                            metrics.record_retry_attempt(&ctx.method, attempt, delay);
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                    }
                }
            })
        })
    }
}
