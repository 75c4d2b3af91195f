//! Audit stage: append-only outcome logging around every call it wraps.
//!
//! Surrounds the inner handler. On success it records `OK` with duration and an
//! optional captured result; on failure it records `ERROR` with the failure
//! message, then re-propagates the original error unchanged. A persistence
//! failure in the sink itself is logged and dropped — it must never affect the
//! business path, so `AuditSink::record` is always called in its own isolated
//! failure domain at the stage boundary (see [`AuditSink`]).

pub mod postgres;

use crate::config::Config;
use crate::context::RequestContext;
use crate::handler::{HandlerFn, Stage};
use crate::method_key::MethodKey;
use crate::observability::MetricsSink;
use crate::subject::Subject;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One row of the audit log.
#[derive(Debug, Clone)]
pub struct AuditRow {
    pub correlation_id: String,
    pub subject: Subject,
    pub method: MethodKey,
    pub outcome: AuditOutcome,
    pub duration: Duration,
    pub args: Option<Value>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Ok,
    Error,
}

/// Per-operation audit controls. Absent fields fall back to the stage's
/// defaults (all capture disabled except `enabled`, which defaults to `true`
/// once an `AuditSpec` is declared at all).
#[derive(Debug, Clone)]
pub struct AuditSpec {
    pub enabled: bool,
    pub capture_args: bool,
    pub capture_result: bool,
    pub capture_stacktrace: bool,
    pub max_payload_chars: Option<usize>,
    /// Type-name prefixes that bypass audit entirely for this operation, in
    /// addition to the process-wide `Config::audit_excluded_type_prefixes`.
    pub excluded_type_prefixes: Vec<String>,
}

impl Default for AuditSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            capture_args: false,
            capture_result: false,
            capture_stacktrace: false,
            max_payload_chars: None,
            excluded_type_prefixes: Vec::new(),
        }
    }
}

/// Durable sink for audit rows. Implementations MUST persist in an isolated
/// transaction/connection so a sink failure never rolls back or blocks the
/// business path; the stage already treats every `Err` from `record` as
/// log-and-drop, but the sink itself should not share a transaction with
/// the wrapped handler.
#[allow(async_fn_in_trait)]
pub trait AuditSink: Send + Sync {
    async fn record(&self, row: AuditRow) -> crate::error::Result<()>;
}

/// In-memory sink for tests and the demo binary.
#[derive(Default)]
pub struct InMemoryAuditSink {
    rows: std::sync::Mutex<Vec<AuditRow>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<AuditRow> {
        self.rows.lock().expect("audit sink mutex poisoned").clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    async fn record(&self, row: AuditRow) -> crate::error::Result<()> {
        self.rows.lock().expect("audit sink mutex poisoned").push(row);
        Ok(())
    }
}

/// Truncation envelope stored in place of a payload exceeding the configured
/// character cap.
#[derive(Debug, Clone, serde::Serialize)]
struct Truncated {
    #[serde(rename = "_truncated")]
    truncated: bool,
    #[serde(rename = "_originalLength")]
    original_length: usize,
    #[serde(rename = "_preview")]
    preview: String,
}

fn cap_payload(value: &Value, max_chars: usize) -> Value {
    let rendered = value.to_string();
    if rendered.chars().count() <= max_chars {
        return value.clone();
    }
    let preview: String = rendered.chars().take(max_chars).collect();
    serde_json::to_value(Truncated {
        truncated: true,
        original_length: rendered.chars().count(),
        preview,
    })
    .expect("Truncated always serializes")
}

fn is_excluded(method: &MethodKey, spec: &AuditSpec, config: &Config) -> bool {
    let name = method.as_str();
    spec.excluded_type_prefixes
        .iter()
        .chain(config.audit_excluded_type_prefixes.iter())
        .any(|prefix| name.starts_with(prefix.as_str()))
}

pub struct AuditStage<A: AuditSink> {
    spec: AuditSpec,
    sink: Arc<A>,
    config: Arc<Config>,
    metrics: Arc<dyn MetricsSink>,
}

impl<A: AuditSink + 'static> AuditStage<A> {
    pub fn new(spec: AuditSpec, sink: Arc<A>, config: Arc<Config>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { spec, sink, config, metrics }
    }
}

impl<A: AuditSink + 'static> Stage for AuditStage<A> {
    fn wrap(&self, inner: HandlerFn) -> HandlerFn {
        if !self.spec.enabled {
            return inner;
        }
        let spec = self.spec.clone();
        let sink = self.sink.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();

        Arc::new(move |ctx: RequestContext| {
            let spec = spec.clone();
            let sink = sink.clone();
            let config = config.clone();
            let metrics = metrics.clone();
            let inner = inner.clone();

            Box::pin(async move {
                if is_excluded(&ctx.method, &spec, &config) {
                    return inner(ctx).await;
                }

                let max_chars = spec.max_payload_chars.unwrap_or(config.default_max_payload_chars);
                let started = Instant::now();
                let outcome = inner(ctx.clone()).await;
                let duration = started.elapsed();

                let row = match &outcome {
                    Ok(result) => AuditRow {
                        correlation_id: ctx.correlation_id.clone(),
                        subject: ctx.subject.clone(),
                        method: ctx.method.clone(),
                        outcome: AuditOutcome::Ok,
                        duration,
                        args: spec.capture_args.then(|| cap_payload(ctx.args.as_value(), max_chars)),
                        result: spec.capture_result.then(|| cap_payload(result, max_chars)),
                        error_message: None,
                        recorded_at: Utc::now(),
                    },
                    Err(err) => AuditRow {
                        correlation_id: ctx.correlation_id.clone(),
                        subject: ctx.subject.clone(),
                        method: ctx.method.clone(),
                        outcome: AuditOutcome::Error,
                        duration,
                        args: spec.capture_args.then(|| cap_payload(ctx.args.as_value(), max_chars)),
                        result: None,
                        error_message: Some(err.to_string()),
                        recorded_at: Utc::now(),
                    },
                };

                metrics.record_invocation(&ctx.method, duration, outcome.is_ok());

                // Isolated failure domain: a sink error must never affect the
                // business result already computed above.
                if let Err(err) = sink.record(row).await {
                    log::warn!("audit sink failed to persist row: {}", err);
                }

                outcome
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
    async fn records_ok_outcome_without_capture() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let stage = AuditStage::new(AuditSpec::default(), sink.clone(), Arc::new(Config::default()), Arc::new(NoOpMetrics));

        let inner: HandlerFn = Arc::new(|_ctx| Box::pin(async { Ok(json!({"id": 1})) }));
        let wrapped = stage.wrap(inner);
        let result = wrapped(ctx()).await.unwrap();
        assert_eq!(result, json!({"id": 1}));

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, AuditOutcome::Ok);
        assert!(rows[0].result.is_none());
    }

    #[tokio::test]
    async fn records_error_and_repropagates() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let stage = AuditStage::new(AuditSpec::default(), sink.clone(), Arc::new(Config::default()), Arc::new(NoOpMetrics));

        let inner: HandlerFn = Arc::new(|_ctx| {
            Box::pin(async { Err(crate::error::Error::HandlerError { message: "boom".into(), transient: false }) })
        });
        let wrapped = stage.wrap(inner);
        let result = wrapped(ctx()).await;
        assert!(result.is_err());

        let rows = sink.rows();
        assert_eq!(rows[0].outcome, AuditOutcome::Error);
        assert_eq!(rows[0].error_message.as_deref(), Some("handler error (permanent): boom"));
    }

    #[tokio::test]
    async fn oversized_payload_is_truncated() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let spec = AuditSpec { capture_result: true, max_payload_chars: Some(10), ..Default::default() };
        let stage = AuditStage::new(spec, sink.clone(), Arc::new(Config::default()), Arc::new(NoOpMetrics));

        let inner: HandlerFn = Arc::new(|_ctx| Box::pin(async { Ok(json!({"very": "long value exceeding cap"})) }));
        stage.wrap(inner)(ctx()).await.unwrap();

        let rows = sink.rows();
        let result = rows[0].result.as_ref().unwrap();
        assert_eq!(result["_truncated"], json!(true));
    }

    #[tokio::test]
    async fn excluded_method_bypasses_audit() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let spec = AuditSpec { excluded_type_prefixes: vec!["invoice.".into()], ..Default::default() };
        let stage = AuditStage::new(spec, sink.clone(), Arc::new(Config::default()), Arc::new(NoOpMetrics));

        let inner: HandlerFn = Arc::new(|_ctx| Box::pin(async { Ok(json!(null)) }));
        stage.wrap(inner)(ctx()).await.unwrap();

        assert!(sink.rows().is_empty());
    }
}
