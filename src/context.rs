//! Request-scoped context threaded through the chain.

use crate::args::Args;
use crate::method_key::MethodKey;
use crate::policy::Policy;
use crate::subject::Subject;
use std::sync::OnceLock;

/// Everything a stage needs about the current invocation, built once by the
/// (out-of-scope) HTTP layer before the chain runs and threaded unchanged
/// through every stage.
///
/// The resolved [`Policy`] is memoized in `policy_cell` so stages 2-5 each
/// resolve it via the `PolicyStore` at most once per invocation, per §4.1.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub idempotency_key: Option<String>,
    pub subject: Subject,
    pub method: MethodKey,
    pub args: Args,
    policy_cell: std::sync::Arc<OnceLock<Policy>>,
}

impl RequestContext {
    pub fn new(correlation_id: impl Into<String>, subject: Subject, method: MethodKey, args: Args) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            idempotency_key: None,
            subject,
            method,
            args,
            policy_cell: std::sync::Arc::new(OnceLock::new()),
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Return the memoized policy if a stage already resolved it this
    /// invocation.
    pub fn cached_policy(&self) -> Option<&Policy> {
        self.policy_cell.get()
    }

    /// Memoize a freshly resolved policy. A second call from a later stage is a
    /// no-op (the first resolution wins), matching "at most once per
    /// invocation".
    pub fn memoize_policy(&self, policy: Policy) -> &Policy {
        let _ = self.policy_cell.set(policy);
        self.policy_cell.get().expect("just set")
    }

    /// Whether the resolved policy explicitly disables every stage but audit
    /// for this (subject, method) pair. `None`/unresolved policy means
    /// enabled.
    pub fn policy_disabled(&self) -> bool {
        self.cached_policy().and_then(|p| p.enabled).map(|enabled| !enabled).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn policy_memoizes_once() {
        let ctx = RequestContext::new(
            "corr-1",
            Subject::Unknown,
            MethodKey::new("invoice.create"),
            Args::from_values(vec![json!(1)]),
        );
        assert!(ctx.cached_policy().is_none());

        let first = ctx.memoize_policy(Policy { audit_enabled: Some(true), ..Default::default() });
        assert_eq!(first.audit_enabled, Some(true));

        // A later "resolution" with different data does not override the first.
        let second = ctx.memoize_policy(Policy { audit_enabled: Some(false), ..Default::default() });
        assert_eq!(second.audit_enabled, Some(true));
    }
}
