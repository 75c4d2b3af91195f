//! Process-wide configuration, with documented defaults for every field named by
//! the external-interfaces section: the audit payload cap, the idempotency
//! cleanup cadence, the policy cache TTL, and the short-poll budget used to await
//! a concurrent duplicate's terminal state.

use std::time::Duration;

/// Process-wide configuration for the interceptor runtime.
///
/// Mirrors the teacher crate's convention of giving every user-facing policy
/// object (`TtlPolicy`, `OperationConfig`) an explicit, documented `Default`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fallback cap on captured audit payload size, in characters, used when a
    /// stage's own `AuditSpec::max_payload_chars` is unset. Default: 20,000.
    pub default_max_payload_chars: usize,

    /// How often the idempotency background worker purges any record whose
    /// `expires_at` has passed, regardless of status. Default: 10 minutes.
    pub idempotency_cleanup_interval: Duration,

    /// How long a PolicyStore lookup result (including an absent policy) is kept
    /// in the read-through cache before being re-fetched. Default: 30 seconds.
    pub policy_cache_ttl: Duration,

    /// Step interval between short-poll attempts when a concurrent duplicate
    /// request is PENDING. Default: 200ms.
    pub idempotency_poll_interval: Duration,

    /// Total budget for short-polling a concurrent duplicate before returning
    /// [`crate::error::Error::IdempotencyInFlight`]. Default: 2 seconds.
    pub idempotency_poll_budget: Duration,

    /// Clamp applied to a cache stage's resolved TTL, `[min, max]` seconds.
    /// Default: `[1, 3600]`.
    pub cache_ttl_clamp: (u64, u64),

    /// Clamp applied to a named cache's TTL-by-name suffix, `[min, max]`
    /// seconds. Default: `[1, 86400]`.
    pub named_cache_ttl_clamp: (u64, u64),

    /// Clamp applied to a retry spec's configured attempt count. Default:
    /// `[1, 20]`.
    pub retry_attempts_clamp: (u32, u32),

    /// Jitter fraction applied to exponential backoff, e.g. `0.2` for ±20%.
    /// Default: 0.2.
    pub retry_jitter_fraction: f64,

    /// Optional pepper mixed into API key hashing before subject resolution.
    /// Default: `None`.
    pub api_key_pepper: Option<String>,

    /// Configured type-name prefixes excluded from audit capture entirely.
    /// Default: framework/runtime namespaces only, empty by default here since
    /// the core has no framework dependency to name.
    pub audit_excluded_type_prefixes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_max_payload_chars: 20_000,
            idempotency_cleanup_interval: Duration::from_secs(600),
            policy_cache_ttl: Duration::from_secs(30),
            idempotency_poll_interval: Duration::from_millis(200),
            idempotency_poll_budget: Duration::from_secs(2),
            cache_ttl_clamp: (1, 3_600),
            named_cache_ttl_clamp: (1, 86_400),
            retry_attempts_clamp: (1, 20),
            retry_jitter_fraction: 0.2,
            api_key_pepper: None,
            audit_excluded_type_prefixes: Vec::new(),
        }
    }
}

impl Config {
    pub fn clamp_cache_ttl(&self, seconds: u64) -> u64 {
        seconds.clamp(self.cache_ttl_clamp.0, self.cache_ttl_clamp.1)
    }

    pub fn clamp_named_cache_ttl(&self, seconds: u64) -> u64 {
        seconds.clamp(self.named_cache_ttl_clamp.0, self.named_cache_ttl_clamp.1)
    }

    pub fn clamp_retry_attempts(&self, attempts: u32) -> u32 {
        attempts.clamp(self.retry_attempts_clamp.0, self.retry_attempts_clamp.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default_max_payload_chars, 20_000);
        assert_eq!(cfg.idempotency_cleanup_interval, Duration::from_secs(600));
        assert_eq!(cfg.policy_cache_ttl, Duration::from_secs(30));
        assert_eq!(cfg.idempotency_poll_budget, Duration::from_secs(2));
    }

    #[test]
    fn clamps_apply_bounds() {
        let cfg = Config::default();
        assert_eq!(cfg.clamp_cache_ttl(0), 1);
        assert_eq!(cfg.clamp_cache_ttl(999_999), 3_600);
        assert_eq!(cfg.clamp_named_cache_ttl(999_999), 86_400);
        assert_eq!(cfg.clamp_retry_attempts(0), 1);
        assert_eq!(cfg.clamp_retry_attempts(999), 20);
    }
}
