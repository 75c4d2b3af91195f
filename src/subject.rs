//! Caller identity resolution.
//!
//! A [`Subject`] is the caller identity used to key rate limits, policy lookups, and
//! audit rows. Resolution follows a fixed priority chain: an API key (hashed, never
//! stored raw) beats an authenticated user principal, which beats the caller's
//! network address, which beats `unknown` when nothing is present.

use sha2::{Digest, Sha256};
use std::fmt;

/// The resolved identity of a request's caller.
///
/// `Display` produces the canonical `"{kind}:{value}"` string used as the map key
/// everywhere a subject participates in keying (policy lookup, rate limiting,
/// audit rows).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// A hashed API key. `value` is hex-encoded SHA-256(key [+ pepper]), never the
    /// raw key.
    ApiKey(String),
    /// An authenticated user principal id.
    User(String),
    /// A caller network address, taken from `X-Forwarded-For`, `X-Real-IP`, or the
    /// peer address, in that order.
    Ip(String),
    /// No identity could be resolved.
    Unknown,
}

impl Subject {
    /// The `subjectType` component used by the rate limiter's bounded-cardinality
    /// key (methodKey, subjectType, limitForPeriod) — never the full subject
    /// identity, to keep the limiter map size bounded.
    pub fn subject_type(&self) -> &'static str {
        match self {
            Subject::ApiKey(_) => "apiKey",
            Subject::User(_) => "user",
            Subject::Ip(_) => "ip",
            Subject::Unknown => "unknown",
        }
    }

    /// Build a subject from a raw API key, hashing it (optionally peppered) so the
    /// raw credential never appears in logs, policy keys, or audit rows.
    pub fn from_api_key(raw_key: &str, pepper: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(raw_key.as_bytes());
        if let Some(p) = pepper {
            hasher.update(p.as_bytes());
        }
        Subject::ApiKey(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::ApiKey(v) => write!(f, "apiKey:{}", v),
            Subject::User(v) => write!(f, "user:{}", v),
            Subject::Ip(v) => write!(f, "ip:{}", v),
            Subject::Unknown => write!(f, "unknown"),
        }
    }
}

/// Request-scoped facts the resolver reads from, supplied by the (out-of-scope)
/// HTTP layer. None of these fields are interpreted beyond the resolution chain
/// below.
#[derive(Debug, Clone, Default)]
pub struct SubjectHints {
    pub raw_api_key: Option<String>,
    pub authenticated_user_id: Option<String>,
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub peer_addr: Option<String>,
}

/// Resolves a [`Subject`] from request hints. The default implementation follows
/// the priority chain documented on [`Subject`]; a credential lookup (API key →
/// active client) is out of scope for the core and is represented only as the
/// already-hashed key arriving in `hints.raw_api_key`-derived form via `pepper`.
pub trait SubjectResolver: Send + Sync {
    fn resolve(&self, hints: &SubjectHints) -> Subject;
}

/// Default resolver implementing the documented priority chain.
pub struct DefaultSubjectResolver {
    pepper: Option<String>,
}

impl DefaultSubjectResolver {
    pub fn new(pepper: Option<String>) -> Self {
        Self { pepper }
    }
}

impl SubjectResolver for DefaultSubjectResolver {
    fn resolve(&self, hints: &SubjectHints) -> Subject {
        if let Some(key) = &hints.raw_api_key {
            return Subject::from_api_key(key, self.pepper.as_deref());
        }
        if let Some(user) = &hints.authenticated_user_id {
            return Subject::User(user.clone());
        }
        if let Some(xff) = &hints.forwarded_for {
            if let Some(first) = xff.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return Subject::Ip(trimmed.to_string());
                }
            }
        }
        if let Some(real_ip) = &hints.real_ip {
            return Subject::Ip(real_ip.clone());
        }
        if let Some(peer) = &hints.peer_addr {
            return Subject::Ip(peer.clone());
        }
        Subject::Unknown
    }
}
