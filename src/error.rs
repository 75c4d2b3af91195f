//! Error types for the interceptor pipeline.

use std::fmt;
use std::time::Duration;

/// Result type for interceptor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced by the chain and its stages.
///
/// Each variant corresponds to a row in the error-kind → HTTP status table: an
/// (out-of-scope) HTTP layer maps these via [`Error::http_status`] without the
/// core depending on any HTTP crate.
#[derive(Debug, Clone)]
pub enum Error {
    /// Serialization failed when converting a value for storage (cache, idempotency,
    /// audit payload).
    SerializationError(String),

    /// Deserialization failed when reading a stored value back.
    DeserializationError(String),

    /// A captured payload or configuration value failed validation.
    ValidationError(String),

    /// Cache miss: key not found in the named cache.
    CacheMiss,

    /// Cache/idempotency/audit backend storage error (Redis, Postgres, Memcached, etc).
    BackendError(String),

    /// The wrapped handler's own domain error. Carries the handler's error message and
    /// whether it should be considered transient for retry purposes.
    HandlerError { message: String, transient: bool },

    /// Operation exceeded a configured timeout.
    Timeout(String),

    /// Invalid configuration (malformed TTL-by-name suffix, out-of-range policy, etc).
    ConfigError(String),

    /// Feature not implemented or not enabled for the active backend/cargo features.
    NotImplemented(String),

    /// Invalid cache entry: corrupted envelope or bad magic.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and a stored entry.
    VersionMismatch { expected: u32, found: u32 },

    /// Rate limit exceeded for the current subject/method/period. Carries the
    /// `Retry-After` duration an HTTP adapter should surface.
    RateLimited { retry_after: Duration },

    /// A concurrent duplicate request is still being processed (idempotency
    /// short-poll budget exhausted without observing a terminal state).
    IdempotencyInFlight,

    /// An idempotency key was reused with a different request payload.
    IdempotencyKeyConflict,

    /// A call declared `requireKey` but arrived with no idempotency key.
    MissingIdempotencyKey,

    /// An idempotency key's previous attempt already ended in FAILED and has
    /// not yet expired; the caller should choose a new key rather than retry
    /// this one.
    IdempotencyPreviousFailure,

    /// Generic error with a custom message.
    Other(String),
}

impl Error {
    /// The HTTP status code an adapter should use when translating this error into a
    /// response. The core never constructs an HTTP response itself.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::RateLimited { .. } => 429,
            Error::IdempotencyInFlight => 409,
            Error::IdempotencyKeyConflict => 409,
            Error::IdempotencyPreviousFailure => 409,
            Error::Timeout(_) => 504,
            Error::MissingIdempotencyKey => 400,
            Error::ValidationError(_) | Error::ConfigError(_) => 400,
            Error::CacheMiss | Error::NotImplemented(_) => 404,
            Error::HandlerError { transient: true, .. } => 503,
            Error::HandlerError { transient: false, .. } => 500,
            _ => 500,
        }
    }

    /// `Retry-After` duration to surface alongside a 429, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether the retry stage should consider this error kind transient by default,
    /// absent an explicit `retryOn`/`ignoreOn` policy override.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::BackendError(_) | Error::Timeout(_) | Error::HandlerError { transient: true, .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerializationError(msg) => write!(f, "serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "deserialization error: {}", msg),
            Error::ValidationError(msg) => write!(f, "validation error: {}", msg),
            Error::CacheMiss => write!(f, "cache miss"),
            Error::BackendError(msg) => write!(f, "backend error: {}", msg),
            Error::HandlerError { message, transient } => {
                write!(f, "handler error ({}): {}", if *transient { "transient" } else { "permanent" }, message)
            }
            Error::Timeout(msg) => write!(f, "timeout: {}", msg),
            Error::ConfigError(msg) => write!(f, "config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "not implemented: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(f, "schema version mismatch: expected {}, found {}", expected, found)
            }
            Error::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {:?}", retry_after)
            }
            Error::IdempotencyInFlight => write!(f, "a concurrent duplicate request is still processing"),
            Error::IdempotencyKeyConflict => write!(f, "idempotency key reused with a different payload"),
            Error::MissingIdempotencyKey => write!(f, "operation requires an idempotency key but none was supplied"),
            Error::IdempotencyPreviousFailure => {
                write!(f, "idempotency key's previous attempt failed, choose a new key")
            }
            Error::Other(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(format!("redis error: {}", e))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::BackendError(format!("postgres error: {}", e))
    }
}
