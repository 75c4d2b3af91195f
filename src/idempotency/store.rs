//! The idempotency claim protocol and its in-memory test double.

use super::{IdempotencyRecord, IdempotencyStatus};
use crate::error::{Error, Result};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Result of attempting to claim `(key, method)`.
#[derive(Debug, Clone)]
pub enum Claim {
    /// No live record existed (or the prior one was abandoned/failed/expired):
    /// the caller now owns processing and must eventually call
    /// `mark_completed` or `mark_failed`.
    Owner,
    /// A terminal, non-expired COMPLETED record exists: replay its response.
    Completed(Value),
    /// Another correlation id owns an in-flight PENDING claim that has not yet
    /// expired: the caller should short-poll.
    InFlight,
}

/// Durable store backing the idempotency stage. A real implementation must
/// make `acquire_or_get` atomic with respect to concurrent callers racing on
/// the same `(key, method)` — the canonical approach is a pessimistic row lock
/// (`SELECT ... FOR UPDATE`) inside a transaction, as in
/// [`super::postgres::PostgresIdempotencyStore`].
#[allow(async_fn_in_trait)]
pub trait IdempotencyStore: Send + Sync {
    async fn acquire_or_get(
        &self,
        key: &str,
        method: &str,
        request_hash: &str,
        correlation_id: &str,
        ttl: Duration,
        conflict_on_different_request: bool,
    ) -> Result<Claim>;

    async fn mark_completed(&self, key: &str, method: &str, correlation_id: &str, response: Value) -> Result<()>;

    async fn mark_failed(&self, key: &str, method: &str, correlation_id: &str) -> Result<()>;

    async fn get(&self, key: &str, method: &str) -> Result<Option<IdempotencyRecord>>;

    /// Sweep every record whose `expires_at` has passed, regardless of status.
    /// Invoked periodically by [`super::cleanup::spawn_cleanup_task`];
    /// implementations without background state (e.g. none) may leave this a
    /// no-op.
    async fn sweep_expired(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory store for tests and the demo binary. Approximates the
/// pessimistic row lock with a per-`(key, method)` `tokio::sync::Mutex`,
/// acceptable since blocking the task while holding the lock is permitted
/// under the same resource model the durable store operates within.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    rows: DashMap<(String, String), Arc<Mutex<Option<IdempotencyRecord>>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str, method: &str) -> Arc<Mutex<Option<IdempotencyRecord>>> {
        self.rows
            .entry((key.to_string(), method.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn acquire_or_get(
        &self,
        key: &str,
        method: &str,
        request_hash: &str,
        correlation_id: &str,
        ttl: Duration,
        conflict_on_different_request: bool,
    ) -> Result<Claim> {
        let slot = self.slot(key, method);
        let mut guard = slot.lock().await;
        let now = Utc::now();

        match guard.as_ref() {
            None => {
                *guard = Some(new_pending(key, method, request_hash, correlation_id, ttl, now));
                Ok(Claim::Owner)
            }
            Some(existing) if conflict_on_different_request && existing.request_hash != request_hash => {
                Err(Error::IdempotencyKeyConflict)
            }
            Some(existing) => match existing.status {
                IdempotencyStatus::Completed if !existing.is_expired(now) => {
                    Ok(Claim::Completed(existing.response.clone().unwrap_or(Value::Null)))
                }
                // A non-expired FAILED record is a conflict, not a free
                // ownership slot: the caller should choose a new key.
                IdempotencyStatus::Failed if !existing.is_expired(now) => Err(Error::IdempotencyPreviousFailure),
                IdempotencyStatus::Pending if existing.owner_correlation_id == correlation_id && !existing.is_expired(now) => {
                    Ok(Claim::Owner)
                }
                IdempotencyStatus::Pending if !existing.is_expired(now) => Ok(Claim::InFlight),
                // Expired PENDING (abandoned owner) or expired terminal record
                // (replay/conflict window closed): reclaimable.
                _ => {
                    *guard = Some(new_pending(key, method, request_hash, correlation_id, ttl, now));
                    Ok(Claim::Owner)
                }
            },
        }
    }

    async fn mark_completed(&self, key: &str, method: &str, correlation_id: &str, response: Value) -> Result<()> {
        let slot = self.slot(key, method);
        let mut guard = slot.lock().await;
        let now = Utc::now();
        match guard.as_mut() {
            Some(record) if record.owner_correlation_id == correlation_id => {
                record.status = IdempotencyStatus::Completed;
                record.response = Some(response);
                record.updated_at = now;
                record.expires_at = now + chrono::Duration::from_std(record.ttl).unwrap_or(chrono::Duration::zero());
                Ok(())
            }
            _ => Err(Error::Other(format!("correlation {} does not own idempotency claim {}/{}", correlation_id, method, key))),
        }
    }

    async fn mark_failed(&self, key: &str, method: &str, correlation_id: &str) -> Result<()> {
        let slot = self.slot(key, method);
        let mut guard = slot.lock().await;
        let now = Utc::now();
        match guard.as_mut() {
            Some(record) if record.owner_correlation_id == correlation_id => {
                record.status = IdempotencyStatus::Failed;
                record.updated_at = now;
                record.expires_at = now + chrono::Duration::from_std(record.ttl).unwrap_or(chrono::Duration::zero());
                Ok(())
            }
            _ => Err(Error::Other(format!("correlation {} does not own idempotency claim {}/{}", correlation_id, method, key))),
        }
    }

    async fn get(&self, key: &str, method: &str) -> Result<Option<IdempotencyRecord>> {
        let slot = self.slot(key, method);
        let guard = slot.lock().await;
        Ok(guard.clone())
    }

    async fn sweep_expired(&self) -> Result<()> {
        let now = Utc::now();
        for entry in self.rows.iter() {
            let mut guard = entry.value().lock().await;
            if let Some(record) = guard.as_ref() {
                if record.is_expired(now) {
                    *guard = None;
                }
            }
        }
        Ok(())
    }
}

fn new_pending(
    key: &str,
    method: &str,
    request_hash: &str,
    correlation_id: &str,
    ttl: Duration,
    now: chrono::DateTime<Utc>,
) -> IdempotencyRecord {
    IdempotencyRecord {
        key: key.to_string(),
        method: method.to_string(),
        request_hash: request_hash.to_string(),
        owner_correlation_id: correlation_id.to_string(),
        status: IdempotencyStatus::Pending,
        response: None,
        ttl,
        created_at: now,
        updated_at: now,
        expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
    }
}
