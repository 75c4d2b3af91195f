//! Postgres-backed [`super::IdempotencyStore`] using a pessimistic row lock,
//! grounded on the `try_processing`/`save_response` transaction shape from
//! `zero2prod-axum`'s idempotency persistence module and the repository/error
//! conventions of the teacher's own `examples/actixsqlx`.

#![cfg(feature = "postgres")]

use super::store::{Claim, IdempotencyStore};
use super::{IdempotencyRecord, IdempotencyStatus};
use crate::error::{Error, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::Row;
use std::time::Duration;

pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: IdempotencyStatus) -> &'static str {
    match status {
        IdempotencyStatus::Pending => "PENDING",
        IdempotencyStatus::Completed => "COMPLETED",
        IdempotencyStatus::Failed => "FAILED",
    }
}

fn parse_status(s: &str) -> IdempotencyStatus {
    match s {
        "COMPLETED" => IdempotencyStatus::Completed,
        "FAILED" => IdempotencyStatus::Failed,
        _ => IdempotencyStatus::Pending,
    }
}

impl IdempotencyStore for PostgresIdempotencyStore {
    async fn acquire_or_get(
        &self,
        key: &str,
        method: &str,
        request_hash: &str,
        correlation_id: &str,
        ttl: Duration,
        conflict_on_different_request: bool,
    ) -> Result<Claim> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let existing = sqlx::query(
            "SELECT request_hash, owner_correlation_id, status, response_json, expires_at \
             FROM idempotency_records WHERE idempotency_key = $1 AND method_key = $2 FOR UPDATE",
        )
        .bind(key)
        .bind(method)
        .fetch_optional(&mut *tx)
        .await?;

        let claim = match existing {
            None => {
                insert_pending(&mut tx, key, method, request_hash, correlation_id, ttl, now).await?;
                Claim::Owner
            }
            Some(row) => {
                let existing_hash: String = row.try_get("request_hash")?;
                if conflict_on_different_request && existing_hash != request_hash {
                    return Err(Error::IdempotencyKeyConflict);
                }

                let status = parse_status(row.try_get::<String, _>("status")?.as_str());
                let owner: String = row.try_get("owner_correlation_id")?;
                let expires_at: chrono::DateTime<Utc> = row.try_get("expires_at")?;
                let expired = now > expires_at;

                match status {
                    IdempotencyStatus::Completed if !expired => {
                        let response: Option<Value> = row.try_get("response_json")?;
                        Claim::Completed(response.unwrap_or(Value::Null))
                    }
                    // A non-expired FAILED row is a conflict, not a free
                    // ownership slot: the caller should choose a new key.
                    IdempotencyStatus::Failed if !expired => return Err(Error::IdempotencyPreviousFailure),
                    IdempotencyStatus::Pending if owner == correlation_id && !expired => Claim::Owner,
                    IdempotencyStatus::Pending if !expired => Claim::InFlight,
                    _ => {
                        reclaim_pending(&mut tx, key, method, correlation_id, ttl, now).await?;
                        Claim::Owner
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(claim)
    }

    async fn mark_completed(&self, key: &str, method: &str, correlation_id: &str, response: Value) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE idempotency_records SET status = $1, response_json = $2, updated_at = $3, \
             expires_at = $3 + (ttl_seconds * interval '1 second') \
             WHERE idempotency_key = $4 AND method_key = $5 AND owner_correlation_id = $6",
        )
        .bind(status_str(IdempotencyStatus::Completed))
        .bind(response)
        .bind(now)
        .bind(key)
        .bind(method)
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Other(format!("correlation {} does not own idempotency claim {}/{}", correlation_id, method, key)));
        }
        Ok(())
    }

    async fn mark_failed(&self, key: &str, method: &str, correlation_id: &str) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE idempotency_records SET status = $1, updated_at = $2, \
             expires_at = $2 + (ttl_seconds * interval '1 second') \
             WHERE idempotency_key = $3 AND method_key = $4 AND owner_correlation_id = $5",
        )
        .bind(status_str(IdempotencyStatus::Failed))
        .bind(now)
        .bind(key)
        .bind(method)
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Other(format!("correlation {} does not own idempotency claim {}/{}", correlation_id, method, key)));
        }
        Ok(())
    }

    async fn get(&self, key: &str, method: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT idempotency_key, method_key, request_hash, owner_correlation_id, status, \
             response_json, ttl_seconds, created_at, updated_at, expires_at \
             FROM idempotency_records WHERE idempotency_key = $1 AND method_key = $2",
        )
        .bind(key)
        .bind(method)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let ttl_seconds: i64 = row.try_get("ttl_seconds")?;
        Ok(Some(IdempotencyRecord {
            key: row.try_get("idempotency_key")?,
            method: row.try_get("method_key")?,
            request_hash: row.try_get("request_hash")?,
            owner_correlation_id: row.try_get("owner_correlation_id")?,
            status: parse_status(row.try_get::<String, _>("status")?.as_str()),
            response: row.try_get("response_json")?,
            ttl: Duration::from_secs(ttl_seconds.max(0) as u64),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            expires_at: row.try_get("expires_at")?,
        }))
    }

    async fn sweep_expired(&self) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_records WHERE expires_at < now()").execute(&self.pool).await?;
        Ok(())
    }
}

async fn insert_pending(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    key: &str,
    method: &str,
    request_hash: &str,
    correlation_id: &str,
    ttl: Duration,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO idempotency_records \
         (idempotency_key, method_key, request_hash, owner_correlation_id, status, ttl_seconds, created_at, updated_at, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $7 + ($6 * interval '1 second'))",
    )
    .bind(key)
    .bind(method)
    .bind(request_hash)
    .bind(correlation_id)
    .bind(status_str(IdempotencyStatus::Pending))
    .bind(ttl.as_secs() as i64)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn reclaim_pending(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    key: &str,
    method: &str,
    correlation_id: &str,
    ttl: Duration,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE idempotency_records SET owner_correlation_id = $1, status = $2, response_json = NULL, \
         ttl_seconds = $3, updated_at = $4, expires_at = $4 + ($3 * interval '1 second') \
         WHERE idempotency_key = $5 AND method_key = $6",
    )
    .bind(correlation_id)
    .bind(status_str(IdempotencyStatus::Pending))
    .bind(ttl.as_secs() as i64)
    .bind(now)
    .bind(key)
    .bind(method)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
