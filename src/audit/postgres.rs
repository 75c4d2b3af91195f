//! Postgres-backed [`super::AuditSink`], grounded on the teacher's own
//! `examples/actixsqlx` repository style: bind parameters explicitly, map
//! `sqlx::Error` through `?` into the crate's `Error`.

#![cfg(feature = "postgres")]

use super::{AuditOutcome, AuditRow, AuditSink};
use crate::error::Result;
use sqlx::PgPool;

/// Appends audit rows to a dedicated `audit_log` table using a pool separate
/// from the caller's own transaction, so a slow or failing audit write can
/// never hold up or roll back the business path.
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PostgresAuditSink {
    async fn record(&self, row: AuditRow) -> Result<()> {
        let outcome = match row.outcome {
            AuditOutcome::Ok => "OK",
            AuditOutcome::Error => "ERROR",
        };
        let duration_ms = row.duration.as_millis() as i64;

        sqlx::query(
            "INSERT INTO audit_log \
             (correlation_id, subject_key, method_key, outcome, duration_ms, args_json, result_json, error_message, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&row.correlation_id)
        .bind(row.subject.to_string())
        .bind(row.method.as_str())
        .bind(outcome)
        .bind(duration_ms)
        .bind(row.args)
        .bind(row.result)
        .bind(row.error_message)
        .bind(row.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
