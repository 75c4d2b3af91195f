//! Background worker sweeping abandoned and expired idempotency records.
//!
//! Per §5, the runtime owns exactly one long-lived background task: this one.
//! It never competes with request-serving tasks for the same lock a request
//! would need, since `sweep_expired` only ever touches records whose owner has
//! already missed its deadline.

use super::store::IdempotencyStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawn the periodic cleanup loop. Dropping the returned handle does not stop
/// the task; call `.abort()` on it during shutdown if needed.
pub fn spawn_cleanup_task<S: IdempotencyStore + 'static>(store: Arc<S>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = store.sweep_expired().await {
                log::warn!("idempotency cleanup sweep failed: {}", err);
            }
        }
    })
}
