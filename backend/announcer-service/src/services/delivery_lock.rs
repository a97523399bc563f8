//! Per-(destination, session) delivery lock.
//!
//! `lock:<destination_id>:<session_id>` holds the id of the job/worker
//! driving the delivery, with a short TTL. On transient failure the
//! lock is deliberately left in place; the TTL bounds the retry window
//! and keeps a second worker from racing the queue's backoff retry.

use anyhow::Result;
use redis_utils::KvStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquire {
    /// This job now owns the delivery.
    Acquired,
    /// This same job already held the lock (queue retry after a prior
    /// attempt timed out mid-flight); the TTL was refreshed.
    HeldBySelf,
    /// Another in-flight job owns the delivery; skip silently.
    HeldByOther,
}

#[derive(Clone)]
pub struct DeliveryLock {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl DeliveryLock {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(destination_id: Uuid, session_id: &str) -> String {
        format!("lock:{}:{}", destination_id, session_id)
    }

    pub async fn acquire(
        &self,
        destination_id: Uuid,
        session_id: &str,
        holder: &str,
    ) -> Result<LockAcquire> {
        let key = Self::key(destination_id, session_id);

        if self.kv.set_nx_ex(&key, holder, self.ttl).await? {
            debug!(key = %key, holder = %holder, "delivery lock acquired");
            return Ok(LockAcquire::Acquired);
        }

        match self.kv.get(&key).await? {
            Some(current) if current == holder => {
                // Re-entrant retry of our own job; keep the window open.
                self.kv.expire(&key, self.ttl).await?;
                debug!(key = %key, holder = %holder, "delivery lock re-entered");
                Ok(LockAcquire::HeldBySelf)
            }
            Some(other) => {
                debug!(key = %key, holder = %other, "delivery lock contended");
                Ok(LockAcquire::HeldByOther)
            }
            None => {
                // Expired between the SET and the GET; one more attempt.
                if self.kv.set_nx_ex(&key, holder, self.ttl).await? {
                    Ok(LockAcquire::Acquired)
                } else {
                    Ok(LockAcquire::HeldByOther)
                }
            }
        }
    }
}
