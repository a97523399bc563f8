//! Session registry: bridges the online/update/offline event trio.
//!
//! `session:<stream_id>` maps to the session id the online event
//! derived; later update/offline events, which carry no start
//! timestamp, look it up here. Also owns the per-session notified flag
//! guarding the best-effort streamer DM against queue-retry duplicates.

use anyhow::Result;
use chrono::{DateTime, Utc};
use redis_utils::KvStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Fallback session suffix when the online event carries no start time.
const LIVE_FALLBACK: &str = "live";

/// Derive the session identity for one continuous broadcast.
pub fn session_id_for(stream_id: &str, started_at: Option<DateTime<Utc>>) -> String {
    match started_at {
        Some(t) => format!("{}:{}", stream_id, t.timestamp()),
        None => format!("{}:{}", stream_id, LIVE_FALLBACK),
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    kv: Arc<dyn KvStore>,
    session_ttl: Duration,
    notified_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(kv: Arc<dyn KvStore>, session_ttl: Duration, notified_ttl: Duration) -> Self {
        Self {
            kv,
            session_ttl,
            notified_ttl,
        }
    }

    fn session_key(stream_id: &str) -> String {
        format!("session:{}", stream_id)
    }

    fn notified_key(account_id: Uuid, session_id: &str) -> String {
        format!("notified:{}:{}", account_id, session_id)
    }

    /// Store unconditionally, even for accounts with zero enabled
    /// destinations: a later offline event must still find the session.
    pub async fn store(&self, stream_id: &str, session_id: &str) -> Result<()> {
        self.kv
            .set_ex(&Self::session_key(stream_id), session_id, self.session_ttl)
            .await?;
        debug!(stream_id = %stream_id, session_id = %session_id, "session cached");
        Ok(())
    }

    pub async fn lookup(&self, stream_id: &str) -> Result<Option<String>> {
        self.kv.get(&Self::session_key(stream_id)).await
    }

    pub async fn remove(&self, stream_id: &str) -> Result<()> {
        self.kv.del(&Self::session_key(stream_id)).await
    }

    pub async fn was_notified(&self, account_id: Uuid, session_id: &str) -> Result<bool> {
        Ok(self
            .kv
            .get(&Self::notified_key(account_id, session_id))
            .await?
            .is_some())
    }

    /// Set only after the DM actually went out.
    pub async fn mark_notified(&self, account_id: Uuid, session_id: &str) -> Result<()> {
        self.kv
            .set_ex(
                &Self::notified_key(account_id, session_id),
                "1",
                self.notified_ttl,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_id_with_start_time() {
        let started = Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap();
        assert_eq!(
            session_id_for("ch-1", Some(started)),
            format!("ch-1:{}", started.timestamp())
        );
    }

    #[test]
    fn test_session_id_fallback_without_start_time() {
        assert_eq!(session_id_for("ch-1", None), "ch-1:live");
    }
}
