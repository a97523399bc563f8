//! Shared Redis plumbing for the announcer workspace.
//!
//! Provides a connection pool built on the `redis` crate's
//! `ConnectionManager` plus the small `KvStore` trait the service uses
//! for TTL'd keys (delivery locks, session registry, notified flags).
//! Keeping the trait here lets tests substitute an in-memory store
//! without touching a live Redis.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Redis connection pool.
pub struct RedisPool {
    manager: SharedConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client =
            Client::open(redis_url).context("failed to construct Redis client from REDIS_URL")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;
        Ok(Self {
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }
}

/// Minimal key-value operations over a TTL'd store.
///
/// `set_nx_ex` is the atomic "set if absent with expiry" primitive that
/// backs distributed locking; everything else is plain get/set/delete.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically set `key = value` with a TTL, only if the key is absent.
    /// Returns true when this call created the key.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Set `key = value` with a TTL, overwriting any existing value.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Reset the TTL of an existing key. Returns false if the key is gone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
}

/// `KvStore` backed by a shared Redis connection manager.
#[derive(Clone)]
pub struct RedisKvStore {
    redis: SharedConnectionManager,
}

impl RedisKvStore {
    pub fn new(redis: SharedConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.redis.lock().await.clone();

        // SET key value NX EX seconds - true if the key was set
        let was_set: bool = conn
            .set_options(
                key,
                value,
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::EX(ttl.as_secs() as usize)),
            )
            .await
            .with_context(|| format!("SET NX failed for key {}", key))?;

        debug!(key = %key, was_set, "set_nx_ex");
        Ok(was_set)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.redis.lock().await.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .with_context(|| format!("SET EX failed for key {}", key))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.redis.lock().await.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("GET failed for key {}", key))?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.redis.lock().await.clone();
        conn.del::<_, ()>(key)
            .await
            .with_context(|| format!("DEL failed for key {}", key))?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.redis.lock().await.clone();
        let refreshed: bool = conn
            .expire(key, ttl.as_secs() as i64)
            .await
            .with_context(|| format!("EXPIRE failed for key {}", key))?;
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_store() -> RedisKvStore {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let pool = RedisPool::connect(&redis_url)
            .await
            .expect("Failed to create Redis pool");
        RedisKvStore::new(pool.manager())
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_set_nx_lifecycle() {
        let store = create_test_store().await;
        let key = "test:kv:set_nx_lifecycle";
        store.del(key).await.unwrap();

        assert!(store
            .set_nx_ex(key, "holder-a", Duration::from_secs(30))
            .await
            .unwrap());
        // Second set must observe the existing key
        assert!(!store
            .set_nx_ex(key, "holder-b", Duration::from_secs(30))
            .await
            .unwrap());
        assert_eq!(store.get(key).await.unwrap().as_deref(), Some("holder-a"));

        store.del(key).await.unwrap();
        assert_eq!(store.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_expire_missing_key() {
        let store = create_test_store().await;
        let refreshed = store
            .expire("test:kv:nonexistent", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!refreshed);
    }
}
