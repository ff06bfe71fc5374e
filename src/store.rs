//! Click counter storage.
//!
//! The gateway only talks to [`CounterStore`]; which backend sits behind it
//! is decided once at startup by [`StoreBackend::build`].
//!
//! ## Redis key layout
//!
//! ```text
//! {token hex}  → integer click count (INCR)
//! ```
//!
//! Keys are the bare lowercase token so existing deployments keep their
//! counts.

use crate::token::SessionToken;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Persistent click count per session token.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count, 0 if the token was never clicked
    async fn get(&self, token: &SessionToken) -> Result<u64>;

    /// Atomically add one click and return the new count
    async fn increment(&self, token: &SessionToken) -> Result<u64>;
}

/// Process-local counters, lost on restart
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counts: Mutex<HashMap<SessionToken, u64>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, token: &SessionToken) -> Result<u64> {
        Ok(self.counts.lock().get(token).copied().unwrap_or(0))
    }

    async fn increment(&self, token: &SessionToken) -> Result<u64> {
        let mut counts = self.counts.lock();
        let count = counts.entry(*token).or_insert(0);
        *count += 1;
        Ok(*count)
    }
}

/// Counters kept in Redis; `INCR` gives per-key atomicity across processes
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { conn })
    }

    fn key(token: &SessionToken) -> String {
        token.to_hex()
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, token: &SessionToken) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn
            .get(Self::key(token))
            .await
            .context("Redis GET failed")?;
        Ok(count.unwrap_or(0))
    }

    async fn increment(&self, token: &SessionToken) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn
            .incr(Self::key(token), 1u64)
            .await
            .context("Redis INCR failed")?;
        Ok(count)
    }
}

/// Which counter store to construct at startup
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StoreBackend {
    Memory,
    Redis(String),
}

impl StoreBackend {
    pub async fn build(&self) -> Result<Arc<dyn CounterStore>> {
        match self {
            StoreBackend::Memory => {
                info!("Using in-memory click counters");
                Ok(Arc::new(MemoryCounterStore::new()))
            }
            StoreBackend::Redis(url) => {
                info!("Using Redis click counters");
                Ok(Arc::new(RedisCounterStore::connect(url).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_defaults_to_zero() {
        let store = MemoryCounterStore::new();
        let token = SessionToken::from_bytes([1; 32]);
        assert_eq!(store.get(&token).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_increment() {
        let store = MemoryCounterStore::new();
        let a = SessionToken::from_bytes([1; 32]);
        let b = SessionToken::from_bytes([2; 32]);

        assert_eq!(store.increment(&a).await.unwrap(), 1);
        assert_eq!(store.increment(&a).await.unwrap(), 2);
        assert_eq!(store.increment(&b).await.unwrap(), 1);

        assert_eq!(store.get(&a).await.unwrap(), 2);
        assert_eq!(store.get(&b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_concurrent_increments_are_unique() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let token = SessionToken::from_bytes([3; 32]);

        let handles = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment(&token).await.unwrap() })
            })
            .collect::<Vec<_>>();

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();

        assert_eq!(seen, (1..=50).collect::<Vec<_>>());
        assert_eq!(store.get(&token).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_build_memory_backend() {
        let store = StoreBackend::Memory.build().await.unwrap();
        let token = SessionToken::from_bytes([4; 32]);
        assert_eq!(store.increment(&token).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_build_redis_backend_rejects_bad_url() {
        let result = StoreBackend::Redis("not a url".to_string()).build().await;
        assert!(result.is_err());
    }
}
