//! Redis dedup backend.
//!
//! Uses `SET key 1 NX EX ttl`, which creates the key only if it does not
//! exist and lets Redis expire it, so every relay instance sharing the store
//! sees the same window. `DEL` releases a key early.
//!
//! The connection is established lazily on first use and reused afterwards.
//! After any error the cached connection is dropped so the next call
//! reconnects.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::debug;

use super::{DedupBackend, DedupError, DedupKey};

/// Prefix for all dedup keys written to Redis.
pub const KEY_PREFIX: &str = "vuln-dispatch-relay:dedup:";

/// Dedup entries held in a shared Redis.
pub struct RedisDedupStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl RedisDedupStore {
    /// Creates a store for the Redis at `url`. No connection is made yet.
    pub fn open(url: &str, timeout: Duration) -> Result<Self, DedupError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            timeout,
        })
    }

    fn redis_key(key: &DedupKey) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    async fn connection(&self) -> Result<MultiplexedConnection, DedupError> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        debug!("Connected to Redis dedup store");
        *cached = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        self.connection.lock().await.take();
    }

    async fn set_nx(&self, key: &DedupKey, ttl: Duration) -> Result<bool, DedupError> {
        let mut conn = self.connection().await?;
        // Redis rejects EX 0, and sub-second TTLs round up.
        let seconds = ttl.as_secs().max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::redis_key(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &DedupKey) -> Result<(), DedupError> {
        let mut conn = self.connection().await?;
        let _removed: i64 = redis::cmd("DEL")
            .arg(Self::redis_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Runs a Redis operation under the store timeout, dropping the cached
    /// connection if it fails.
    async fn bounded<T, F>(&self, op: F) -> Result<T, DedupError>
    where
        F: std::future::Future<Output = Result<T, DedupError>>,
    {
        let result = match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(DedupError::Timeout(self.timeout)),
        };
        if result.is_err() {
            self.reset().await;
        }
        result
    }
}

impl DedupBackend for RedisDedupStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check_and_set(&self, key: &DedupKey, ttl: Duration) -> Result<bool, DedupError> {
        self.bounded(self.set_nx(key, ttl)).await
    }

    async fn release(&self, key: &DedupKey) -> Result<(), DedupError> {
        self.bounded(self.del(key)).await
    }
}

impl std::fmt::Debug for RedisDedupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDedupStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
