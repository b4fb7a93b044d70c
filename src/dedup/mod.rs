//! Alert deduplication.
//!
//! [`DedupStore`] answers "has an equivalent alert been accepted within the
//! TTL?" with an atomic check-and-set, and can release a key early when the
//! dispatch it guarded failed on GitHub's side.
//!
//! # Backends
//!
//! - [`RedisDedupStore`]: shared across relay instances.
//! - [`MemoryDedupStore`]: per process.
//!
//! When Redis is configured it is tried first. Any Redis error is logged,
//! counted, and the call is served by the in-memory backend instead: the
//! relay keeps working, but during an outage duplicates are only suppressed
//! per instance. [`DedupStore::fallback_count`] (reported by `/healthz`) and
//! the `relay_dedup_fallback_total` counter (exported on `/metrics`) make
//! that visible.
//!
//! Both backends implement [`DedupBackend`]; the remote one is a type
//! parameter of [`DedupStore`] so tests can stand in a failing or shared
//! backend.
//!
//! # Disabled mode
//!
//! With deduplication disabled, `check_and_set` always reports "not seen" and
//! `release` does nothing.

pub mod key;
pub mod memory;
pub mod redis;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::DedupConfig;
use crate::telemetry::DEDUP_FALLBACK_TOTAL;

pub use key::{DEFAULT_TAG, DedupKey};
pub use memory::MemoryDedupStore;
pub use self::redis::RedisDedupStore;

/// Upper bound on a single Redis operation.
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from a dedup backend.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("dedup store timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// A dedup backend with atomic check-and-set semantics.
pub trait DedupBackend: Send + Sync {
    /// Short name for logs and health output.
    fn name(&self) -> &'static str;

    /// Creates an entry for `key` expiring after `ttl` unless an unexpired
    /// one exists. Returns true if this call created the entry.
    fn check_and_set(
        &self,
        key: &DedupKey,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, DedupError>> + Send;

    /// Removes the entry for `key`, if any.
    fn release(&self, key: &DedupKey) -> impl Future<Output = Result<(), DedupError>> + Send;
}

/// The relay's dedup store: an optional remote backend (Redis in
/// production) with the in-memory backend as fallback.
pub struct DedupStore<R = RedisDedupStore> {
    enabled: bool,
    ttl: Duration,
    local: MemoryDedupStore,
    remote: Option<R>,
    fallbacks: AtomicU64,
}

impl DedupStore {
    /// Builds the store from configuration.
    ///
    /// An unparseable Redis URL is logged and the in-memory backend is used.
    pub fn from_config(config: &DedupConfig, clock: Arc<dyn Clock>) -> Self {
        let remote = match (&config.redis_url, config.enabled) {
            (Some(url), true) => match RedisDedupStore::open(url, REMOTE_TIMEOUT) {
                Ok(store) => {
                    info!("Using Redis dedup store");
                    Some(store)
                }
                Err(e) => {
                    warn!(error = %e, "Invalid REDIS_URL, using in-memory dedup store");
                    None
                }
            },
            _ => None,
        };

        Self::new(config.enabled, config.ttl, clock, remote)
    }

    /// An in-memory store.
    pub fn in_memory(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::new(true, ttl, clock, None)
    }

    /// A store that never suppresses anything.
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self::new(false, Duration::ZERO, clock, None)
    }
}

impl<R: DedupBackend> DedupStore<R> {
    pub fn new(enabled: bool, ttl: Duration, clock: Arc<dyn Clock>, remote: Option<R>) -> Self {
        Self {
            enabled,
            ttl,
            local: MemoryDedupStore::new(clock),
            remote,
            fallbacks: AtomicU64::new(0),
        }
    }

    /// The configured dedup window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Name of the preferred backend, for health output.
    pub fn backend(&self) -> &'static str {
        match (self.enabled, &self.remote) {
            (false, _) => "disabled",
            (true, Some(remote)) => remote.name(),
            (true, None) => self.local.name(),
        }
    }

    /// Number of operations served by the in-memory backend because the
    /// remote backend failed.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Returns true if `key` was not seen within `ttl` (and records it),
    /// false if this is a duplicate.
    pub async fn check_and_set(&self, key: &DedupKey, ttl: Duration) -> bool {
        if !self.enabled {
            return true;
        }

        if let Some(remote) = &self.remote {
            match remote.check_and_set(key, ttl).await {
                Ok(created) => return created,
                Err(e) => self.record_fallback("check_and_set", &e),
            }
        }

        match self.local.check_and_set(key, ttl).await {
            Ok(created) => created,
            Err(e) => {
                // Nothing left to fall back to: let the alert through.
                warn!(error = %e, "In-memory dedup store failed");
                true
            }
        }
    }

    /// Removes `key` so the next identical alert is not suppressed.
    ///
    /// The in-memory entry is always cleared too, since an earlier
    /// check-and-set may have been served by the fallback.
    pub async fn release(&self, key: &DedupKey) {
        if !self.enabled {
            return;
        }

        if let Some(remote) = &self.remote
            && let Err(e) = remote.release(key).await
        {
            self.record_fallback("release", &e);
        }

        if let Err(e) = self.local.release(key).await {
            warn!(error = %e, "In-memory dedup store failed");
        }
        debug!(dedup_key = %key, "Released dedup key");
    }

    fn record_fallback(&self, operation: &'static str, error: &DedupError) {
        let total = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::counter!(DEDUP_FALLBACK_TOTAL, "operation" => operation).increment(1);
        warn!(
            operation,
            error = %error,
            fallbacks = total,
            "Remote dedup store failed, falling back to in-memory store"
        );
    }
}

impl<R: DedupBackend> std::fmt::Debug for DedupStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupStore")
            .field("enabled", &self.enabled)
            .field("ttl", &self.ttl)
            .field("backend", &self.backend())
            .field("fallbacks", &self.fallback_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ManualClock, test_time};

    const TTL: Duration = Duration::from_secs(180);

    fn key() -> DedupKey {
        DedupKey::for_alert("acme", "widget", "scan", "ghcr.io/acme/widget:1.2.3", Some("1.2.3"))
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(test_time()))
    }

    #[tokio::test]
    async fn disabled_store_never_suppresses() {
        let store = DedupStore::disabled(clock());
        assert!(store.check_and_set(&key(), TTL).await);
        assert!(store.check_and_set(&key(), TTL).await);
        store.release(&key()).await;
        assert!(store.check_and_set(&key(), TTL).await);
        assert_eq!(store.backend(), "disabled");
    }

    #[tokio::test]
    async fn in_memory_store_suppresses_until_ttl() {
        let clock = clock();
        let store = DedupStore::in_memory(TTL, clock.clone());

        assert!(store.check_and_set(&key(), TTL).await);
        assert!(!store.check_and_set(&key(), TTL).await);

        clock.advance(chrono::Duration::seconds(180));
        assert!(store.check_and_set(&key(), TTL).await);
    }

    #[tokio::test]
    async fn release_reopens_window() {
        let store = DedupStore::in_memory(TTL, clock());
        assert!(store.check_and_set(&key(), TTL).await);
        store.release(&key()).await;
        assert!(store.check_and_set(&key(), TTL).await);
        // Releasing twice is harmless.
        store.release(&key()).await;
        store.release(&key()).await;
    }

    /// A remote backend that is always down.
    struct Unreachable;

    impl DedupBackend for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        async fn check_and_set(&self, _key: &DedupKey, _ttl: Duration) -> Result<bool, DedupError> {
            Err(DedupError::Timeout(REMOTE_TIMEOUT))
        }

        async fn release(&self, _key: &DedupKey) -> Result<(), DedupError> {
            Err(DedupError::Timeout(REMOTE_TIMEOUT))
        }
    }

    /// A remote backend shared between stores, standing in for one Redis
    /// used by several relay instances.
    #[derive(Clone)]
    struct Shared(Arc<MemoryDedupStore>);

    impl DedupBackend for Shared {
        fn name(&self) -> &'static str {
            "shared"
        }

        async fn check_and_set(&self, key: &DedupKey, ttl: Duration) -> Result<bool, DedupError> {
            self.0.check_and_set(key, ttl).await
        }

        async fn release(&self, key: &DedupKey) -> Result<(), DedupError> {
            self.0.release(key).await
        }
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_memory() {
        let store = DedupStore::new(true, TTL, clock(), Some(Unreachable));
        assert_eq!(store.backend(), "unreachable");

        assert!(store.check_and_set(&key(), TTL).await);
        assert!(!store.check_and_set(&key(), TTL).await);
        assert_eq!(store.fallback_count(), 2);

        store.release(&key()).await;
        assert_eq!(store.fallback_count(), 3);
        assert!(store.check_and_set(&key(), TTL).await);
    }

    #[tokio::test]
    async fn remote_backend_is_shared_between_stores() {
        let clock = clock();
        let remote = Shared(Arc::new(MemoryDedupStore::new(clock.clone())));
        let first = DedupStore::new(true, TTL, clock.clone(), Some(remote.clone()));
        let second = DedupStore::new(true, TTL, clock, Some(remote));

        assert!(first.check_and_set(&key(), TTL).await);
        assert!(!second.check_and_set(&key(), TTL).await);

        second.release(&key()).await;
        assert!(first.check_and_set(&key(), TTL).await);
        assert_eq!(first.fallback_count() + second.fallback_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_redis_falls_back_to_memory() {
        let remote =
            RedisDedupStore::open("redis://127.0.0.1:1/", Duration::from_secs(5)).unwrap();
        let store = DedupStore::new(true, TTL, clock(), Some(remote));
        assert_eq!(store.backend(), "redis");

        assert!(store.check_and_set(&key(), TTL).await);
        assert!(!store.check_and_set(&key(), TTL).await);
        assert_eq!(store.fallback_count(), 2);
    }

    #[test]
    fn invalid_redis_url_uses_memory() {
        let config = DedupConfig {
            enabled: true,
            ttl: TTL,
            redis_url: Some("definitely not a url".to_string()),
        };
        let store = DedupStore::from_config(&config, clock());
        assert_eq!(store.backend(), "memory");
    }

    #[test]
    fn disabled_config_ignores_redis() {
        let config = DedupConfig {
            enabled: false,
            ttl: TTL,
            redis_url: Some("redis://cache:6379".to_string()),
        };
        let store = DedupStore::from_config(&config, clock());
        assert_eq!(store.backend(), "disabled");
    }
}
