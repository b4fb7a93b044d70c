//! In-process dedup backend.
//!
//! A map from key to expiry instant behind a `parking_lot::Mutex`. The whole
//! check-and-set runs under the lock, so two concurrent callers with the same
//! key cannot both see "not seen".
//!
//! There is no background sweeper. Expired entries are purged lazily: an
//! expired entry for the key being checked is simply overwritten, and a full
//! sweep runs on access at most once per [`SWEEP_INTERVAL`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use super::{DedupBackend, DedupError, DedupKey};
use crate::clock::Clock;

/// Minimum time between full sweeps of expired entries.
pub const SWEEP_INTERVAL: chrono::Duration = chrono::Duration::seconds(60);

struct MemoryState {
    entries: HashMap<String, DateTime<Utc>>,
    last_sweep: DateTime<Utc>,
}

impl MemoryState {
    /// Removes expired entries if a sweep is due. Returns the number removed.
    fn sweep_if_due(&mut self, now: DateTime<Utc>) -> usize {
        if now - self.last_sweep < SWEEP_INTERVAL {
            return 0;
        }
        self.last_sweep = now;
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }
}

/// Dedup entries held in process memory.
pub struct MemoryDedupStore {
    clock: Arc<dyn Clock>,
    state: Mutex<MemoryState>,
}

impl MemoryDedupStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let last_sweep = clock.now();
        Self {
            clock,
            state: Mutex::new(MemoryState {
                entries: HashMap::new(),
                last_sweep,
            }),
        }
    }

    /// Records `key` until `now + ttl` unless an unexpired entry exists.
    ///
    /// Returns true if this call created the entry.
    pub fn check_and_set_now(&self, key: &DedupKey, ttl: Duration) -> bool {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl);

        let mut state = self.state.lock();
        let swept = state.sweep_if_due(now);
        if swept > 0 {
            trace!(swept, "Swept expired dedup entries");
        }

        match state.entries.get(key.as_str()) {
            Some(existing) if *existing > now => false,
            _ => {
                state.entries.insert(key.as_str().to_string(), expires_at);
                true
            }
        }
    }

    /// Removes `key`. Removing an absent key is not an error.
    pub fn release_now(&self, key: &DedupKey) {
        self.state.lock().entries.remove(key.as_str());
    }

    /// Number of entries currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DedupBackend for MemoryDedupStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn check_and_set(&self, key: &DedupKey, ttl: Duration) -> Result<bool, DedupError> {
        Ok(self.check_and_set_now(key, ttl))
    }

    async fn release(&self, key: &DedupKey) -> Result<(), DedupError> {
        self.release_now(key);
        Ok(())
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
