//! Wall-clock abstraction.
//!
//! Token expiry and dedup TTLs are compared against `Clock::now()` rather than
//! `Utc::now()` directly, so tests can move time forward deterministically.

use chrono::{DateTime, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
