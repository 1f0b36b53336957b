//! Freshness policy for cached records
//!
//! Decides whether a stored record is still current. The decision is a pure
//! function of the record timestamp, the current time and the configured TTL;
//! "now" comes from an injected clock so the behavior is deterministic in
//! tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;

/// Default record lifetime: 24 hours
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Source of the current time in Unix seconds
pub trait Clock: Send + Sync {
    /// Current time as seconds since the Unix epoch
    fn unix_seconds(&self) -> u64;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        Utc::now().timestamp().max(0) as u64
    }
}

/// Manually controlled clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at the given time
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Moves the clock forward by the given number of seconds
    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_seconds(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Decides whether cached records are still fresh
///
/// A record is fresh while its age is strictly below the TTL. Age uses
/// saturating subtraction, so a record stamped in the future (clock skew)
/// has age zero and stays fresh rather than triggering refetch churn. A
/// zero TTL makes every record stale, skewed ones included.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    ttl_secs: u64,
}

impl FreshnessPolicy {
    /// Creates a policy with the given record lifetime
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_secs: ttl.as_secs(),
        }
    }

    /// Returns the record lifetime in seconds
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Returns whether a record stamped at `cached_at` is fresh at `now`
    pub fn is_fresh(&self, cached_at: u64, now: u64) -> bool {
        now.saturating_sub(cached_at) < self.ttl_secs
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
