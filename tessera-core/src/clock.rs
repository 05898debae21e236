//! Clock abstraction
//!
//! Expiration windows and token freshness checks depend on wall time. The
//! services take a `Clock` so tests can drive time explicitly instead of
//! sleeping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp from milliseconds since epoch
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Get milliseconds since epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// The Unix epoch (used for synthesized responses)
    pub fn epoch() -> Self {
        Timestamp(0)
    }

    /// Add a duration in milliseconds, saturating on overflow
    pub fn plus_millis(&self, millis: u64) -> Self {
        Timestamp(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current time as a unix-millisecond timestamp
    fn now(&self) -> Timestamp;
}

/// Production clock backed by the system time
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_millis() as u64)
    }
}

/// Manually driven clock for tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at the given unix-millisecond time
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(millis)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b.as_millis() >= a.as_millis());
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now().as_millis(), 1000);
        clock.advance(500);
        assert_eq!(clock.now().as_millis(), 1500);
        clock.set(100);
        assert_eq!(clock.now().as_millis(), 100);
    }

    #[test]
    fn test_timestamp_ordering() {
        let ts1 = Timestamp::from_millis(100);
        let ts2 = Timestamp::from_millis(200);
        assert!(ts1 < ts2);
        assert_eq!(ts1.plus_millis(100), ts2);
    }
}
