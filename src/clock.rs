//! Time source for the scheduler
//!
//! Every timestamp the scheduler stores or compares (task touch times,
//! admission scores, session unblock deadlines) is a microsecond Unix epoch.
//! Reading it through [`Clock`] lets tests drive the poll interval and stall
//! timeout deterministically with [`ManualClock`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Microseconds since the Unix epoch
pub type Micros = i64;

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current time in microseconds since the Unix epoch
    fn now_micros(&self) -> Micros;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> Micros {
        chrono::Utc::now().timestamp_micros()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start` microseconds
    pub fn new(start: Micros) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(as_micros(by), Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, at: Micros) {
        self.now.store(at, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> Micros {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a duration to whole microseconds, saturating at `i64::MAX`
pub fn as_micros(duration: Duration) -> Micros {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_millis(2));
        assert_eq!(clock.now_micros(), 3_000);

        clock.set(42);
        assert_eq!(clock.now_micros(), 42);
    }

    #[test]
    fn test_system_clock_is_microseconds() {
        let now = SystemClock.now_micros();
        // 2020-01-01 in microseconds
        assert!(now > 1_577_836_800_000_000);
    }

    #[test]
    fn test_as_micros_saturates() {
        assert_eq!(as_micros(Duration::from_secs(30)), 30_000_000);
        assert_eq!(as_micros(Duration::MAX), i64::MAX);
    }
}
