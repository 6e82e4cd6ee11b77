//! Clock abstraction.
//!
//! Production code calls [`Clock::now`]; tests can substitute [`FixedClock`]
//! to exercise expiry boundaries deterministically without sleeping.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time as seconds since the Unix epoch.
    fn now_unix(&self) -> i64;

    /// Current time as milliseconds since the Unix epoch. The default
    /// widens [`Clock::now_unix`] rather than sampling real sub-second
    /// resolution, so fixed/test clocks that only reason in whole seconds
    /// keep behaving the same; [`SystemClock`] overrides this with the
    /// actual millisecond-resolution wall clock.
    fn now_unix_ms(&self) -> i64 {
        self.now_unix() * 1000
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs() as i64
    }

    fn now_unix_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as i64
    }
}

/// A clock pinned to a fixed instant, for deterministic expiry tests.
#[derive(Debug, Clone)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_unix(&self) -> i64 {
        self.0
    }
}

/// Shared handle to a clock, cheaply cloneable across components.
pub type SharedClock = Arc<dyn Clock>;

/// The default production clock.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_stable() {
        let clock = FixedClock(1_000);
        assert_eq!(clock.now_unix(), 1_000);
        assert_eq!(clock.now_unix(), 1_000);
    }
}
