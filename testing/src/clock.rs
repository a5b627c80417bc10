//! Deterministic clocks for tests.

use chrono::{DateTime, TimeZone, Utc};
use flashsale_core::environment::Clock;

/// Fixed clock for deterministic tests. Always returns the same time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// A default fixed clock for tests (2025-06-01 00:00:00 UTC).
#[must_use]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_fixed() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }
}
