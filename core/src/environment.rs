//! Injected dependencies shared by every service.
//!
//! Services receive their collaborators through constructors rather than a
//! container; the traits here are the seams that let tests substitute
//! deterministic implementations.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
///
/// Saga rows, outbox records, and grants all timestamp themselves through
/// this trait so tests can pin time with a fixed clock.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
