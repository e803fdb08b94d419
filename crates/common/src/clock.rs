//! Clock abstraction so time-dependent business rules stay deterministic.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

/// Abstraction over system time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock for tests.
///
/// Clones share the same instant, so advancing one advances all of them.
#[derive(Debug, Clone)]
pub struct FixedClock(Arc<RwLock<DateTime<Utc>>>);

impl FixedClock {
    /// Creates a clock frozen at the given instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self(Arc::new(RwLock::new(instant)))
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }

    /// Pins the clock to a new instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut guard = self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_shared_between_clones() {
        let start = Utc::now();
        let clock = FixedClock::at(start);
        let other = clock.clone();

        clock.advance(Duration::hours(2));

        assert_eq!(other.now(), start + Duration::hours(2));
    }

    #[test]
    fn fixed_clock_set_overrides_instant() {
        let clock = FixedClock::at(Utc::now());
        let target = Utc::now() + Duration::days(10);
        clock.set(target);
        assert_eq!(clock.now(), target);
    }
}
