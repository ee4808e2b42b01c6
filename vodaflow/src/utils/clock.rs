//! Injectable wall clock.

use chrono::{Local, NaiveDate, NaiveDateTime};
use std::fmt::Debug;

/// Source of the current local time.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current local date and time.
    fn now(&self) -> NaiveDateTime;

    /// Returns today's date.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// The system clock in the local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    /// Creates a clock frozen at noon of the given day.
    #[must_use]
    pub fn at_noon(date: NaiveDate) -> Self {
        Self(date.and_hms_opt(12, 0, 0).unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let clock = FixedClock::at_noon(day);
        assert_eq!(clock.today(), day);
        assert_eq!(clock.now().format("%H:%M").to_string(), "12:00");
    }

    #[test]
    fn test_system_clock_moves() {
        let clock = SystemClock;
        assert!(clock.now() <= SystemClock.now());
    }
}
