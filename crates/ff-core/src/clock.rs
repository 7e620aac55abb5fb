//! Time sources and settlement-day boundaries.
//!
//! Every time-sensitive computation reads the clock through [`Clock`] so that
//! day boundaries can be fast-forwarded (via an offset) or pinned (in tests).

use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

/// A source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time shifted by a fixed offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    offset: Duration,
}

impl SystemClock {
    pub const fn new(offset: Duration) -> Self {
        Self { offset }
    }

    /// Builds a clock from the configured offset in seconds.
    pub fn with_offset_secs(secs: i64) -> Self {
        Self::new(Duration::seconds(secs))
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }
}

/// A manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The half-open UTC interval `[start, end)` settled by one daily run.
///
/// `end` is the midnight that closed the day; rows produced by the run are
/// tagged with the calendar date of `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SettlementDay {
    date: NaiveDate,
}

impl SettlementDay {
    /// The day identified by its calendar date.
    pub const fn new(date: NaiveDate) -> Self {
        Self { date }
    }

    /// The most recent day that has fully elapsed at `now`.
    pub fn ending_at(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self {
            date: today.pred_opt().unwrap_or(today),
        }
    }

    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    /// Inclusive lower bound (`D-1`).
    pub fn start(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.date.and_time(chrono::NaiveTime::MIN))
    }

    /// Exclusive upper bound (`D`).
    pub fn end(&self) -> DateTime<Utc> {
        self.start() + Duration::days(1)
    }

    /// Storage label, `YYYY-MM-DD`.
    pub fn label(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

impl std::fmt::Display for SettlementDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn ending_at_selects_previous_calendar_day() {
        let day = SettlementDay::ending_at(at("2025-03-02T00:00:05Z"));
        assert_eq!(day.label(), "2025-03-01");
        assert_eq!(day.start(), at("2025-03-01T00:00:00Z"));
        assert_eq!(day.end(), at("2025-03-02T00:00:00Z"));
    }

    #[test]
    fn ending_at_late_in_the_day_still_settles_yesterday() {
        let day = SettlementDay::ending_at(at("2025-03-02T23:59:59Z"));
        assert_eq!(day.label(), "2025-03-01");
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(at("2025-01-01T00:00:00Z"));
        clock.advance(Duration::days(2));
        assert_eq!(clock.now(), at("2025-01-03T00:00:00Z"));
        clock.set(at("2024-12-31T12:00:00Z"));
        assert_eq!(clock.now(), at("2024-12-31T12:00:00Z"));
    }

    #[test]
    fn system_clock_applies_offset() {
        let clock = SystemClock::with_offset_secs(86_400);
        let delta = clock.now() - Utc::now();
        assert!(delta > Duration::hours(23));
    }
}
