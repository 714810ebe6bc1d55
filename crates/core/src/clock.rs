//! Time source abstraction
//!
//! Market-hours checks, periodic-rule scheduling, and end-of-day
//! snapshots all depend on "now"; injecting a clock keeps them
//! testable against frozen timestamps.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Mutex;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    /// Current time converted into a specific timezone
    fn now_in(&self, tz: Tz) -> DateTime<Tz> {
        tz.from_utc_datetime(&self.now_utc().naive_utc())
    }
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Frozen clock for tests; advances only when told to
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(seconds);
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_fixed_clock_set_and_advance() {
        let clock = FixedClock::new(utc(2024, 3, 4, 12, 0));
        assert_eq!(clock.now_utc(), utc(2024, 3, 4, 12, 0));

        clock.advance_seconds(90);
        assert_eq!(clock.now_utc(), utc(2024, 3, 4, 12, 1) + Duration::seconds(30));

        clock.set(utc(2024, 3, 5, 9, 30));
        assert_eq!(clock.now_utc(), utc(2024, 3, 5, 9, 30));
    }

    #[test]
    fn test_timezone_conversion() {
        // 2024-03-04 17:00 UTC is 09:00 in Los Angeles (PST) and
        // 02:00 next day in Seoul
        let clock = FixedClock::new(utc(2024, 3, 4, 17, 0));

        let la = clock.now_in(chrono_tz::America::Los_Angeles);
        assert_eq!(la.format("%H:%M").to_string(), "09:00");

        let seoul = clock.now_in(chrono_tz::Asia::Seoul);
        assert_eq!(seoul.format("%d %H:%M").to_string(), "05 02:00");
    }
}
