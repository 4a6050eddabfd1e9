//! Trading-session gating for the live scanner.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday};
use std::sync::Mutex;

use crate::domain::error::SignalbotError;

/// Source of the current instant. Swapped for a fixed clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        FixedClock {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Weekday session `[open, close)` in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    offset: FixedOffset,
}

impl MarketHours {
    pub fn new(
        open: NaiveTime,
        close: NaiveTime,
        utc_offset_hours: i32,
    ) -> Result<Self, SignalbotError> {
        if open >= close {
            return Err(SignalbotError::invalid(
                "scanner",
                "market_open",
                "market_open must be before market_close",
            ));
        }
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            SignalbotError::invalid(
                "scanner",
                "utc_offset_hours",
                format!("{} is not a valid UTC offset", utc_offset_hours),
            )
        })?;
        Ok(MarketHours {
            open,
            close,
            offset,
        })
    }

    pub fn utc_offset_hours(&self) -> i32 {
        self.offset.local_minus_utc() / 3600
    }

    /// Exchange-local calendar date of `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = local.time();
        time >= self.open && time < self.close
    }
}

impl Default for MarketHours {
    /// 09:00 to 15:30 at UTC+09:00.
    fn default() -> Self {
        MarketHours {
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default(),
            offset: FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn default_session_in_local_time() {
        let hours = MarketHours::default();
        // 2024-03-04 is a Monday; 00:00 UTC is 09:00 local
        assert!(hours.is_open(utc(2024, 3, 4, 0, 0)));
        assert!(hours.is_open(utc(2024, 3, 4, 6, 29)));
        assert!(!hours.is_open(utc(2024, 3, 4, 6, 30)));
        assert!(!hours.is_open(utc(2024, 3, 3, 23, 59)));
    }

    #[test]
    fn weekends_are_closed() {
        let hours = MarketHours::default();
        // Saturday 10:00 local
        assert!(!hours.is_open(utc(2024, 3, 9, 1, 0)));
        // Sunday 23:00 UTC is Monday 08:00 local, before the open
        assert!(!hours.is_open(utc(2024, 3, 10, 23, 0)));
    }

    #[test]
    fn local_date_crosses_midnight() {
        let hours = MarketHours::default();
        assert_eq!(
            hours.local_date(utc(2024, 3, 4, 20, 0)),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[test]
    fn rejects_inverted_session() {
        let open = NaiveTime::from_hms_opt(15, 0, 0).unwrap();
        let close = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert!(MarketHours::new(open, close, 9).is_err());
    }

    #[test]
    fn rejects_out_of_range_offset() {
        let open = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let close = NaiveTime::from_hms_opt(15, 0, 0).unwrap();
        assert!(MarketHours::new(open, close, 30).is_err());
        assert_eq!(MarketHours::new(open, close, -5).unwrap().utc_offset_hours(), -5);
    }

    #[test]
    fn fixed_clock_moves_on_set() {
        let clock = FixedClock::new(utc(2024, 3, 4, 0, 0));
        clock.set(utc(2024, 3, 4, 1, 0));
        assert_eq!(clock.now(), utc(2024, 3, 4, 1, 0));
    }
}
