use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::model::{Ms, TimeOfDay};

/// Source of "now". Every elapsed-time and overtime figure is a pure
/// function of stored timestamps and this reading.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for tests and benchmarks.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

/// Instant of local wall-clock `time` on `date`, at a fixed UTC offset.
pub fn instant_at(date: NaiveDate, time: TimeOfDay, offset: FixedOffset) -> Ms {
    let midnight_utc = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(0);
    midnight_utc + time.as_ms() - offset.local_minus_utc() as Ms * 1_000
}

/// Local calendar date of an instant.
pub fn local_date(now: Ms, offset: FixedOffset) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(now).map(|dt| dt.with_timezone(&offset).date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn manual_clock_moves() {
        let clock = ManualClock::new(1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn instant_at_respects_offset() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let d = date(2026, 10, 16);
        let t: TimeOfDay = "14:00".parse().unwrap();
        let at_utc = instant_at(d, t, utc);
        let at_tokyo = instant_at(d, t, tokyo);
        assert_eq!(at_utc - at_tokyo, 9 * 3_600_000);
        assert_eq!(local_date(at_tokyo, tokyo), Some(d));
    }

    #[test]
    fn local_date_rolls_over_at_local_midnight() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let d = date(2026, 10, 16);
        let late = instant_at(d, "23:59".parse().unwrap(), tokyo);
        assert_eq!(local_date(late, tokyo), Some(d));
        assert_eq!(local_date(late + 60_000, tokyo), Some(date(2026, 10, 17)));
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
