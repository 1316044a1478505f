//! Cycle calendar
//!
//! The year is split into 10-day cycles. Day 1..=10 is cycle 1, day 11..=20
//! is cycle 2, and so on; the partial 37th cycle at year end is accepted
//! as-is. Every "can this day be written" question in the crate goes through
//! [`is_writable`].

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, Utc};

/// Number of days in one tracking cycle
pub const CYCLE_LENGTH: u32 = 10;

/// Number of full cycles rendered on the yearly grid
pub const CYCLES_PER_YEAR: u32 = 36;

/// Source of "now" for everything that depends on the current day.
pub trait Clock: Send + Sync {
    /// Local calendar day
    fn today(&self) -> NaiveDate;

    /// Wall-clock timestamp
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time, local timezone for the calendar day.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a fixed day, for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    today: NaiveDate,
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        let now = today
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);
        Self { today, now }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.today
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// 1-based day count within the year of `date`.
pub fn day_of_year(date: NaiveDate) -> u32 {
    date.ordinal()
}

/// Cycle containing `day` (1-based day of year). Day 0 maps to cycle 0.
pub fn cycle_index(day: u32) -> u32 {
    day.div_ceil(CYCLE_LENGTH)
}

/// Absolute day of year for a 0-based day inside a 1-based cycle.
///
/// `None` for cycle 0 or when the day does not fit in a `u32`.
pub fn absolute_day(cycle: u32, day_in_cycle: u32) -> Option<u32> {
    cycle
        .checked_sub(1)?
        .checked_mul(CYCLE_LENGTH)?
        .checked_add(day_in_cycle)?
        .checked_add(1)
}

/// Whether the given cycle-day is at or before `today` (day of year).
///
/// Cycle 0 and day indices outside the cycle are never writable.
pub fn is_writable(cycle: u32, day_in_cycle: u32, today: u32) -> bool {
    if cycle == 0 || day_in_cycle >= CYCLE_LENGTH {
        return false;
    }
    absolute_day(cycle, day_in_cycle).is_some_and(|day| day <= today)
}

/// Whether a cycle has started, i.e. its first day is writable.
pub fn is_cycle_open(cycle: u32, today: u32) -> bool {
    is_writable(cycle, 0, today)
}

/// First and last date of a cycle in `year`.
///
/// Days past year end roll into the next year, the same way the grid shows
/// them.
pub fn cycle_span(cycle: u32, year: i32) -> Option<(NaiveDate, NaiveDate)> {
    let jan_first = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let offset = u64::from(cycle.saturating_sub(1)) * u64::from(CYCLE_LENGTH);
    let start = jan_first.checked_add_days(Days::new(offset))?;
    let end = start.checked_add_days(Days::new(u64::from(CYCLE_LENGTH - 1)))?;
    Some((start, end))
}

/// Human-readable `M.D - M.D` span of a cycle in `year`. Display text only.
pub fn date_range_label(cycle: u32, year: i32) -> String {
    match cycle_span(cycle, year) {
        Some((start, end)) => format!(
            "{}.{} - {}.{}",
            start.month(),
            start.day(),
            end.month(),
            end.day()
        ),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_of_year() {
        assert_eq!(day_of_year(date(2026, 1, 1)), 1);
        assert_eq!(day_of_year(date(2026, 2, 1)), 32);
        assert_eq!(day_of_year(date(2026, 12, 31)), 365);
        assert_eq!(day_of_year(date(2024, 12, 31)), 366);
    }

    #[test]
    fn test_cycle_index_boundaries() {
        assert_eq!(cycle_index(1), 1);
        assert_eq!(cycle_index(10), 1);
        assert_eq!(cycle_index(11), 2);
        assert_eq!(cycle_index(360), 36);
        assert_eq!(cycle_index(361), 37);
        assert_eq!(cycle_index(366), 37);
    }

    #[test]
    fn test_is_writable_matches_absolute_day() {
        // cycle 3, day 5 -> absolute day 26
        assert_eq!(absolute_day(3, 5), Some(26));
        assert!(is_writable(3, 5, 26));
        assert!(is_writable(3, 5, 200));
        assert!(!is_writable(3, 5, 25));
    }

    #[test]
    fn test_is_writable_rejects_out_of_range() {
        assert!(!is_writable(0, 0, 365));
        assert!(!is_writable(1, 10, 365));
    }

    #[test]
    fn test_cycles_past_year_end_are_not_writable() {
        assert!(!is_writable(38, 0, 366));
        assert!(!is_writable(429_496_731, 0, 200));
        assert!(!is_writable(u32::MAX, 0, 366));
        assert!(!is_writable(u32::MAX, 9, u32::MAX));
        assert_eq!(absolute_day(u32::MAX, 0), None);
        assert!(!is_cycle_open(u32::MAX, 366));
    }

    #[test]
    fn test_cycle_open() {
        assert!(is_cycle_open(2, 11));
        assert!(!is_cycle_open(3, 20));
    }

    #[test]
    fn test_date_range_label() {
        assert_eq!(date_range_label(1, 2026), "1.1 - 1.10");
        assert_eq!(date_range_label(4, 2026), "1.31 - 2.9");
        assert_eq!(date_range_label(37, 2026), "12.27 - 1.5");
    }

    #[test]
    fn test_date_range_label_out_of_calendar_range() {
        assert_eq!(cycle_span(u32::MAX, 2026), None);
        assert_eq!(date_range_label(100_000_000, 2026), "");
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(date(2026, 10, 18));
        assert_eq!(clock.today(), date(2026, 10, 18));
        assert_eq!(clock.now().date_naive(), date(2026, 10, 18));
    }
}
