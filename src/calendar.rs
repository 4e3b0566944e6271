use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::HashSet;

// A-share market closures. Weekends are computed, these are the extra
// closed dates per year.
const HOLIDAYS_2023: &[&str] = &[
    // New Year
    "2023-01-01",
    "2023-01-02",
    "2023-01-03",
    // Spring Festival
    "2023-01-21",
    "2023-01-22",
    "2023-01-23",
    "2023-01-24",
    "2023-01-25",
    "2023-01-26",
    "2023-01-27",
    // Qingming
    "2023-04-05",
    // Labour Day
    "2023-05-01",
    "2023-05-02",
    "2023-05-03",
    // Dragon Boat
    "2023-06-22",
    "2023-06-23",
    "2023-06-24",
    // Mid-Autumn and National Day
    "2023-09-29",
    "2023-09-30",
    "2023-10-01",
    "2023-10-02",
    "2023-10-03",
    "2023-10-04",
    "2023-10-05",
    "2023-10-06",
];

const HOLIDAYS_2024: &[&str] = &[
    // New Year
    "2024-01-01",
    // Spring Festival
    "2024-02-10",
    "2024-02-11",
    "2024-02-12",
    "2024-02-13",
    "2024-02-14",
    "2024-02-15",
    "2024-02-16",
    "2024-02-17",
    // Qingming
    "2024-04-04",
    "2024-04-05",
    "2024-04-06",
    // Labour Day
    "2024-05-01",
    "2024-05-02",
    "2024-05-03",
    "2024-05-04",
    "2024-05-05",
    // Dragon Boat
    "2024-06-10",
    // Mid-Autumn
    "2024-09-15",
    "2024-09-16",
    "2024-09-17",
    // National Day
    "2024-10-01",
    "2024-10-02",
    "2024-10-03",
    "2024-10-04",
    "2024-10-05",
    "2024-10-06",
    "2024-10-07",
];

const HOLIDAYS_2025: &[&str] = &[
    // New Year
    "2025-01-01",
    // Spring Festival
    "2025-01-28",
    "2025-01-29",
    "2025-01-30",
    "2025-01-31",
    "2025-02-01",
    "2025-02-02",
    "2025-02-03",
    "2025-02-04",
    // Qingming
    "2025-04-04",
    "2025-04-05",
    "2025-04-06",
    // Labour Day
    "2025-05-01",
    "2025-05-02",
    "2025-05-03",
    "2025-05-04",
    "2025-05-05",
    // Dragon Boat
    "2025-05-31",
    "2025-06-01",
    "2025-06-02",
    // National Day and Mid-Autumn
    "2025-10-01",
    "2025-10-02",
    "2025-10-03",
    "2025-10-04",
    "2025-10-05",
    "2025-10-06",
    "2025-10-07",
    "2025-10-08",
];

/// Trading-day calendar: weekdays minus the known holiday set. Years
/// without holiday data fall back to weekday-only classification.
pub struct TradingCalendar {
    holidays: HashSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new() -> Self {
        let mut holidays = HashSet::new();
        for year in [HOLIDAYS_2023, HOLIDAYS_2024, HOLIDAYS_2025] {
            for raw in year {
                if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                    holidays.insert(date);
                }
            }
        }
        Self { holidays }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => false,
            _ => !self.holidays.contains(&date),
        }
    }

    /// First trading day strictly after `date`.
    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut next = date + Duration::days(1);
        while !self.is_trading_day(next) {
            next += Duration::days(1);
        }
        next
    }

    /// Last trading day strictly before `date`.
    pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut prev = date - Duration::days(1);
        while !self.is_trading_day(prev) {
            prev -= Duration::days(1);
        }
        prev
    }

    /// Ordered trading days in `[start, end]` inclusive. An inverted range
    /// yields an empty list.
    pub fn trading_days_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut current = start;
        while current <= end {
            if self.is_trading_day(current) {
                days.push(current);
            }
            current += Duration::days(1);
        }
        days
    }

    pub fn count_trading_days(&self, start: NaiveDate, end: NaiveDate) -> usize {
        self.trading_days_in_range(start, end).len()
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekends_are_not_trading_days() {
        let calendar = TradingCalendar::new();
        // 2024-03-09 is a Saturday, 2024-03-10 a Sunday
        assert!(!calendar.is_trading_day(date(2024, 3, 9)));
        assert!(!calendar.is_trading_day(date(2024, 3, 10)));
        assert!(calendar.is_trading_day(date(2024, 3, 11)));
    }

    #[test]
    fn test_holidays_are_not_trading_days() {
        let calendar = TradingCalendar::new();
        assert!(!calendar.is_trading_day(date(2024, 1, 1)));
        assert!(!calendar.is_trading_day(date(2024, 2, 13)));
        assert!(!calendar.is_trading_day(date(2025, 10, 8)));
        assert!(calendar.is_trading_day(date(2024, 1, 2)));
    }

    #[test]
    fn test_range_excludes_weekends_and_holidays() {
        let calendar = TradingCalendar::new();
        // Spring Festival 2024 closes 02-10 through 02-17; 02-18 is a Sunday.
        let days = calendar.trading_days_in_range(date(2024, 2, 9), date(2024, 2, 19));
        assert_eq!(days, vec![date(2024, 2, 9), date(2024, 2, 19)]);

        for day in calendar.trading_days_in_range(date(2024, 1, 1), date(2024, 12, 31)) {
            assert!(!matches!(day.weekday(), Weekday::Sat | Weekday::Sun));
            assert!(calendar.is_trading_day(day));
        }
    }

    #[test]
    fn test_count_matches_range_length() {
        let calendar = TradingCalendar::new();
        let start = date(2024, 10, 1);
        let end = date(2024, 10, 31);
        assert_eq!(
            calendar.count_trading_days(start, end),
            calendar.trading_days_in_range(start, end).len()
        );
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let calendar = TradingCalendar::new();
        let days = calendar.trading_days_in_range(date(2024, 5, 10), date(2024, 5, 1));
        assert!(days.is_empty());
    }

    #[test]
    fn test_next_trading_day_skips_holiday_block() {
        let calendar = TradingCalendar::new();
        // The Friday before Spring Festival 2024 jumps over the closure week.
        assert_eq!(
            calendar.next_trading_day(date(2024, 2, 9)),
            date(2024, 2, 19)
        );
        assert_eq!(
            calendar.previous_trading_day(date(2024, 1, 2)),
            date(2023, 12, 29)
        );
    }
}
