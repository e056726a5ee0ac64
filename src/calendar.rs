//! Business Calendar
//!
//! Leaf dependency for response-deadline arithmetic. Business days exclude
//! weekends and a configurable holiday set. Deterministic and side-effect-free
//! so the status read path and the auto-close scheduler always agree on
//! "overdue".

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Business-day arithmetic over an optional holiday set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessCalendar {
    /// Dates treated as non-working in addition to weekends
    holidays: BTreeSet<NaiveDate>,
}

impl BusinessCalendar {
    /// Calendar with no holidays (weekends only)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn add_holiday(&mut self, date: NaiveDate) {
        self.holidays.insert(date);
    }

    /// A date counts as a business day when it is neither a weekend nor a holiday
    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Advance `n` business days from `date`.
    ///
    /// The start date itself is never counted; each step lands on the next
    /// business day. `add_business_days(Friday, 5)` is the following Friday.
    pub fn add_business_days(&self, date: NaiveDate, n: u32) -> NaiveDate {
        let mut current = date;
        let mut remaining = n;
        while remaining > 0 {
            current = current + Duration::days(1);
            if self.is_business_day(current) {
                remaining -= 1;
            }
        }
        current
    }

    /// The instant a response window closes: `window_days` business days after
    /// `notified_at`, at the same time of day.
    pub fn deadline(&self, notified_at: DateTime<Utc>, window_days: u32) -> DateTime<Utc> {
        let start = notified_at.date_naive();
        let end = self.add_business_days(start, window_days);
        notified_at + end.signed_duration_since(start)
    }

    /// `now >= add_business_days(notified_at, window_days)`
    pub fn is_overdue(&self, notified_at: DateTime<Utc>, window_days: u32, now: DateTime<Utc>) -> bool {
        now >= self.deadline(notified_at, window_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekend_is_not_business_day() {
        let cal = BusinessCalendar::new();
        assert!(cal.is_business_day(date(2025, 6, 13))); // Friday
        assert!(!cal.is_business_day(date(2025, 6, 14))); // Saturday
        assert!(!cal.is_business_day(date(2025, 6, 15))); // Sunday
        assert!(cal.is_business_day(date(2025, 6, 16))); // Monday
    }

    #[test]
    fn test_add_business_days_skips_weekend() {
        let cal = BusinessCalendar::new();
        // Friday + 5 business days = the following Friday (7 calendar days)
        let friday = date(2025, 6, 13);
        assert_eq!(cal.add_business_days(friday, 5), date(2025, 6, 20));
        // Friday + 1 = Monday
        assert_eq!(cal.add_business_days(friday, 1), date(2025, 6, 16));
    }

    #[test]
    fn test_add_business_days_skips_holidays() {
        // Monday the 16th declared a holiday
        let cal = BusinessCalendar::with_holidays([date(2025, 6, 16)]);
        let friday = date(2025, 6, 13);
        assert_eq!(cal.add_business_days(friday, 1), date(2025, 6, 17));
        assert_eq!(cal.add_business_days(friday, 5), date(2025, 6, 23));
    }

    #[test]
    fn test_deadline_preserves_time_of_day() {
        let cal = BusinessCalendar::new();
        let notified = Utc.with_ymd_and_hms(2025, 6, 9, 10, 30, 0).unwrap(); // Monday
        let deadline = cal.deadline(notified, 5);
        assert_eq!(deadline, Utc.with_ymd_and_hms(2025, 6, 16, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_is_overdue_boundary() {
        let cal = BusinessCalendar::new();
        let notified = Utc.with_ymd_and_hms(2025, 6, 9, 9, 0, 0).unwrap(); // Monday
        let deadline = Utc.with_ymd_and_hms(2025, 6, 16, 9, 0, 0).unwrap();

        assert!(!cal.is_overdue(notified, 5, deadline - Duration::seconds(1)));
        assert!(cal.is_overdue(notified, 5, deadline));
        assert!(cal.is_overdue(notified, 5, deadline + Duration::days(3)));
    }

    #[test]
    fn test_zero_window_is_immediately_due() {
        let cal = BusinessCalendar::new();
        let notified = Utc.with_ymd_and_hms(2025, 6, 9, 9, 0, 0).unwrap();
        assert!(cal.is_overdue(notified, 0, notified));
    }
}
