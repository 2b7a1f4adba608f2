//! Exchange trading days.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// A session calendar: weekdays minus configured exchange holidays.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_session(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Sessions in `[from, to]`, oldest first.
    pub fn sessions_in_range(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        from.iter_days()
            .take_while(|date| *date <= to)
            .filter(|date| self.is_session(*date))
            .collect()
    }

    /// Sessions within the last `window_days` days up to and including `today`.
    pub fn recent_sessions(&self, today: NaiveDate, window_days: u32) -> Vec<NaiveDate> {
        self.sessions_in_range(today - Duration::days(i64::from(window_days)), today)
    }
}
