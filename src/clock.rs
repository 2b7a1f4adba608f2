use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

/// Timezone every venue (and the exchange-rate publisher) dates its data in.
pub const MARKET_TZ: Tz = chrono_tz::Asia::Seoul;

/// Abstraction over "current time" so date-dependent lookups are deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar date in the market timezone.
    fn market_today(&self) -> NaiveDate {
        self.now().with_timezone(&MARKET_TZ).date_naive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_market_date_rolls_over_before_utc() {
        // 16:30 UTC is already 01:30 the next day in Seoul.
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 16, 30, 0).unwrap());
        assert_eq!(
            clock.market_today(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }
}
