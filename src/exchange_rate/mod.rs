//! Daily base/secondary exchange rate lookup.
//!
//! Sources answer for one calendar date at a time and may have nothing for a
//! date that is not published yet (the current day before the morning
//! cutoff, weekends, holidays). [`RateResolver`] walks backwards day by day
//! from today until a rate turns up, within a bounded window.

mod koreaexim;

pub use koreaexim::{KoreaEximRateSource, KOREAEXIM_API_BASE, KOREAEXIM_DATA_CODE};

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::report::Currency;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeRateError {
    #[error("no {currency} rate listed for {date}")]
    NotFound { currency: Currency, date: NaiveDate },

    #[error("exchange rate '{raw}' is not a positive number")]
    Unparseable { raw: String },

    #[error("exchange rate source returned error code {code} for {date}")]
    Rejected { code: i64, date: NaiveDate },

    #[error("no exchange rate published within {days} days before {from}")]
    NoDataWithin { days: u32, from: NaiveDate },
}

/// A provider of daily rates, quoted as secondary-currency units per one unit of `currency`.
#[async_trait::async_trait]
pub trait ExchangeRateSource: Send + Sync {
    /// Rate for exactly `date`.
    ///
    /// `Ok(None)` means the source has published nothing for that date yet;
    /// any other failure is an error.
    async fn fetch_rate(&self, currency: Currency, date: NaiveDate) -> Result<Option<f64>>;

    fn name(&self) -> &str;
}

/// A rate together with the date it was published for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRate {
    pub rate: f64,
    pub date: NaiveDate,
}

pub struct RateResolver {
    source: Arc<dyn ExchangeRateSource>,
    clock: Arc<dyn Clock>,
    max_lookback_days: u32,
}

impl RateResolver {
    pub fn new(
        source: Arc<dyn ExchangeRateSource>,
        clock: Arc<dyn Clock>,
        max_lookback_days: u32,
    ) -> Self {
        Self {
            source,
            clock,
            max_lookback_days,
        }
    }

    /// Most recent rate for `currency` as of today in the market timezone.
    pub async fn resolve(&self, currency: Currency) -> Result<ResolvedRate> {
        self.resolve_on(currency, self.clock.market_today()).await
    }

    /// Most recent rate published on or before `date`.
    pub async fn resolve_on(&self, currency: Currency, date: NaiveDate) -> Result<ResolvedRate> {
        for offset in 0..=self.max_lookback_days {
            let query_date = date - Duration::days(i64::from(offset));
            match self.source.fetch_rate(currency, query_date).await? {
                Some(rate) => {
                    info!(
                        source = self.source.name(),
                        currency = %currency,
                        date = %query_date,
                        rate,
                        "Resolved exchange rate"
                    );
                    return Ok(ResolvedRate {
                        rate,
                        date: query_date,
                    });
                }
                None => {
                    debug!(
                        source = self.source.name(),
                        date = %query_date,
                        "No exchange rate published; trying the previous day"
                    );
                }
            }
        }

        Err(ExchangeRateError::NoDataWithin {
            days: self.max_lookback_days,
            from: date,
        }
        .into())
    }
}

/// Parse a published rate such as `"1,320.5"`.
pub(crate) fn parse_rate(raw: &str) -> Result<f64, ExchangeRateError> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    match cleaned.trim().parse::<f64>() {
        Ok(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
        _ => Err(ExchangeRateError::Unparseable {
            raw: raw.to_string(),
        }),
    }
}
