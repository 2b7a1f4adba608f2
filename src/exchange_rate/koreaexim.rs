//! Korea Eximbank daily exchange rates.
//!
//! `GET {base}?authkey=..&searchdate=YYYYMMDD&data=AP01` returns a JSON array
//! with one record per currency. The array is empty for dates without a
//! publication (weekends, holidays, and today before roughly 11:00 KST).

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use super::{parse_rate, ExchangeRateError, ExchangeRateSource};
use crate::credentials::ExchangeRateSecrets;
use crate::report::Currency;

pub const KOREAEXIM_API_BASE: &str =
    "https://www.koreaexim.go.kr/site/program/financial/exchangeJSON";
pub const KOREAEXIM_DATA_CODE: &str = "AP01";

#[derive(Debug, Deserialize)]
struct RateRecord {
    /// 1 on success; 2 bad data code, 3 bad auth key, 4 daily quota exhausted.
    result: i64,
    #[serde(default)]
    cur_unit: String,
    /// Standard dealing rate, formatted with thousands separators.
    #[serde(default)]
    deal_bas_r: String,
}

pub struct KoreaEximRateSource {
    client: reqwest::Client,
    base_url: String,
    data_code: String,
    secrets: Arc<ExchangeRateSecrets>,
}

impl KoreaEximRateSource {
    pub fn new(secrets: Arc<ExchangeRateSecrets>) -> Self {
        Self::with_client(reqwest::Client::new(), secrets)
    }

    pub fn with_client(client: reqwest::Client, secrets: Arc<ExchangeRateSecrets>) -> Self {
        Self {
            client,
            base_url: KOREAEXIM_API_BASE.to_string(),
            data_code: KOREAEXIM_DATA_CODE.to_string(),
            secrets,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_data_code(mut self, data_code: impl Into<String>) -> Self {
        self.data_code = data_code.into();
        self
    }

    async fn fetch_records(&self, date: NaiveDate) -> Result<Vec<RateRecord>> {
        let search_date = date.format("%Y%m%d").to_string();
        debug!(url = %self.base_url, searchdate = %search_date, "Querying exchange rates");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("authkey", self.secrets.auth_key.expose_secret()),
                ("searchdate", search_date.as_str()),
                ("data", self.data_code.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Korea Eximbank response body")?;
        debug!(%status, body = %body, "Exchange rate response");
        if !status.is_success() {
            return Err(anyhow!("Korea Eximbank API error: {status} - {body}"));
        }

        // An unpublished date comes back as an empty body on some days.
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl ExchangeRateSource for KoreaEximRateSource {
    async fn fetch_rate(&self, currency: Currency, date: NaiveDate) -> Result<Option<f64>> {
        let records = self.fetch_records(date).await?;
        if records.is_empty() {
            return Ok(None);
        }

        if let Some(record) = records.iter().find(|r| r.result != 1) {
            return Err(ExchangeRateError::Rejected {
                code: record.result,
                date,
            }
            .into());
        }

        let record = records
            .iter()
            .rev()
            .find(|r| r.cur_unit == currency.code())
            .ok_or(ExchangeRateError::NotFound { currency, date })?;

        Ok(Some(parse_rate(&record.deal_bas_r)?))
    }

    fn name(&self) -> &str {
        "koreaexim"
    }
}
