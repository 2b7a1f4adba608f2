//! KRX (Korea Exchange) commodity prices.
//!
//! Prices are only offered as a CSV download: a one-time code (OTP) is first
//! generated for an issue and a window of trading days, then exchanged for
//! the CSV, newest day first and EUC-KR encoded. Only the most recent close
//! is kept. Holdings come from the report.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use super::{read_response, AssetDataSource, SourceError};
use crate::calendar::TradingCalendar;
use crate::clock::Clock;
use crate::holdings::fold_manual_units;
use crate::report::{AssetGroup, VenueKind};

pub const KRX_OTP_URL: &str = "http://data.krx.co.kr/comm/fileDn/GenerateOTP/generate.cmd";
pub const KRX_DOWNLOAD_URL: &str = "http://data.krx.co.kr/comm/fileDn/download_csv/download.cmd";

const VENUE: &str = "krx";
const CLOSE_COLUMN: &str = "종가";
/// Daily price statistics screen for a single issue.
const PRICE_SCREEN: &str = "dbms/MDC/STAT/standard/MDCSTAT15001";

/// Most recent close in a KRX price CSV, or `None` if it has no rows.
fn parse_latest_close(csv_text: &str) -> Result<Option<f64>> {
    let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
    let column = reader
        .headers()?
        .iter()
        .position(|header| header.trim() == CLOSE_COLUMN)
        .ok_or_else(|| anyhow!("KRX price CSV has no {CLOSE_COLUMN} column"))?;

    // Rows are newest first; shortly after midnight there can be two.
    let Some(record) = reader.records().next() else {
        return Ok(None);
    };
    let record = record?;
    let raw = record
        .get(column)
        .ok_or_else(|| anyhow!("KRX price CSV row is missing the {CLOSE_COLUMN} value"))?;
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    let close = cleaned
        .trim()
        .parse::<f64>()
        .with_context(|| format!("Invalid close price '{raw}' in KRX CSV"))?;
    Ok(Some(close))
}

pub struct KrxSource {
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    otp_url: String,
    download_url: String,
    calendar: TradingCalendar,
    lookup_window_days: u32,
    /// Asset id to KRX issue code.
    issue_codes: BTreeMap<String, String>,
}

impl KrxSource {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_client(reqwest::Client::new(), clock)
    }

    pub fn with_client(client: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            clock,
            otp_url: KRX_OTP_URL.to_string(),
            download_url: KRX_DOWNLOAD_URL.to_string(),
            calendar: TradingCalendar::default(),
            lookup_window_days: 10,
            issue_codes: BTreeMap::from([("GLD".to_string(), "KRD040200002".to_string())]),
        }
    }

    pub fn with_urls(
        mut self,
        otp_url: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Self {
        self.otp_url = otp_url.into();
        self.download_url = download_url.into();
        self
    }

    pub fn with_calendar(mut self, calendar: TradingCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_lookup_window_days(mut self, days: u32) -> Self {
        self.lookup_window_days = days;
        self
    }

    pub fn with_issue_codes(mut self, issue_codes: BTreeMap<String, String>) -> Self {
        self.issue_codes = issue_codes;
        self
    }

    async fn generate_otp(
        &self,
        issue_code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<String> {
        let from = from.format("%Y%m%d").to_string();
        let to = to.format("%Y%m%d").to_string();
        let form = [
            ("locale", "en_US"),
            ("isuCd", issue_code),
            ("strtDd", from.as_str()),
            ("endDd", to.as_str()),
            ("share", "1"),
            ("money", "1"),
            ("csvxls_isNo", "false"),
            ("name", "fileDown"),
            ("url", PRICE_SCREEN),
        ];
        debug!(url = %self.otp_url, ?form, "Requesting KRX download code");

        let response = self.client.post(&self.otp_url).form(&form).send().await?;
        let (_, body) = read_response(VENUE, response).await?;
        let otp = body.trim();
        if otp.is_empty() {
            return Err(anyhow!("KRX returned an empty download code for {issue_code}"));
        }
        Ok(otp.to_string())
    }

    async fn download_csv(&self, otp: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.download_url)
            .header("referer", &self.otp_url)
            .form(&[("code", otp)])
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let (text, _, had_errors) = encoding_rs::EUC_KR.decode(&bytes);
        debug!(%status, body = %text, "KRX CSV response");
        if !status.is_success() {
            return Err(SourceError::Status {
                venue: VENUE,
                status: status.as_u16(),
                body: text.into_owned(),
            }
            .into());
        }
        if had_errors {
            return Err(anyhow!("KRX price CSV is not valid EUC-KR"));
        }
        Ok(text.into_owned())
    }
}

#[async_trait]
impl AssetDataSource for KrxSource {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn kind(&self) -> VenueKind {
        VenueKind::Commodity
    }

    async fn populate(
        &self,
        group_id: &str,
        group: &mut AssetGroup,
        _exchange_rate: f64,
    ) -> Result<()> {
        for (asset_id, asset) in group.assets.iter_mut() {
            fold_manual_units(asset_id, asset)?;
        }
        if group.assets.is_empty() {
            return Ok(());
        }

        let today = self.clock.market_today();
        let sessions = self.calendar.recent_sessions(today, self.lookup_window_days);
        let (Some(first), Some(last)) = (sessions.first().copied(), sessions.last().copied()) else {
            return Err(anyhow!(
                "No KRX trading day within {} days before {today}",
                self.lookup_window_days
            ));
        };

        for (asset_id, asset) in group.assets.iter_mut() {
            let issue_code =
                self.issue_codes
                    .get(asset_id)
                    .ok_or_else(|| SourceError::UnknownAsset {
                        venue: VENUE,
                        asset: asset_id.clone(),
                    })?;

            let otp = self.generate_otp(issue_code, first, last).await?;
            let csv_text = self.download_csv(&otp).await?;
            let close = parse_latest_close(&csv_text)?.ok_or_else(|| {
                anyhow!("KRX returned no prices for {asset_id} between {first} and {last}")
            })?;

            info!(
                group = %group_id,
                asset = %asset_id,
                price = close,
                currency = %asset.currency,
                "Fetched current price"
            );
            asset.price = Some(close);
        }

        Ok(())
    }
}
