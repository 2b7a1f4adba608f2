//! Korea Investment & Securities (KIS) brokerage.
//!
//! A short-lived bearer token is issued per group, used for the price and
//! balance inquiries, and revoked again before `populate` returns, whether
//! the inquiries succeeded or not. Balance inquiries page through the
//! `tr_cont` response header: `F`/`M` mean more pages follow (request again
//! with the returned `CTX_AREA_*` keys and `tr_cont: N`), `D`/`E` mean done.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{read_response, AssetDataSource, SourceError};
use crate::config::KisEnvironment;
use crate::credentials::KisSecrets;
use crate::holdings::discard_manual_units;
use crate::report::{AssetGroup, VenueKind};

pub const KIS_REAL_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";
pub const KIS_PAPER_BASE_URL: &str = "https://openapivts.koreainvestment.com:29443";

const VENUE: &str = "kis";

const TOKEN_PATH: &str = "/oauth2/tokenP";
const REVOKE_PATH: &str = "/oauth2/revokeP";
const DOMESTIC_PRICE_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-price";
const OVERSEAS_PRICE_PATH: &str = "/uapi/overseas-price/v1/quotations/price";
const DOMESTIC_BALANCE_PATH: &str = "/uapi/domestic-stock/v1/trading/inquire-balance";
const OVERSEAS_BALANCE_PATH: &str = "/uapi/overseas-stock/v1/trading/inquire-balance";

mod tr_id {
    pub const DOMESTIC_PRICE: &str = "FHKST01010100";
    pub const OVERSEAS_PRICE: &str = "HHDFS00000300";
    pub const DOMESTIC_BALANCE_REAL: &str = "TTTC8434R";
    pub const DOMESTIC_BALANCE_PAPER: &str = "VTTC8434R";
    pub const OVERSEAS_BALANCE_REAL: &str = "TTTS3012R";
    pub const OVERSEAS_BALANCE_PAPER: &str = "VTTS3012R";
}

/// Where a listed asset trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Market {
    Domestic,
    /// Overseas exchange code as used for night-session quotes.
    Overseas(&'static str),
}

impl Market {
    fn parse(asset_id: &str, market: Option<&str>) -> Result<Self> {
        match market {
            Some("DOM") => Ok(Market::Domestic),
            Some("NYS") => Ok(Market::Overseas("NYS")),
            Some("NAS") => Ok(Market::Overseas("NAS")),
            Some("AMS") => Ok(Market::Overseas("AMS")),
            Some(other) => Err(anyhow!(
                "{asset_id}: market must be one of DOM, NYS, NAS, AMS, got '{other}'"
            )),
            None => Err(anyhow!("{asset_id}: brokerage assets need a market code")),
        }
    }
}

/// Daytime-session exchange code for an overseas exchange.
fn daytime_exchange_code(code: &str) -> Option<&'static str> {
    match code {
        "NYS" => Some("BAY"),
        "NAS" => Some("BAQ"),
        "AMS" => Some("BAA"),
        _ => None,
    }
}

/// Split `CANO-ACNT_PRDT_CD`.
fn split_account_number(group_id: &str, account_number: Option<&str>) -> Result<(String, String)> {
    let account_number = account_number
        .ok_or_else(|| anyhow!("Asset group '{group_id}' needs an accountNumber"))?;
    match account_number.split_once('-') {
        Some((cano, product))
            if !cano.is_empty() && !product.is_empty() && !product.contains('-') =>
        {
            Ok((cano.to_string(), product.to_string()))
        }
        _ => Err(anyhow!(
            "Asset group '{group_id}': accountNumber must be CANO-ACNT_PRDT_CD, got '{}'",
            account_number
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    More,
    Done,
}

fn continuation(headers: &HeaderMap, what: &'static str) -> Result<Continuation, SourceError> {
    let marker = headers
        .get("tr_cont")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .trim();
    match marker {
        "F" | "M" => Ok(Continuation::More),
        "D" | "E" => Ok(Continuation::Done),
        other => Err(SourceError::InvalidContinuation {
            what,
            marker: other.to_string(),
        }),
    }
}

fn check_rt_cd(rt_cd: &str, msg_cd: &str, msg1: &str) -> Result<(), SourceError> {
    if rt_cd == "0" {
        Ok(())
    } else {
        Err(SourceError::Api {
            venue: VENUE,
            code: msg_cd.to_string(),
            message: msg1.trim().to_string(),
        })
    }
}

fn parse_number(what: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("Invalid {what} '{raw}' in KIS response"))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct PriceResponse<T> {
    rt_cd: String,
    #[serde(default)]
    msg_cd: String,
    #[serde(default)]
    msg1: String,
    output: Option<T>,
}

#[derive(Deserialize)]
struct DomesticQuote {
    stck_prpr: String,
}

#[derive(Deserialize)]
struct OverseasQuote {
    #[serde(default)]
    last: String,
}

#[derive(Deserialize)]
struct BalancePage<H> {
    rt_cd: String,
    #[serde(default)]
    msg_cd: String,
    #[serde(default)]
    msg1: String,
    #[serde(default = "Vec::new")]
    output1: Vec<H>,
    #[serde(default, alias = "ctx_area_fk200")]
    ctx_area_fk100: String,
    #[serde(default, alias = "ctx_area_nk200")]
    ctx_area_nk100: String,
}

trait BalanceRow {
    fn symbol(&self) -> &str;
    fn quantity(&self) -> &str;
}

#[derive(Deserialize)]
struct DomesticHolding {
    pdno: String,
    hldg_qty: String,
}

impl BalanceRow for DomesticHolding {
    fn symbol(&self) -> &str {
        &self.pdno
    }

    fn quantity(&self) -> &str {
        &self.hldg_qty
    }
}

#[derive(Deserialize)]
struct OverseasHolding {
    ovrs_pdno: String,
    ovrs_cblc_qty: String,
}

impl BalanceRow for OverseasHolding {
    fn symbol(&self) -> &str {
        &self.ovrs_pdno
    }

    fn quantity(&self) -> &str {
        &self.ovrs_cblc_qty
    }
}

/// Paginated balance inquiry parameters.
struct BalanceQuery<'a> {
    what: &'static str,
    path: &'static str,
    tr_id: &'static str,
    params: Vec<(&'static str, &'a str)>,
    cursor_keys: (&'static str, &'static str),
}

pub struct KisSource {
    client: reqwest::Client,
    base_url: String,
    environment: KisEnvironment,
    secrets: Arc<KisSecrets>,
}

impl KisSource {
    pub fn new(secrets: Arc<KisSecrets>) -> Self {
        Self::with_client(reqwest::Client::new(), secrets)
    }

    pub fn with_client(client: reqwest::Client, secrets: Arc<KisSecrets>) -> Self {
        Self {
            client,
            base_url: KIS_REAL_BASE_URL.to_string(),
            environment: KisEnvironment::Real,
            secrets,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_environment(mut self, environment: KisEnvironment) -> Self {
        self.environment = environment;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn balance_tr_ids(&self) -> (&'static str, &'static str) {
        match self.environment {
            KisEnvironment::Real => (tr_id::DOMESTIC_BALANCE_REAL, tr_id::OVERSEAS_BALANCE_REAL),
            KisEnvironment::Paper => (tr_id::DOMESTIC_BALANCE_PAPER, tr_id::OVERSEAS_BALANCE_PAPER),
        }
    }

    async fn issue_token(&self) -> Result<SecretString> {
        #[derive(Serialize)]
        struct TokenRequest<'a> {
            grant_type: &'a str,
            appkey: &'a str,
            appsecret: &'a str,
        }

        debug!(url = %self.url(TOKEN_PATH), "Requesting KIS access token");
        let response = self
            .client
            .post(self.url(TOKEN_PATH))
            .header("content-type", "application/json; charset=utf-8")
            .json(&TokenRequest {
                grant_type: "client_credentials",
                appkey: self.secrets.app_key.expose_secret(),
                appsecret: self.secrets.app_secret.expose_secret(),
            })
            .send()
            .await?;

        // The body carries the token itself, so only its length is logged.
        let status = response.status();
        let body = response.text().await?;
        debug!(%status, body_len = body.len(), "KIS token response");
        if !status.is_success() {
            return Err(SourceError::Status {
                venue: VENUE,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let token: TokenResponse =
            serde_json::from_str(&body).context("Failed to parse KIS token response")?;
        info!("KIS access token issued");
        Ok(SecretString::from(token.access_token))
    }

    async fn revoke_token(&self, token: &SecretString) -> Result<()> {
        #[derive(Serialize)]
        struct RevokeRequest<'a> {
            appkey: &'a str,
            appsecret: &'a str,
            token: &'a str,
        }

        let response = self
            .client
            .post(self.url(REVOKE_PATH))
            .header("content-type", "application/json; charset=utf-8")
            .json(&RevokeRequest {
                appkey: self.secrets.app_key.expose_secret(),
                appsecret: self.secrets.app_secret.expose_secret(),
                token: token.expose_secret(),
            })
            .send()
            .await?;
        read_response(VENUE, response).await?;
        info!("KIS access token revoked");
        Ok(())
    }

    fn authorized(
        &self,
        request: RequestBuilder,
        token: &SecretString,
        tr_id: &str,
        continued: bool,
    ) -> RequestBuilder {
        request
            .header("content-type", "application/json; charset=utf-8")
            .header("authorization", format!("Bearer {}", token.expose_secret()))
            .header("appkey", self.secrets.app_key.expose_secret())
            .header("appsecret", self.secrets.app_secret.expose_secret())
            .header("tr_id", tr_id)
            .header("custtype", "P")
            .header("tr_cont", if continued { "N" } else { "" })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &SecretString,
        path: &str,
        tr_id: &str,
        continued: bool,
        query: &[(&str, &str)],
    ) -> Result<(HeaderMap, T)> {
        debug!(path, tr_id, ?query, "KIS inquiry");
        let response = self
            .authorized(self.client.get(self.url(path)), token, tr_id, continued)
            .query(query)
            .send()
            .await?;
        let (headers, body) = read_response(VENUE, response).await?;
        let parsed = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse KIS response from {path}"))?;
        Ok((headers, parsed))
    }

    async fn fetch_domestic_price(&self, token: &SecretString, symbol: &str) -> Result<f64> {
        let (_, response): (_, PriceResponse<DomesticQuote>) = self
            .get_json(
                token,
                DOMESTIC_PRICE_PATH,
                tr_id::DOMESTIC_PRICE,
                false,
                &[("fid_cond_mrkt_div_code", "J"), ("fid_input_iscd", symbol)],
            )
            .await?;
        check_rt_cd(&response.rt_cd, &response.msg_cd, &response.msg1)?;

        let quote = response.output.ok_or(SourceError::UnknownAsset {
            venue: VENUE,
            asset: symbol.to_string(),
        })?;
        parse_number("price", &quote.stck_prpr)
    }

    async fn fetch_overseas_quote(
        &self,
        token: &SecretString,
        symbol: &str,
        exchange_code: &str,
    ) -> Result<Option<f64>> {
        let (_, response): (_, PriceResponse<OverseasQuote>) = self
            .get_json(
                token,
                OVERSEAS_PRICE_PATH,
                tr_id::OVERSEAS_PRICE,
                false,
                &[("AUTH", ""), ("EXCD", exchange_code), ("SYMB", symbol)],
            )
            .await?;
        check_rt_cd(&response.rt_cd, &response.msg_cd, &response.msg1)?;

        match response.output {
            Some(quote) if !quote.last.trim().is_empty() => {
                Ok(Some(parse_number("price", &quote.last)?))
            }
            _ => Ok(None),
        }
    }

    /// An empty quote means the symbol is unknown on that session's exchange
    /// code; the daytime code is tried once before giving up.
    async fn fetch_overseas_price(
        &self,
        token: &SecretString,
        symbol: &str,
        exchange_code: &'static str,
    ) -> Result<f64> {
        if let Some(price) = self.fetch_overseas_quote(token, symbol, exchange_code).await? {
            return Ok(price);
        }

        if let Some(daytime) = daytime_exchange_code(exchange_code) {
            debug!(
                symbol,
                exchange_code,
                daytime,
                "Empty quote; retrying with daytime exchange code"
            );
            if let Some(price) = self.fetch_overseas_quote(token, symbol, daytime).await? {
                return Ok(price);
            }
        }

        Err(SourceError::UnknownAsset {
            venue: VENUE,
            asset: symbol.to_string(),
        }
        .into())
    }

    async fn drain_balance<H>(
        &self,
        token: &SecretString,
        query: BalanceQuery<'_>,
    ) -> Result<Vec<(String, f64)>>
    where
        H: DeserializeOwned + BalanceRow,
    {
        let mut rows = Vec::new();
        let mut cursor = (String::new(), String::new());
        let mut continued = false;

        loop {
            let mut params: Vec<(&str, &str)> = query.params.clone();
            params.push((query.cursor_keys.0, cursor.0.as_str()));
            params.push((query.cursor_keys.1, cursor.1.as_str()));

            let (headers, page): (_, BalancePage<H>) = self
                .get_json(token, query.path, query.tr_id, continued, &params)
                .await?;
            check_rt_cd(&page.rt_cd, &page.msg_cd, &page.msg1)?;

            for row in &page.output1 {
                rows.push((
                    row.symbol().trim().to_string(),
                    parse_number("holding quantity", row.quantity())?,
                ));
            }

            match continuation(&headers, query.what)? {
                Continuation::More => {
                    debug!(what = query.what, rows = rows.len(), "More balance pages follow");
                    cursor = (
                        page.ctx_area_fk100.trim().to_string(),
                        page.ctx_area_nk100.trim().to_string(),
                    );
                    continued = true;
                }
                Continuation::Done => break,
            }
        }

        Ok(rows)
    }

    async fn collect(
        &self,
        token: &SecretString,
        account: &(String, String),
        markets: &[(String, Market)],
        group: &mut AssetGroup,
    ) -> Result<()> {
        for (asset_id, market) in markets {
            let price = match market {
                Market::Domestic => self.fetch_domestic_price(token, asset_id).await?,
                Market::Overseas(code) => self.fetch_overseas_price(token, asset_id, *code).await?,
            };
            if let Some(asset) = group.assets.get_mut(asset_id) {
                info!(
                    asset = %asset_id,
                    price,
                    currency = %asset.currency,
                    "Fetched current price"
                );
                asset.price = Some(price);
                asset.holdings = Some(0.0);
            }
        }

        let (domestic_tr_id, overseas_tr_id) = self.balance_tr_ids();
        let mut balances = Vec::new();

        if markets.iter().any(|(_, m)| *m == Market::Domestic) {
            balances.extend(
                self.drain_balance::<DomesticHolding>(
                    token,
                    BalanceQuery {
                        what: "domestic balance",
                        path: DOMESTIC_BALANCE_PATH,
                        tr_id: domestic_tr_id,
                        params: vec![
                            ("CANO", account.0.as_str()),
                            ("ACNT_PRDT_CD", account.1.as_str()),
                            ("AFHR_FLPR_YN", "N"),
                            ("OFL_YN", "N"),
                            ("INQR_DVSN", "02"),
                            ("UNPR_DVSN", "01"),
                            ("FUND_STTL_ICLD_YN", "N"),
                            ("FNCG_AMT_AUTO_RDPT_YN", "N"),
                            ("PRCS_DVSN", "00"),
                        ],
                        cursor_keys: ("CTX_AREA_FK100", "CTX_AREA_NK100"),
                    },
                )
                .await?,
            );
        }

        if markets.iter().any(|(_, m)| matches!(m, Market::Overseas(_))) {
            balances.extend(
                self.drain_balance::<OverseasHolding>(
                    token,
                    BalanceQuery {
                        what: "overseas balance",
                        path: OVERSEAS_BALANCE_PATH,
                        tr_id: overseas_tr_id,
                        params: vec![
                            ("CANO", account.0.as_str()),
                            ("ACNT_PRDT_CD", account.1.as_str()),
                            ("OVRS_EXCG_CD", "NASD"),
                            ("TR_CRCY_CD", "USD"),
                        ],
                        cursor_keys: ("CTX_AREA_FK200", "CTX_AREA_NK200"),
                    },
                )
                .await?,
            );
        }

        for (symbol, quantity) in balances {
            // Holdings the portfolio does not track are not ours to manage.
            let Some(asset) = group.assets.get_mut(&symbol) else {
                continue;
            };
            debug!(asset = %symbol, quantity, "Fetched holdings");
            asset.holdings = Some(quantity);
        }

        Ok(())
    }
}

#[async_trait]
impl AssetDataSource for KisSource {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn kind(&self) -> VenueKind {
        VenueKind::Brokerage
    }

    async fn populate(
        &self,
        group_id: &str,
        group: &mut AssetGroup,
        _exchange_rate: f64,
    ) -> Result<()> {
        let account = split_account_number(group_id, group.account_number.as_deref())?;
        let markets = group
            .assets
            .iter()
            .map(|(asset_id, asset)| {
                let market = Market::parse(asset_id, asset.market.as_deref())?;
                Ok((asset_id.clone(), market))
            })
            .collect::<Result<Vec<_>>>()?;

        for (asset_id, asset) in group.assets.iter_mut() {
            discard_manual_units(VENUE, asset_id, asset);
        }

        let token = self.issue_token().await?;
        let outcome = self.collect(&token, &account, &markets, group).await;
        if let Err(e) = self.revoke_token(&token).await {
            warn!(error = %e, group = %group_id, "Failed to revoke KIS access token");
        }
        outcome.with_context(|| format!("Failed to refresh asset group '{group_id}' from KIS"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_split_account_number() {
        assert_eq!(
            split_account_number("KIS", Some("12345678-01")).unwrap(),
            ("12345678".to_string(), "01".to_string())
        );
        assert!(split_account_number("KIS", Some("1234567801")).is_err());
        assert!(split_account_number("KIS", Some("1-2-3")).is_err());
        assert!(split_account_number("KIS", None).is_err());
    }

    #[test]
    fn test_market_codes() {
        assert_eq!(Market::parse("005930", Some("DOM")).unwrap(), Market::Domestic);
        assert_eq!(Market::parse("SPY", Some("AMS")).unwrap(), Market::Overseas("AMS"));
        assert!(Market::parse("SPY", Some("LSE")).is_err());
        assert!(Market::parse("SPY", None).is_err());
        assert_eq!(daytime_exchange_code("NAS"), Some("BAQ"));
    }

    #[test]
    fn test_continuation_markers() {
        let mut headers = HeaderMap::new();
        for (marker, expected) in [
            ("F", Continuation::More),
            ("M", Continuation::More),
            ("D", Continuation::Done),
            ("E", Continuation::Done),
        ] {
            headers.insert("tr_cont", HeaderValue::from_static(marker));
            assert_eq!(continuation(&headers, "test").unwrap(), expected);
        }

        headers.insert("tr_cont", HeaderValue::from_static("X"));
        assert!(matches!(
            continuation(&headers, "test"),
            Err(SourceError::InvalidContinuation { .. })
        ));
        assert!(continuation(&HeaderMap::new(), "test").is_err());
    }

    #[test]
    fn test_rt_cd_failure_is_api_error() {
        assert!(check_rt_cd("0", "", "").is_ok());
        let err = check_rt_cd("1", "EGW00201", "초당 거래건수를 초과하였습니다. ").unwrap_err();
        assert!(matches!(err, SourceError::Api { ref code, .. } if code == "EGW00201"));
    }

    #[test]
    fn test_parse_overseas_balance_page() {
        let json = r#"{
            "rt_cd": "0", "msg_cd": "KIOK0510", "msg1": "조회가 완료되었습니다",
            "ctx_area_fk200": "12345678^01^NASD^USD^                    ",
            "ctx_area_nk200": "SPY^NYS                                 ",
            "output1": [{"ovrs_pdno": "SPY", "ovrs_cblc_qty": "12"}],
            "output2": {}
        }"#;
        let page: BalancePage<OverseasHolding> = serde_json::from_str(json).unwrap();
        assert_eq!(page.output1[0].symbol(), "SPY");
        assert_eq!(page.ctx_area_nk100.trim(), "SPY^NYS");
    }
}
