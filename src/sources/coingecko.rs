//! CoinGecko crypto prices with a domestic (KRW) premium check.
//!
//! The international price comes from `/simple/price` in USD. Each configured
//! Korean exchange is then asked for its tickers of the same coins; the
//! median of their KRW prices, converted to USD, is the domestic price. The
//! ratio between the two is the premium, warned about above a threshold.
//! Holdings are not visible to CoinGecko and come from the report.

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{read_response, AssetDataSource, SourceError};
use crate::holdings::fold_manual_units;
use crate::report::{AssetGroup, AssetRecord, Currency, VenueKind};

pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";

const VENUE: &str = "coingecko";
const VS_CURRENCY: &str = "usd";
const DOMESTIC_TARGET: &str = "KRW";

#[derive(Debug, Deserialize)]
struct TickersResponse {
    #[serde(default)]
    tickers: Vec<Ticker>,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    base: String,
    target: String,
    last: f64,
}

/// Median of a non-empty slice.
fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
    domestic_exchanges: Vec<String>,
    premium_warning_ratio: f64,
    /// Symbol to CoinGecko id, checked before the built-in table.
    custom_mappings: BTreeMap<String, String>,
}

impl CoinGeckoSource {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: COINGECKO_API_BASE.to_string(),
            domestic_exchanges: ["bithumb", "upbit", "korbit", "coinone"]
                .into_iter()
                .map(String::from)
                .collect(),
            premium_warning_ratio: 1.05,
            custom_mappings: BTreeMap::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_domestic_exchanges(mut self, exchanges: Vec<String>) -> Self {
        self.domestic_exchanges = exchanges;
        self
    }

    pub fn with_premium_warning_ratio(mut self, ratio: f64) -> Self {
        self.premium_warning_ratio = ratio;
        self
    }

    pub fn with_custom_mappings(mut self, mappings: BTreeMap<String, String>) -> Self {
        self.custom_mappings = mappings
            .into_iter()
            .map(|(symbol, id)| (symbol.to_uppercase(), id))
            .collect();
        self
    }

    /// Store the domestic price and premium of `asset`.
    ///
    /// Returns whether the premium was above the warning ratio.
    fn record_premium(
        &self,
        asset_id: &str,
        asset: &mut AssetRecord,
        domestic_krw: f64,
        international_price: f64,
        exchange_rate: f64,
    ) -> bool {
        let price_domestic = Currency::Krw.to_base(domestic_krw, exchange_rate);
        let premium = price_domestic / international_price;
        asset.price_domestic = Some(price_domestic);
        asset.premium = Some(premium);

        let above = premium > self.premium_warning_ratio;
        if above {
            warn!(
                asset = %asset_id,
                premium,
                threshold = self.premium_warning_ratio,
                "Domestic premium above threshold; consider buying on a foreign exchange"
            );
        }
        above
    }

    fn coin_id(&self, symbol: &str) -> Result<String, SourceError> {
        let symbol = symbol.to_uppercase();
        if let Some(id) = self.custom_mappings.get(&symbol) {
            return Ok(id.clone());
        }

        let id = match symbol.as_str() {
            "BTC" => "bitcoin",
            "ETH" => "ethereum",
            "BNB" => "binancecoin",
            "XRP" => "ripple",
            "SOL" => "solana",
            "ADA" => "cardano",
            "DOGE" => "dogecoin",
            "DOT" => "polkadot",
            "AVAX" => "avalanche-2",
            "LINK" => "chainlink",
            "TRX" => "tron",
            "ETC" => "ethereum-classic",
            _ => {
                return Err(SourceError::UnknownAsset {
                    venue: VENUE,
                    asset: symbol,
                })
            }
        };
        Ok(id.to_string())
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?query, "CoinGecko request");
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;
        let (_, body) = read_response(VENUE, response).await?;
        Ok(body)
    }

    /// USD price per symbol.
    async fn fetch_international_prices(
        &self,
        coins: &[(String, String)],
    ) -> Result<HashMap<String, f64>> {
        let ids = coins
            .iter()
            .map(|(_, id)| id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let body = self
            .get("/simple/price", &[("ids", ids.as_str()), ("vs_currencies", VS_CURRENCY)])
            .await?;
        let prices: HashMap<String, HashMap<String, f64>> =
            serde_json::from_str(&body).context("Failed to parse CoinGecko simple price response")?;

        coins
            .iter()
            .map(|(symbol, id)| {
                prices
                    .get(id)
                    .and_then(|quotes| quotes.get(VS_CURRENCY))
                    .map(|price| (symbol.clone(), *price))
                    .ok_or_else(|| {
                        SourceError::UnknownAsset {
                            venue: VENUE,
                            asset: symbol.clone(),
                        }
                        .into()
                    })
            })
            .collect()
    }

    /// KRW last prices per symbol on one exchange.
    async fn fetch_domestic_tickers(
        &self,
        exchange: &str,
        coins: &[(String, String)],
    ) -> Result<Vec<(String, f64)>> {
        let ids = coins
            .iter()
            .map(|(_, id)| id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let body = self
            .get(&format!("/exchanges/{exchange}/tickers"), &[("coin_ids", ids.as_str())])
            .await?;
        let response: TickersResponse = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse CoinGecko tickers for {exchange}"))?;

        let mut prices = Vec::new();
        for ticker in response.tickers {
            if !coins.iter().any(|(symbol, _)| symbol.eq_ignore_ascii_case(&ticker.base)) {
                return Err(anyhow!(
                    "{exchange} returned a ticker for {}, which was not requested",
                    ticker.base
                ));
            }
            if ticker.target != DOMESTIC_TARGET {
                continue;
            }
            prices.push((ticker.base.to_uppercase(), ticker.last));
        }
        Ok(prices)
    }
}

impl Default for CoinGeckoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetDataSource for CoinGeckoSource {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn kind(&self) -> VenueKind {
        VenueKind::Crypto
    }

    async fn populate(
        &self,
        group_id: &str,
        group: &mut AssetGroup,
        exchange_rate: f64,
    ) -> Result<()> {
        for (asset_id, asset) in group.assets.iter_mut() {
            fold_manual_units(asset_id, asset)?;
        }
        if group.assets.is_empty() {
            return Ok(());
        }

        let coins = group
            .assets
            .keys()
            .map(|symbol| Ok((symbol.to_uppercase(), self.coin_id(symbol)?)))
            .collect::<Result<Vec<_>, SourceError>>()?;

        let international = self.fetch_international_prices(&coins).await?;

        let mut domestic: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for exchange in &self.domestic_exchanges {
            for (symbol, price) in self.fetch_domestic_tickers(exchange, &coins).await? {
                domestic.entry(symbol).or_default().push(price);
            }
        }

        for (asset_id, asset) in group.assets.iter_mut() {
            let symbol = asset_id.to_uppercase();
            let international_price = international.get(&symbol).copied().ok_or_else(|| {
                SourceError::UnknownAsset {
                    venue: VENUE,
                    asset: asset_id.clone(),
                }
            })?;
            let domestic_krw = domestic.get(&symbol).and_then(|prices| median(prices));

            asset.price = Some(match asset.currency {
                Currency::Usd => international_price,
                Currency::Krw => domestic_krw
                    .unwrap_or_else(|| Currency::Krw.from_base(international_price, exchange_rate)),
            });

            match domestic_krw {
                Some(krw) => {
                    self.record_premium(asset_id, asset, krw, international_price, exchange_rate);
                }
                None => {
                    warn!(
                        group = %group_id,
                        asset = %asset_id,
                        "No domestic KRW tickers; premium not computed"
                    );
                }
            }

            info!(
                asset = %asset_id,
                price = ?asset.price,
                price_domestic = ?asset.price_domestic,
                "Fetched crypto prices"
            );
        }

        Ok(())
    }
}
