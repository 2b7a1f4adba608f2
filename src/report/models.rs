use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Rebalancing discipline, fixed per portfolio and carried between reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Cost averaging: every period invests `saving * weight`.
    #[serde(rename = "CA")]
    CostAveraging,
    /// Value averaging: every period closes the gap to the cumulative CA target.
    #[serde(rename = "VA")]
    ValueAveraging,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::CostAveraging => f.write_str("CA"),
            Strategy::ValueAveraging => f.write_str("VA"),
        }
    }
}

/// Currency an asset is quoted in.
///
/// USD is the base currency every report total is expressed in; KRW is the
/// secondary currency converted through the report's exchange rate
/// (KRW per USD).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "KRW")]
    Krw,
}

impl Currency {
    pub const BASE: Currency = Currency::Usd;
    pub const SECONDARY: Currency = Currency::Krw;

    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Krw => "KRW",
        }
    }

    pub fn is_base(self) -> bool {
        self == Self::BASE
    }

    /// Convert an amount quoted in `self` into the base currency.
    pub fn to_base(self, amount: f64, exchange_rate: f64) -> f64 {
        match self {
            Currency::Usd => amount,
            Currency::Krw => amount / exchange_rate,
        }
    }

    /// Convert a base-currency amount into `self`.
    pub fn from_base(self, amount: f64, exchange_rate: f64) -> f64 {
        match self {
            Currency::Usd => amount,
            Currency::Krw => amount * exchange_rate,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The kind of venue an asset group is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueKind {
    /// Domestic/overseas brokerage account (KIS).
    Brokerage,
    /// Crypto price aggregator (CoinGecko).
    Crypto,
    /// Commodity exchange price feed (KRX).
    Commodity,
    /// No remote data; everything is declared in the report.
    Manual,
}

impl VenueKind {
    /// Venue implied by a conventional group id when the group does not name one.
    pub fn for_group_id(group_id: &str) -> Self {
        match group_id {
            "KIS" => VenueKind::Brokerage,
            "CoinGecko" => VenueKind::Crypto,
            "KRX" => VenueKind::Commodity,
            _ => VenueKind::Manual,
        }
    }

    /// Crypto can be bought in fractions; everything else trades in whole units.
    pub fn allows_fractional_units(self) -> bool {
        matches!(self, VenueKind::Crypto)
    }
}

impl fmt::Display for VenueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VenueKind::Brokerage => "brokerage",
            VenueKind::Crypto => "crypto",
            VenueKind::Commodity => "commodity",
            VenueKind::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Purchasable quantity recommended for this period.
///
/// Whole-lot assets serialize as integers, fractional assets as floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Units {
    Whole(i64),
    Fractional(f64),
}

impl Units {
    pub fn as_f64(self) -> f64 {
        match self {
            Units::Whole(units) => units as f64,
            Units::Fractional(units) => units,
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::Whole(units) => write!(f, "{units}"),
            Units::Fractional(units) => write!(f, "{units}"),
        }
    }
}

/// One asset inside a group.
///
/// Fields are filled in stage by stage while a report is derived; an absent
/// field means the stage that owns it has not run (or the asset is in its
/// first generation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub currency: Currency,

    /// Brokerage market code (DOM, NYS, NAS, AMS).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,

    /// Target allocation fraction.
    pub weight: f64,

    /// Latest unit price in `currency`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holdings: Option<f64>,

    /// Units bought by hand since the last report, folded into `holdings`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_invested_in_units: Option<f64>,

    /// Cumulative amount actually invested, in base currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invested: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invested_in_base: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invested_in_secondary: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appraisement: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appraisement_in_secondary: Option<f64>,

    /// Median domestic-exchange price converted to base currency (crypto only).
    #[serde(default, alias = "priceROK", skip_serializing_if = "Option::is_none")]
    pub price_domestic: Option<f64>,

    /// `price_domestic / price` (crypto only).
    #[serde(default, alias = "kimchi", skip_serializing_if = "Option::is_none")]
    pub premium: Option<f64>,

    #[serde(
        default,
        rename = "need2investCA",
        skip_serializing_if = "Option::is_none"
    )]
    pub need2invest_ca: Option<f64>,

    #[serde(
        default,
        rename = "need2investVA",
        skip_serializing_if = "Option::is_none"
    )]
    pub need2invest_va: Option<f64>,

    #[serde(
        default,
        rename = "need2invest",
        skip_serializing_if = "Option::is_none"
    )]
    pub need2invest: Option<f64>,

    #[serde(
        default,
        rename = "need2investInUnits",
        skip_serializing_if = "Option::is_none"
    )]
    pub need2invest_in_units: Option<Units>,

    /// Running total of CA-recommended investment across all reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cum_sum_ca_invested: Option<f64>,

    /// Running total of (planned - actual) investment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cum_inv_deviation: Option<f64>,
}

impl AssetRecord {
    pub fn new(currency: Currency, weight: f64) -> Self {
        Self {
            currency,
            market: None,
            weight,
            price: None,
            holdings: None,
            actual_invested_in_units: None,
            invested: None,
            invested_in_base: None,
            invested_in_secondary: None,
            appraisement: None,
            appraisement_in_secondary: None,
            price_domestic: None,
            premium: None,
            need2invest_ca: None,
            need2invest_va: None,
            need2invest: None,
            need2invest_in_units: None,
            cum_sum_ca_invested: None,
            cum_inv_deviation: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_holdings(mut self, holdings: f64) -> Self {
        self.holdings = Some(holdings);
        self
    }

    pub fn with_market(mut self, market: impl Into<String>) -> Self {
        self.market = Some(market.into());
        self
    }

    /// Start the next generation of this record.
    ///
    /// Only persistent inputs survive; everything a stage derives is cleared
    /// so it can never leak from the reference into the new report.
    pub fn carry_forward(&self) -> Self {
        Self {
            currency: self.currency,
            market: self.market.clone(),
            weight: self.weight,
            price: self.price,
            holdings: self.holdings,
            actual_invested_in_units: self.actual_invested_in_units,
            invested: self.invested,
            invested_in_base: self.invested_in_base,
            invested_in_secondary: self.invested_in_secondary,
            cum_sum_ca_invested: self.cum_sum_ca_invested,
            cum_inv_deviation: self.cum_inv_deviation,
            ..Self::new(self.currency, self.weight)
        }
    }
}

/// Assets fetched from a single venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetGroup {
    /// Brokerage account in `CANO-ACNT_PRDT_CD` form.
    #[serde(default, alias = "accountNo", skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,

    /// Explicit venue; when absent it is implied by the group id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<VenueKind>,

    #[serde(alias = "stocks")]
    pub assets: BTreeMap<String, AssetRecord>,
}

impl AssetGroup {
    pub fn new() -> Self {
        Self {
            account_number: None,
            venue: None,
            assets: BTreeMap::new(),
        }
    }

    pub fn with_asset(mut self, asset_id: impl Into<String>, asset: AssetRecord) -> Self {
        self.assets.insert(asset_id.into(), asset);
        self
    }

    pub fn with_account_number(mut self, account_number: impl Into<String>) -> Self {
        self.account_number = Some(account_number.into());
        self
    }

    pub fn carry_forward(&self) -> Self {
        Self {
            account_number: self.account_number.clone(),
            venue: self.venue,
            assets: self
                .assets
                .iter()
                .map(|(id, asset)| (id.clone(), asset.carry_forward()))
                .collect(),
        }
    }
}

impl Default for AssetGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// A full point-in-time portfolio snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub strategy: Strategy,

    /// Contribution for this period, in base currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saving: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saving_in_base: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saving_in_secondary: Option<f64>,

    /// KRW per USD, frozen when the report was produced.
    #[serde(default, alias = "exchange_rate", skip_serializing_if = "Option::is_none")]
    pub exchange_rate: Option<f64>,

    /// Cached sum of all appraisements; computed once.
    #[serde(
        default,
        alias = "total_appraisement",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_appraisement: Option<f64>,

    #[serde(alias = "stockgroups")]
    pub asset_groups: BTreeMap<String, AssetGroup>,
}

impl Report {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            saving: None,
            saving_in_base: None,
            saving_in_secondary: None,
            exchange_rate: None,
            total_appraisement: None,
            asset_groups: BTreeMap::new(),
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>, group: AssetGroup) -> Self {
        self.asset_groups.insert(group_id.into(), group);
        self
    }

    /// Iterate over `(group_id, asset_id, asset)` in key order.
    pub fn assets(&self) -> impl Iterator<Item = (&str, &str, &AssetRecord)> {
        self.asset_groups.iter().flat_map(|(group_id, group)| {
            group
                .assets
                .iter()
                .map(move |(asset_id, asset)| (group_id.as_str(), asset_id.as_str(), asset))
        })
    }

    pub fn assets_mut(&mut self) -> impl Iterator<Item = (&str, &str, &mut AssetRecord)> {
        self.asset_groups.iter_mut().flat_map(|(group_id, group)| {
            group
                .assets
                .iter_mut()
                .map(move |(asset_id, asset)| (group_id.as_str(), asset_id.as_str(), asset))
        })
    }

    pub fn asset(&self, group_id: &str, asset_id: &str) -> Option<&AssetRecord> {
        self.asset_groups
            .get(group_id)
            .and_then(|group| group.assets.get(asset_id))
    }

    pub fn weight_sum(&self) -> f64 {
        self.assets().map(|(_, _, asset)| asset.weight).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_reads_camel_case_keys() {
        let json = r#"{
            "strategy": "VA",
            "exchangeRate": 1300.0,
            "assetGroups": {
                "KIS": {
                    "accountNumber": "12345678-01",
                    "assets": {
                        "SPY": {
                            "currency": "USD",
                            "market": "AMS",
                            "weight": 1.0,
                            "need2investCA": 10.0
                        }
                    }
                }
            }
        }"#;

        let report: Report = serde_json::from_str(json).unwrap();
        assert_eq!(report.strategy, Strategy::ValueAveraging);
        assert_eq!(report.exchange_rate, Some(1300.0));
        let spy = report.asset("KIS", "SPY").unwrap();
        assert_eq!(spy.currency, Currency::Usd);
        assert_eq!(spy.market.as_deref(), Some("AMS"));
        assert_eq!(spy.need2invest_ca, Some(10.0));
        assert_eq!(
            report.asset_groups["KIS"].account_number.as_deref(),
            Some("12345678-01")
        );
    }

    #[test]
    fn test_report_reads_legacy_keys() {
        let json = r#"{
            "strategy": "CA",
            "exchange_rate": 1250.5,
            "total_appraisement": 42.0,
            "stockgroups": {
                "CoinGecko": {
                    "accountNo": "n/a",
                    "stocks": {
                        "BTC": {
                            "currency": "USD",
                            "weight": 1.0,
                            "priceROK": 30100.0,
                            "kimchi": 1.01
                        }
                    }
                }
            }
        }"#;

        let report: Report = serde_json::from_str(json).unwrap();
        assert_eq!(report.exchange_rate, Some(1250.5));
        assert_eq!(report.total_appraisement, Some(42.0));
        let btc = report.asset("CoinGecko", "BTC").unwrap();
        assert_eq!(btc.price_domestic, Some(30100.0));
        assert_eq!(btc.premium, Some(1.01));
    }

    #[test]
    fn test_unsupported_currency_rejected() {
        let json = r#"{"currency": "EUR", "weight": 1.0}"#;
        assert!(serde_json::from_str::<AssetRecord>(json).is_err());
    }

    #[test]
    fn test_unsupported_strategy_rejected() {
        let json = r#"{"strategy": "DCA", "assetGroups": {}}"#;
        assert!(serde_json::from_str::<Report>(json).is_err());
    }

    #[test]
    fn test_absent_fields_are_not_serialized() {
        let asset = AssetRecord::new(Currency::Krw, 0.5).with_price(100.0);
        let json = serde_json::to_value(&asset).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["currency"], "KRW");
        assert_eq!(object["price"], 100.0);
    }

    #[test]
    fn test_units_serialize_by_kind() {
        assert_eq!(serde_json::to_string(&Units::Whole(4)).unwrap(), "4");
        assert_eq!(serde_json::to_string(&Units::Fractional(4.5)).unwrap(), "4.5");
        assert_eq!(serde_json::from_str::<Units>("4").unwrap(), Units::Whole(4));
        assert_eq!(
            serde_json::from_str::<Units>("0.25").unwrap(),
            Units::Fractional(0.25)
        );
    }

    #[test]
    fn test_carry_forward_drops_derived_fields() {
        let mut asset = AssetRecord::new(Currency::Usd, 0.3)
            .with_price(10.0)
            .with_holdings(3.0);
        asset.invested = Some(25.0);
        asset.appraisement = Some(30.0);
        asset.need2invest = Some(12.0);
        asset.need2invest_ca = Some(12.0);
        asset.need2invest_in_units = Some(Units::Whole(1));
        asset.premium = Some(1.02);
        asset.cum_sum_ca_invested = Some(40.0);
        asset.cum_inv_deviation = Some(-2.0);

        let next = asset.carry_forward();
        assert_eq!(next.price, Some(10.0));
        assert_eq!(next.holdings, Some(3.0));
        assert_eq!(next.invested, Some(25.0));
        assert_eq!(next.cum_sum_ca_invested, Some(40.0));
        assert_eq!(next.cum_inv_deviation, Some(-2.0));
        assert_eq!(next.appraisement, None);
        assert_eq!(next.need2invest, None);
        assert_eq!(next.need2invest_ca, None);
        assert_eq!(next.need2invest_in_units, None);
        assert_eq!(next.premium, None);
    }

    #[test]
    fn test_currency_conversion() {
        assert_eq!(Currency::Krw.to_base(130_000.0, 1300.0), 100.0);
        assert_eq!(Currency::Usd.to_base(100.0, 1300.0), 100.0);
        assert_eq!(Currency::Krw.from_base(100.0, 1300.0), 130_000.0);
    }

    #[test]
    fn test_venue_for_conventional_group_ids() {
        assert_eq!(VenueKind::for_group_id("KIS"), VenueKind::Brokerage);
        assert_eq!(VenueKind::for_group_id("CoinGecko"), VenueKind::Crypto);
        assert_eq!(VenueKind::for_group_id("KRX"), VenueKind::Commodity);
        assert_eq!(VenueKind::for_group_id("Bank"), VenueKind::Manual);
        assert!(VenueKind::Crypto.allows_fractional_units());
        assert!(!VenueKind::Brokerage.allows_fractional_units());
    }
}
