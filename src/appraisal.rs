//! Market valuation of holdings in base currency.

use crate::report::{self, AssetRecord, Report, ReportError};

/// Derive `appraisement` (base currency) and `appraisementInSecondary` for one asset.
///
/// Requires fresh `price` and `holdings`; both must be non-negative.
pub fn derive_appraisement(
    asset_id: &str,
    asset: &mut AssetRecord,
    exchange_rate: f64,
) -> Result<f64, ReportError> {
    report::check_exchange_rate(exchange_rate)?;
    let price = report::require(asset_id, "price", asset.price)?;
    let holdings = report::require(asset_id, "holdings", asset.holdings)?;
    report::non_negative(asset_id, "price", Some(price))?;
    report::non_negative(asset_id, "holdings", Some(holdings))?;

    let appraisement = asset.currency.to_base(holdings * price, exchange_rate);
    asset.appraisement = Some(appraisement);
    asset.appraisement_in_secondary = Some(appraisement * exchange_rate);
    Ok(appraisement)
}

/// Sum of every asset's appraisement, cached on the report.
///
/// Once `totalAppraisement` is present it is returned as-is, so calling this
/// repeatedly never double counts.
pub fn derive_total_appraisement(report: &mut Report) -> Result<f64, ReportError> {
    if let Some(total) = report.total_appraisement {
        return Ok(total);
    }

    let mut total = 0.0;
    for (_, asset_id, asset) in report.assets() {
        total += report::require(asset_id, "appraisement", asset.appraisement)?;
    }

    report.total_appraisement = Some(total);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{AssetGroup, Currency, Strategy};

    #[test]
    fn test_base_currency_appraisement_is_unconverted() {
        let mut asset = AssetRecord::new(Currency::Usd, 1.0)
            .with_price(250.0)
            .with_holdings(4.0);

        let value = derive_appraisement("SPY", &mut asset, 1300.0).unwrap();
        assert_eq!(value, 1000.0);
        assert_eq!(asset.appraisement, Some(1000.0));
        assert_eq!(asset.appraisement_in_secondary, Some(1_300_000.0));
    }

    #[test]
    fn test_secondary_currency_appraisement_is_converted() {
        let mut asset = AssetRecord::new(Currency::Krw, 1.0)
            .with_price(65_000.0)
            .with_holdings(10.0);

        let value = derive_appraisement("069500", &mut asset, 1300.0).unwrap();
        assert!((value - 500.0).abs() < 1e-9);
        assert!((asset.appraisement_in_secondary.unwrap() - 650_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_negative_inputs_fail() {
        let mut asset = AssetRecord::new(Currency::Usd, 1.0)
            .with_price(-1.0)
            .with_holdings(4.0);
        assert!(derive_appraisement("SPY", &mut asset, 1300.0).is_err());

        let mut asset = AssetRecord::new(Currency::Usd, 1.0)
            .with_price(1.0)
            .with_holdings(-4.0);
        assert!(derive_appraisement("SPY", &mut asset, 1300.0).is_err());
    }

    #[test]
    fn test_missing_price_fails() {
        let mut asset = AssetRecord::new(Currency::Usd, 1.0).with_holdings(4.0);
        assert_eq!(
            derive_appraisement("SPY", &mut asset, 1300.0),
            Err(ReportError::MissingField {
                asset: "SPY".to_string(),
                field: "price",
            })
        );
    }

    #[test]
    fn test_total_is_cached_and_idempotent() {
        let mut spy = AssetRecord::new(Currency::Usd, 0.5);
        spy.appraisement = Some(600.0);
        let mut gld = AssetRecord::new(Currency::Krw, 0.5);
        gld.appraisement = Some(400.0);

        let mut report = Report::new(Strategy::CostAveraging)
            .with_group("KIS", AssetGroup::new().with_asset("SPY", spy))
            .with_group("KRX", AssetGroup::new().with_asset("GLD", gld));

        assert_eq!(derive_total_appraisement(&mut report).unwrap(), 1000.0);
        assert_eq!(derive_total_appraisement(&mut report).unwrap(), 1000.0);
        assert_eq!(report.total_appraisement, Some(1000.0));
    }

    #[test]
    fn test_existing_total_is_not_recomputed() {
        let mut asset = AssetRecord::new(Currency::Usd, 1.0);
        asset.appraisement = Some(10.0);
        let mut report = Report::new(Strategy::CostAveraging)
            .with_group("Bank", AssetGroup::new().with_asset("CASH", asset));
        report.total_appraisement = Some(99.0);

        assert_eq!(derive_total_appraisement(&mut report).unwrap(), 99.0);
    }
}
