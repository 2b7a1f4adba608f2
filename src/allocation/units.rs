use crate::report::{self, AssetRecord, ReportError, Units};

/// Convert `need2invest` (base currency) into a purchasable quantity.
///
/// The unit price is taken in base currency (`price / exchange_rate` for
/// secondary-currency assets). Fractional venues keep the exact quotient;
/// everything else is rounded to the nearest whole unit.
pub fn quantize_units(
    asset_id: &str,
    asset: &mut AssetRecord,
    exchange_rate: f64,
    fractional: bool,
) -> Result<Units, ReportError> {
    report::check_exchange_rate(exchange_rate)?;
    let amount = report::require(asset_id, "need2invest", asset.need2invest)?;
    let price = report::require(asset_id, "price", asset.price)?;
    if price.is_nan() || price <= 0.0 {
        return Err(ReportError::NonPositivePrice {
            asset: asset_id.to_string(),
            price,
        });
    }

    let unit_price = asset.currency.to_base(price, exchange_rate);
    let quantity = amount / unit_price;

    let units = if fractional {
        Units::Fractional(quantity)
    } else {
        Units::Whole(quantity.round() as i64)
    };

    asset.need2invest_in_units = Some(units);
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Currency;

    fn asset(currency: Currency, price: f64, need2invest: f64) -> AssetRecord {
        let mut asset = AssetRecord::new(currency, 1.0).with_price(price);
        asset.need2invest = Some(need2invest);
        asset
    }

    #[test]
    fn test_base_currency_whole_units() {
        let mut spy = asset(Currency::Usd, 250.0, 1000.0);
        assert_eq!(
            quantize_units("SPY", &mut spy, 1300.0, false).unwrap(),
            Units::Whole(4)
        );
        assert_eq!(spy.need2invest_in_units, Some(Units::Whole(4)));
    }

    #[test]
    fn test_fractional_units_are_not_rounded() {
        let mut btc = asset(Currency::Usd, 250.0, 1000.0);
        assert_eq!(
            quantize_units("BTC", &mut btc, 1300.0, true).unwrap(),
            Units::Fractional(4.0)
        );

        let mut eth = asset(Currency::Usd, 400.0, 1000.0);
        assert_eq!(
            quantize_units("ETH", &mut eth, 1300.0, true).unwrap(),
            Units::Fractional(2.5)
        );
    }

    #[test]
    fn test_whole_units_round_to_nearest() {
        let mut up = asset(Currency::Usd, 100.0, 370.0);
        assert_eq!(quantize_units("A", &mut up, 1300.0, false).unwrap(), Units::Whole(4));

        let mut down = asset(Currency::Usd, 100.0, 349.0);
        assert_eq!(quantize_units("B", &mut down, 1300.0, false).unwrap(), Units::Whole(3));
    }

    #[test]
    fn test_secondary_currency_uses_converted_price() {
        // 65,000 KRW at 1300 KRW/USD is 50 USD per unit.
        let mut kodex = asset(Currency::Krw, 65_000.0, 500.0);
        assert_eq!(
            quantize_units("069500", &mut kodex, 1300.0, false).unwrap(),
            Units::Whole(10)
        );
    }

    #[test]
    fn test_negative_amount_yields_negative_units() {
        let mut spy = asset(Currency::Usd, 100.0, -250.0);
        assert_eq!(
            quantize_units("SPY", &mut spy, 1300.0, false).unwrap(),
            Units::Whole(-3)
        );
    }

    #[test]
    fn test_zero_price_is_rejected() {
        let mut spy = asset(Currency::Usd, 0.0, 100.0);
        assert_eq!(
            quantize_units("SPY", &mut spy, 1300.0, false),
            Err(ReportError::NonPositivePrice {
                asset: "SPY".to_string(),
                price: 0.0,
            })
        );
    }
}
