use crate::report::{self, AssetRecord, ReportError};

/// What a venue can tell us about how much was actually bought last period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviationBasis {
    /// Change in unit holdings, valued at the reference price.
    Holdings,
    /// Change in the reconciled `invested` amount (already base currency).
    ///
    /// Assets that never recorded an `invested` amount are measured by
    /// holdings instead.
    Invested,
}

/// Unit delta valued at the reference price and rate, or the fresh ones
/// when the reference has no price.
fn holdings_increment(
    asset_id: &str,
    asset: &AssetRecord,
    reference: &AssetRecord,
    reference_rate: Option<f64>,
    exchange_rate: f64,
) -> Result<f64, ReportError> {
    let holdings = report::require(asset_id, "holdings", asset.holdings)?;
    let delta = holdings - reference.holdings.unwrap_or(0.0);

    let (price, rate) = match reference.price {
        Some(price) => (price, reference_rate.unwrap_or(exchange_rate)),
        None => (
            report::require(asset_id, "price", asset.price)?,
            exchange_rate,
        ),
    };
    report::check_exchange_rate(rate)?;

    Ok(asset.currency.to_base(delta * price, rate))
}

/// Base-currency value of what was actually invested since the reference.
///
/// For the holdings basis the unit delta is valued at the reference price
/// and converted with the reference exchange rate; only when the reference
/// has no price does the fresh price (and current rate) stand in.
pub fn actual_increment(
    asset_id: &str,
    asset: &AssetRecord,
    reference: &AssetRecord,
    reference_rate: Option<f64>,
    exchange_rate: f64,
    basis: DeviationBasis,
) -> Result<f64, ReportError> {
    match (basis, asset.invested) {
        (DeviationBasis::Invested, Some(invested)) => {
            Ok(invested - reference.invested.unwrap_or(0.0))
        }
        _ => holdings_increment(asset_id, asset, reference, reference_rate, exchange_rate),
    }
}

/// Advance `cumInvDeviation` by `(previous need2invest - actual increment)`.
///
/// A reference without `need2invest` has no plan to compare against, so the
/// ledger is carried over untouched.
pub fn update_deviation_ledger(
    asset_id: &str,
    asset: &mut AssetRecord,
    reference: Option<&AssetRecord>,
    reference_rate: Option<f64>,
    exchange_rate: f64,
    basis: DeviationBasis,
) -> Result<Option<f64>, ReportError> {
    let Some(reference) = reference else {
        return Ok(asset.cum_inv_deviation);
    };
    let Some(planned) = reference.need2invest else {
        return Ok(asset.cum_inv_deviation);
    };

    let actual =
        actual_increment(asset_id, asset, reference, reference_rate, exchange_rate, basis)?;
    let ledger = reference.cum_inv_deviation.unwrap_or(0.0) + (planned - actual);

    asset.cum_inv_deviation = Some(ledger);
    Ok(Some(ledger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Currency;

    fn reference(currency: Currency, price: f64, holdings: f64, planned: f64) -> AssetRecord {
        let mut reference = AssetRecord::new(currency, 1.0)
            .with_price(price)
            .with_holdings(holdings);
        reference.need2invest = Some(planned);
        reference
    }

    #[test]
    fn test_shortfall_accumulates() {
        // Planned 100, bought 2 units at the reference price of 40.
        let previous = reference(Currency::Usd, 40.0, 5.0, 100.0);
        let mut asset = previous.carry_forward();
        asset.holdings = Some(7.0);
        asset.price = Some(55.0);

        let ledger = update_deviation_ledger(
            "SPY",
            &mut asset,
            Some(&previous),
            Some(1300.0),
            1310.0,
            DeviationBasis::Holdings,
        )
        .unwrap();
        assert_eq!(ledger, Some(20.0));
        assert_eq!(asset.cum_inv_deviation, Some(20.0));
    }

    #[test]
    fn test_prior_ledger_is_extended() {
        let mut previous = reference(Currency::Usd, 10.0, 0.0, 50.0);
        previous.cum_inv_deviation = Some(-5.0);
        let mut asset = previous.carry_forward();
        asset.holdings = Some(6.0);

        let ledger = update_deviation_ledger(
            "SPY",
            &mut asset,
            Some(&previous),
            None,
            1300.0,
            DeviationBasis::Holdings,
        )
        .unwrap();
        assert_eq!(ledger, Some(-15.0));
    }

    #[test]
    fn test_secondary_currency_uses_reference_rate() {
        let previous = reference(Currency::Krw, 65_000.0, 10.0, 100.0);
        let mut asset = previous.carry_forward();
        asset.holdings = Some(12.0);

        let increment = actual_increment(
            "069500",
            &asset,
            &previous,
            Some(1300.0),
            1400.0,
            DeviationBasis::Holdings,
        )
        .unwrap();
        assert!((increment - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_reference_price_uses_fresh_price_and_rate() {
        let mut previous = AssetRecord::new(Currency::Krw, 1.0).with_holdings(1.0);
        previous.need2invest = Some(0.0);
        let mut asset = previous.carry_forward();
        asset.holdings = Some(3.0);
        asset.price = Some(70_000.0);

        let increment = actual_increment(
            "GLD",
            &asset,
            &previous,
            Some(1300.0),
            1400.0,
            DeviationBasis::Holdings,
        )
        .unwrap();
        assert!((increment - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_invested_basis_uses_invested_delta() {
        let mut previous = AssetRecord::new(Currency::Usd, 1.0);
        previous.invested = Some(1000.0);
        previous.need2invest = Some(300.0);
        let mut asset = previous.carry_forward();
        asset.invested = Some(1250.0);

        let ledger = update_deviation_ledger(
            "CASH",
            &mut asset,
            Some(&previous),
            None,
            1300.0,
            DeviationBasis::Invested,
        )
        .unwrap();
        assert_eq!(ledger, Some(50.0));
    }

    #[test]
    fn test_first_generation_keeps_ledger_absent() {
        let previous = AssetRecord::new(Currency::Usd, 1.0).with_holdings(1.0);
        let mut asset = previous.carry_forward();

        let ledger = update_deviation_ledger(
            "SPY",
            &mut asset,
            Some(&previous),
            None,
            1300.0,
            DeviationBasis::Holdings,
        )
        .unwrap();
        assert_eq!(ledger, None);
        assert_eq!(asset.cum_inv_deviation, None);
    }

    #[test]
    fn test_on_plan_leaves_ledger_unchanged() {
        let mut previous = reference(Currency::Usd, 50.0, 4.0, 100.0);
        previous.cum_inv_deviation = Some(12.5);
        let mut asset = previous.carry_forward();
        asset.holdings = Some(6.0);

        let ledger = update_deviation_ledger(
            "SPY",
            &mut asset,
            Some(&previous),
            None,
            1300.0,
            DeviationBasis::Holdings,
        )
        .unwrap();
        assert_eq!(ledger, Some(12.5));
    }

    #[test]
    fn test_invested_basis_without_invested_falls_back_to_holdings() {
        // A hand-tracked deposit that only ever recorded units.
        let previous = reference(Currency::Usd, 1.0, 100.0, 50.0);
        let mut asset = previous.carry_forward();
        asset.holdings = Some(130.0);

        let ledger = update_deviation_ledger(
            "DEPOSIT",
            &mut asset,
            Some(&previous),
            None,
            1300.0,
            DeviationBasis::Invested,
        )
        .unwrap();
        assert_eq!(ledger, Some(20.0));
    }
}
