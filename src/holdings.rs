//! Holdings and invested-amount updates declared by hand in the reference report.

use tracing::{info, warn};

use crate::report::{self, AssetRecord, ReportError};

/// Fold a manually declared `actualInvestedInUnits` into `holdings`.
///
/// Used by venues that cannot see the account; `holdings` must already be
/// known from the reference report.
pub fn fold_manual_units(asset_id: &str, asset: &mut AssetRecord) -> Result<f64, ReportError> {
    let holdings = report::require(asset_id, "holdings", asset.holdings)?;

    let holdings = match asset.actual_invested_in_units.take() {
        Some(units) => {
            info!(asset = %asset_id, units, "Folding manually invested units into holdings");
            holdings + units
        }
        None => holdings,
    };

    report::non_negative(asset_id, "holdings", Some(holdings))?;
    asset.holdings = Some(holdings);
    Ok(holdings)
}

/// Drop an `actualInvestedInUnits` the venue has no use for.
pub fn discard_manual_units(venue: &str, asset_id: &str, asset: &mut AssetRecord) {
    if let Some(units) = asset.actual_invested_in_units.take() {
        warn!(
            venue,
            asset = %asset_id,
            units,
            "Venue reports holdings itself; ignoring and deleting actualInvestedInUnits"
        );
    }
}

/// Whether `asset` still carries per-currency invested amounts next to a
/// `cumSumCaInvested` ledger.
pub fn has_legacy_invested_on_ledger(asset: &AssetRecord) -> bool {
    asset.cum_sum_ca_invested.is_some()
        && (asset.invested_in_base.is_some() || asset.invested_in_secondary.is_some())
}

/// Reconcile `investedInBase` / `investedInSecondary` into the base-currency `invested`.
///
/// Both per-currency fields are consumed. An asset that already runs a
/// `cumSumCaInvested` ledger is not expected to carry them any more, which
/// is logged as a warning but still folded.
pub fn reconcile_invested(
    asset_id: &str,
    asset: &mut AssetRecord,
    exchange_rate: f64,
) -> Result<Option<f64>, ReportError> {
    let on_ledger = has_legacy_invested_on_ledger(asset);
    let in_base = asset.invested_in_base.take();
    let in_secondary = asset.invested_in_secondary.take();
    if in_base.is_none() && in_secondary.is_none() {
        return Ok(asset.invested);
    }

    report::check_exchange_rate(exchange_rate)?;
    if on_ledger {
        warn!(
            asset = %asset_id,
            invested_in_base = ?in_base,
            invested_in_secondary = ?in_secondary,
            "Legacy per-currency invested amounts on an asset with a CA ledger; folding them"
        );
    }

    let increment = in_base.unwrap_or(0.0) + in_secondary.unwrap_or(0.0) / exchange_rate;
    let invested = asset.invested.unwrap_or(0.0) + increment;
    asset.invested = Some(invested);
    Ok(Some(invested))
}
