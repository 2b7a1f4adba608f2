//! Distribution of a period's saving across assets.
//!
//! Cost averaging (CA) splits the saving by target weight. Value averaging
//! (VA) runs CA for its ledger and then invests whatever closes the gap
//! between the cumulative CA target and the current appraisement.

mod ledger;
mod units;

pub use ledger::{actual_increment, update_deviation_ledger, DeviationBasis};
pub use units::quantize_units;

use tracing::debug;

use crate::report::{self, AssetRecord, Report, ReportError, Strategy};

/// Apply the CA rule to one asset and advance its `cumSumCaInvested` ledger.
///
/// When the reference already tracks the ledger this period's CA amount is
/// added to it. Otherwise the ledger is seeded from the reference
/// appraisement, falling back to the reconciled `invested` amount.
pub fn allocate_ca(
    asset: &mut AssetRecord,
    reference: Option<&AssetRecord>,
    saving: f64,
) -> f64 {
    let ca = saving * asset.weight;

    let cum_sum = match reference.and_then(|r| r.cum_sum_ca_invested) {
        Some(previous) => previous + ca,
        None => {
            let seed = reference
                .and_then(|r| r.appraisement)
                .or(asset.invested)
                .unwrap_or(0.0);
            seed + ca
        }
    };

    asset.need2invest_ca = Some(ca);
    asset.cum_sum_ca_invested = Some(cum_sum);
    asset.need2invest = Some(ca);
    ca
}

/// Apply the VA rule: `need2investVA = cumSumCaInvested - appraisement`.
///
/// Requires a fresh appraisement.
pub fn allocate_va(
    asset_id: &str,
    asset: &mut AssetRecord,
    reference: Option<&AssetRecord>,
    saving: f64,
) -> Result<f64, ReportError> {
    allocate_ca(asset, reference, saving);

    let appraisement = report::require(asset_id, "appraisement", asset.appraisement)?;
    let target = report::require(asset_id, "cumSumCaInvested", asset.cum_sum_ca_invested)?;
    let va = target - appraisement;

    asset.need2invest_va = Some(va);
    asset.need2invest = Some(va);
    Ok(va)
}

/// Allocate one asset according to `strategy`, returning `need2invest`.
pub fn allocate(
    strategy: Strategy,
    asset_id: &str,
    asset: &mut AssetRecord,
    reference: Option<&AssetRecord>,
    saving: f64,
) -> Result<f64, ReportError> {
    match strategy {
        Strategy::CostAveraging => Ok(allocate_ca(asset, reference, saving)),
        Strategy::ValueAveraging => allocate_va(asset_id, asset, reference, saving),
    }
}

/// Distribute `report.saving` over every asset of `report`.
pub fn distribute_saving(report: &mut Report, reference: &Report) -> Result<(), ReportError> {
    let saving = report.saving.unwrap_or(0.0);
    let strategy = report.strategy;

    for (group_id, group) in report.asset_groups.iter_mut() {
        for (asset_id, asset) in group.assets.iter_mut() {
            let previous = reference.asset(group_id, asset_id);
            let amount = allocate(strategy, asset_id, asset, previous, saving)?;
            debug!(group = %group_id, asset = %asset_id, %strategy, amount, "Allocated saving");
        }
    }

    Ok(())
}
