//! Assets with no remote feed: bank deposits, pensions, anything tracked by hand.

use anyhow::Result;
use async_trait::async_trait;

use super::AssetDataSource;
use crate::allocation::DeviationBasis;
use crate::holdings::fold_manual_units;
use crate::report::{self, AssetGroup, VenueKind};

/// Validates and folds what the report itself declares.
///
/// `price` and `holdings` must already be present; any
/// `actualInvestedInUnits` is added to `holdings`.
#[derive(Debug, Clone, Default)]
pub struct ManualSource;

impl ManualSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AssetDataSource for ManualSource {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn kind(&self) -> VenueKind {
        VenueKind::Manual
    }

    /// Without a feed the best record of what was bought is `invested`;
    /// assets that never recorded one are measured by holdings.
    fn deviation_basis(&self) -> DeviationBasis {
        DeviationBasis::Invested
    }

    async fn populate(
        &self,
        _group_id: &str,
        group: &mut AssetGroup,
        _exchange_rate: f64,
    ) -> Result<()> {
        for (asset_id, asset) in group.assets.iter_mut() {
            fold_manual_units(asset_id, asset)?;
            let price = report::require(asset_id, "price", asset.price)?;
            report::non_negative(asset_id, "price", Some(price))?;
        }
        Ok(())
    }
}
