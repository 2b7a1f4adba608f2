//! Derivation of the next report from a reference report.
//!
//! Every asset goes through the same stages in a fixed order, each relying
//! on the fields the previous one filled in:
//!
//! 1. holdings (venue `populate`, manual unit corrections folded in)
//! 2. invested (legacy per-currency amounts reconciled)
//! 3. appraisement
//! 4. allocation (CA or VA)
//! 5. unit quantization
//! 6. deviation ledger
//! 7. total appraisement
//!
//! Groups are refreshed one after another in key order. The first hard
//! error aborts the run and no report is produced.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::allocation::{self, DeviationBasis};
use crate::appraisal;
use crate::holdings;
use crate::report::{self, Currency, Report};
use crate::sources::SourceRegistry;

/// This period's contribution, as entered by the user.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Savings {
    pub secondary: f64,
    pub base: f64,
}

impl Savings {
    pub fn new(secondary: f64, base: f64) -> Self {
        Self { secondary, base }
    }

    /// Total contribution in base currency.
    pub fn in_base(&self, exchange_rate: f64) -> f64 {
        Currency::SECONDARY.to_base(self.secondary, exchange_rate) + self.base
    }
}

/// Per-group facts the later stages need from the venue.
#[derive(Debug, Clone, Copy)]
struct GroupTraits {
    basis: DeviationBasis,
    fractional: bool,
}

pub struct ReportDeriver {
    registry: SourceRegistry,
}

impl ReportDeriver {
    pub fn new(registry: SourceRegistry) -> Self {
        Self { registry }
    }

    pub async fn derive(
        &self,
        reference: &Report,
        savings: Savings,
        exchange_rate: f64,
    ) -> Result<Report> {
        report::check_exchange_rate(exchange_rate)?;

        let mut next = Report::new(reference.strategy);
        next.exchange_rate = Some(exchange_rate);
        next.saving_in_base = Some(savings.base);
        next.saving_in_secondary = Some(savings.secondary);
        next.saving = Some(savings.in_base(exchange_rate));
        info!(
            strategy = %next.strategy,
            saving = ?next.saving,
            exchange_rate,
            "Deriving report"
        );

        let mut traits = BTreeMap::new();
        for (group_id, reference_group) in &reference.asset_groups {
            let source = self.registry.resolve(group_id, reference_group)?;
            let mut group = reference_group.carry_forward();

            info!(
                group = %group_id,
                source = source.name(),
                assets = group.assets.len(),
                "Refreshing asset group"
            );
            source
                .populate(group_id, &mut group, exchange_rate)
                .await
                .with_context(|| format!("Failed to refresh asset group '{group_id}'"))?;

            for (asset_id, asset) in group.assets.iter_mut() {
                report::require(asset_id, "price", asset.price)?;
                report::require(asset_id, "holdings", asset.holdings)?;
                holdings::reconcile_invested(asset_id, asset, exchange_rate)?;
                let appraisement = appraisal::derive_appraisement(asset_id, asset, exchange_rate)?;
                debug!(group = %group_id, asset = %asset_id, appraisement, "Appraised asset");
            }

            traits.insert(
                group_id.clone(),
                GroupTraits {
                    basis: source.deviation_basis(),
                    fractional: source.kind().allows_fractional_units(),
                },
            );
            next.asset_groups.insert(group_id.clone(), group);
        }

        allocation::distribute_saving(&mut next, reference)?;

        for (group_id, group) in next.asset_groups.iter_mut() {
            let Some(group_traits) = traits.get(group_id).copied() else {
                continue;
            };
            for (asset_id, asset) in group.assets.iter_mut() {
                let units = allocation::quantize_units(
                    asset_id,
                    asset,
                    exchange_rate,
                    group_traits.fractional,
                )?;
                let ledger = allocation::update_deviation_ledger(
                    asset_id,
                    asset,
                    reference.asset(group_id, asset_id),
                    reference.exchange_rate,
                    exchange_rate,
                    group_traits.basis,
                )?;
                debug!(
                    group = %group_id,
                    asset = %asset_id,
                    need2invest = ?asset.need2invest,
                    %units,
                    cum_inv_deviation = ?ledger,
                    "Planned investment"
                );
            }
        }

        let total = appraisal::derive_total_appraisement(&mut next)?;
        info!(total_appraisement = total, "Report derived");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{AssetGroup, AssetRecord, Strategy, Units, VenueKind};
    use crate::sources::{AssetDataSource, ManualSource};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// A crypto venue with fixed prices.
    struct FixedPrices(Vec<(&'static str, f64)>);

    #[async_trait]
    impl AssetDataSource for FixedPrices {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn kind(&self) -> VenueKind {
            VenueKind::Crypto
        }

        async fn populate(&self, _: &str, group: &mut AssetGroup, _: f64) -> Result<()> {
            for (asset_id, price) in &self.0 {
                if let Some(asset) = group.assets.get_mut(*asset_id) {
                    holdings::fold_manual_units(asset_id, asset)?;
                    asset.price = Some(*price);
                }
            }
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl AssetDataSource for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn kind(&self) -> VenueKind {
            VenueKind::Brokerage
        }

        async fn populate(&self, _: &str, _: &mut AssetGroup, _: f64) -> Result<()> {
            Err(anyhow!("HTTP 500"))
        }
    }

    fn registry() -> SourceRegistry {
        SourceRegistry::new()
            .with_source(Arc::new(ManualSource::new()))
            .with_source(Arc::new(FixedPrices(vec![("BTC", 250.0)])))
    }

    fn two_asset_reference() -> Report {
        Report::new(Strategy::CostAveraging)
            .with_group(
                "Bank",
                AssetGroup::new().with_asset(
                    "DEPOSIT",
                    AssetRecord::new(Currency::Usd, 0.6)
                        .with_price(1.0)
                        .with_holdings(0.0),
                ),
            )
            .with_group(
                "CoinGecko",
                AssetGroup::new().with_asset(
                    "BTC",
                    AssetRecord::new(Currency::Usd, 0.4).with_holdings(0.0),
                ),
            )
    }

    #[test]
    fn test_savings_in_base() {
        assert_eq!(Savings::new(1_300_000.0, 100.0).in_base(1300.0), 1100.0);
        assert_eq!(Savings::default().in_base(1300.0), 0.0);
    }

    #[tokio::test]
    async fn test_ca_split_end_to_end() {
        let deriver = ReportDeriver::new(registry());
        let next = deriver
            .derive(&two_asset_reference(), Savings::new(0.0, 1000.0), 1300.0)
            .await
            .unwrap();

        let deposit = next.asset("Bank", "DEPOSIT").unwrap();
        let btc = next.asset("CoinGecko", "BTC").unwrap();
        assert_eq!(deposit.need2invest_ca, Some(600.0));
        assert_eq!(deposit.need2invest, Some(600.0));
        assert_eq!(btc.need2invest_ca, Some(400.0));
        assert_eq!(btc.need2invest, Some(400.0));

        assert_eq!(deposit.need2invest_in_units, Some(Units::Whole(600)));
        assert_eq!(btc.need2invest_in_units, Some(Units::Fractional(1.6)));
        assert_eq!(next.saving, Some(1000.0));
        assert_eq!(next.exchange_rate, Some(1300.0));
        assert_eq!(next.total_appraisement, Some(0.0));
    }

    #[tokio::test]
    async fn test_reference_is_not_mutated_and_legacy_fields_are_folded() {
        let mut reference = two_asset_reference();
        {
            let deposit = reference
                .asset_groups
                .get_mut("Bank")
                .and_then(|g| g.assets.get_mut("DEPOSIT"))
                .unwrap();
            deposit.invested_in_secondary = Some(260_000.0);
            deposit.actual_invested_in_units = Some(200.0);
        }
        let snapshot = reference.clone();

        let next = ReportDeriver::new(registry())
            .derive(&reference, Savings::new(0.0, 1000.0), 1300.0)
            .await
            .unwrap();
        assert_eq!(reference, snapshot);

        let deposit = next.asset("Bank", "DEPOSIT").unwrap();
        assert_eq!(deposit.invested, Some(200.0));
        assert_eq!(deposit.invested_in_secondary, None);
        assert_eq!(deposit.holdings, Some(200.0));
        assert_eq!(deposit.appraisement, Some(200.0));
    }

    #[tokio::test]
    async fn test_failing_group_aborts_run() {
        let reference = two_asset_reference().with_group(
            "KIS",
            AssetGroup::new().with_asset("SPY", AssetRecord::new(Currency::Usd, 0.0)),
        );
        let registry = registry().with_source(Arc::new(Failing));

        let err = ReportDeriver::new(registry)
            .derive(&reference, Savings::new(0.0, 1000.0), 1300.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'KIS'"));
    }

    #[tokio::test]
    async fn test_invalid_exchange_rate_is_rejected_up_front() {
        let err = ReportDeriver::new(registry())
            .derive(&two_asset_reference(), Savings::new(0.0, 1000.0), 0.0)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<report::ReportError>().is_some());
    }
}
