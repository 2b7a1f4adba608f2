//! Versioned portfolio snapshots.
//!
//! A report is read once as the reference for a run, and the next report is
//! derived from it field by field before being written out in one go.

mod models;
mod store;

pub use models::{AssetGroup, AssetRecord, Currency, Report, Strategy, Units, VenueKind};
pub use store::{load_report, parse_report, write_report};

/// Allowed distance of the weight sum from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-4;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReportError {
    #[error("asset weights sum to {sum}, expected 1.0 (tolerance {WEIGHT_SUM_TOLERANCE})")]
    WeightSum { sum: f64 },

    #[error("{asset}: {field} must not be negative, got {value}")]
    NegativeValue {
        asset: String,
        field: &'static str,
        value: f64,
    },

    #[error("{asset}: {field} is required at this stage but missing")]
    MissingField { asset: String, field: &'static str },

    #[error("{asset}: price must be positive to convert an amount into units, got {price}")]
    NonPositivePrice { asset: String, price: f64 },

    #[error("exchange rate must be a positive finite number, got {rate}")]
    InvalidExchangeRate { rate: f64 },
}

/// Check the invariants every reference report must satisfy.
pub fn validate(report: &Report) -> Result<(), ReportError> {
    let sum = report.weight_sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ReportError::WeightSum { sum });
    }

    for (_, asset_id, asset) in report.assets() {
        non_negative(asset_id, "weight", Some(asset.weight))?;
        non_negative(asset_id, "price", asset.price)?;
        non_negative(asset_id, "holdings", asset.holdings)?;
    }

    if let Some(rate) = report.exchange_rate {
        check_exchange_rate(rate)?;
    }

    Ok(())
}

pub(crate) fn non_negative(
    asset: &str,
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ReportError> {
    match value {
        Some(value) if value < 0.0 || value.is_nan() => Err(ReportError::NegativeValue {
            asset: asset.to_string(),
            field,
            value,
        }),
        _ => Ok(()),
    }
}

pub(crate) fn require(
    asset: &str,
    field: &'static str,
    value: Option<f64>,
) -> Result<f64, ReportError> {
    value.ok_or_else(|| ReportError::MissingField {
        asset: asset.to_string(),
        field,
    })
}

pub(crate) fn check_exchange_rate(rate: f64) -> Result<(), ReportError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(ReportError::InvalidExchangeRate { rate })
    }
}
