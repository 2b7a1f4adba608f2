//! Plain-text rendering of a finished report.

use crate::appraisal;
use crate::config::DisplayConfig;
use crate::format::{format_amount, format_percent, format_units};
use crate::report::Report;

const HEADERS: [&str; 7] = [
    "asset",
    "target weight",
    "current weight",
    "invested",
    "appraisement",
    "need2invest",
    "need2investInUnits",
];

const MISSING: &str = "-";

fn amount(value: Option<f64>, display: &DisplayConfig) -> String {
    value
        .map(|v| format_amount(v, display.currency_decimals, display.currency_grouping))
        .unwrap_or_else(|| MISSING.to_string())
}

/// Render the report header and per-asset table.
///
/// A report without `totalAppraisement` is rendered with the total derived on
/// a copy; `report` itself is left untouched.
pub fn render_report(report: &Report, display: &DisplayConfig) -> String {
    let total = match report.total_appraisement {
        Some(total) => Some(total),
        None => {
            let mut copy = report.clone();
            appraisal::derive_total_appraisement(&mut copy).ok()
        }
    };

    let mut rows: Vec<[String; 7]> = Vec::new();
    for (group_id, asset_id, asset) in report.assets() {
        let current_weight = match (asset.appraisement, total) {
            (Some(appraisement), Some(total)) => format_percent(appraisement, total),
            _ => MISSING.to_string(),
        };
        rows.push([
            format!("{group_id}/{asset_id}"),
            format_percent(asset.weight, 1.0),
            current_weight,
            amount(asset.invested, display),
            amount(asset.appraisement, display),
            amount(asset.need2invest, display),
            asset
                .need2invest_in_units
                .map(|units| format_units(units, display.currency_grouping))
                .unwrap_or_else(|| MISSING.to_string()),
        ]);
    }

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    out.push_str(&format!("Strategy: {}\n", report.strategy));
    out.push_str(&format!(
        "Exchange rate: {}\n",
        amount(report.exchange_rate, display)
    ));
    out.push_str(&format!("Total Appraisement: {}\n\n", amount(total, display)));

    let rule = widths.map(|w| "-".repeat(w));
    push_row(&mut out, &widths, HEADERS.iter().copied());
    push_row(&mut out, &widths, rule.iter().map(String::as_str));
    for row in &rows {
        push_row(&mut out, &widths, row.iter().map(String::as_str));
    }
    out
}

/// First column left-aligned, numbers right-aligned.
fn push_row<'a>(out: &mut String, widths: &[usize; 7], cells: impl Iterator<Item = &'a str>) {
    let mut line = String::new();
    for (i, (cell, width)) in cells.zip(widths.iter().copied()).enumerate() {
        if i == 0 {
            line.push_str(&format!("{cell:<width$}"));
        } else {
            line.push_str(&format!("  {cell:>width$}"));
        }
    }
    out.push_str(line.trim_end());
    out.push('\n');
}
