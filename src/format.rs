//! Human-facing number formatting for the printed report.
//!
//! Only the terminal table goes through here; the report file keeps full
//! precision.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::report::Units;

fn group_thousands(int_part: &str) -> String {
    let len = int_part.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in int_part.chars().enumerate() {
        out.push(ch);
        let remaining = len - i - 1;
        if remaining > 0 && remaining % 3 == 0 {
            out.push(',');
        }
    }
    out
}

/// Pad or cut the fractional part to exactly `dp` digits.
fn fix_fraction(s: &str, dp: u32) -> String {
    let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
    if dp == 0 {
        return int_part.to_string();
    }
    let frac: String = frac_part
        .chars()
        .chain(std::iter::repeat('0'))
        .take(dp as usize)
        .collect();
    format!("{int_part}.{frac}")
}

/// Round `value` half away from zero to `decimals` places.
///
/// Non-finite values are printed as-is.
pub fn format_amount(value: f64, decimals: u32, grouping: bool) -> String {
    let Ok(decimal) = Decimal::try_from(value) else {
        return value.to_string();
    };
    let rounded = decimal.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();

    let digits = fix_fraction(&rounded.abs().normalize().to_string(), decimals);
    let digits = if grouping {
        match digits.split_once('.') {
            Some((int_part, frac)) => format!("{}.{frac}", group_thousands(int_part)),
            None => group_thousands(&digits),
        }
    } else {
        digits
    };

    if negative {
        format!("-{digits}")
    } else {
        digits
    }
}

/// Whole units print as integers; fractional units keep up to 8 places.
pub fn format_units(units: Units, grouping: bool) -> String {
    match units {
        Units::Whole(n) => format_amount(n as f64, 0, grouping),
        Units::Fractional(q) => {
            let Ok(decimal) = Decimal::try_from(q) else {
                return q.to_string();
            };
            decimal
                .round_dp_with_strategy(8, RoundingStrategy::MidpointAwayFromZero)
                .normalize()
                .to_string()
        }
    }
}

/// `value / total` as a percentage with one decimal place.
pub fn format_percent(value: f64, total: f64) -> String {
    if total == 0.0 {
        return "-".to_string();
    }
    format!("{}%", format_amount(value / total * 100.0, 1, false))
}
