//! Centralised float-arithmetic helpers for fiat and display values.
//!
//! This is the only module allowed to turn base-unit amounts into floats. Nothing computed
//! here ever flows back into an on-chain amount.

#![expect(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::float_arithmetic,
    reason = "dedicated float-math module; casts and arithmetic are intentional"
)]

use alloy::primitives::U256;

use crate::amount::to_human_string;

/// Parse a canonical human decimal string into a float for display math.
pub fn human_to_f64(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Convert a token amount in base units to a fiat value.
///
/// `base`     – raw amount (e.g. wei).
/// `decimals` – number of decimal places the token uses.
/// `rate`     – fiat price per **one whole** token.
pub fn multiply_by_rate(base: U256, decimals: u8, rate: f64) -> f64 {
    human_to_f64(&to_human_string(base, decimals)) * rate
}

/// `buy / sell` in human units. `None` when the sell side is zero or not a number.
pub fn price_ratio(buy_human: &str, sell_human: &str) -> Option<f64> {
    let sell = human_to_f64(sell_human);
    let buy = human_to_f64(buy_human);
    if !sell.is_finite() || !buy.is_finite() || sell <= 0.0_f64 {
        return None;
    }
    Some(buy / sell)
}

/// A usable fiat rate is finite and non-negative.
pub fn is_valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate >= 0.0_f64
}

/// Format with a fixed number of decimal places (e.g. `0.000123` with 6 => `"0.000123"`).
pub fn format_fixed(x: f64, decimals: usize) -> String {
    format!("{x:.decimals$}")
}

/// Format a float to `sig` significant figures, keeping trailing zeros.
pub fn format_significant(x: f64, sig: i32) -> String {
    if x == 0.0_f64 || !x.is_finite() {
        return format_fixed(x, usize::try_from(sig.saturating_sub(1)).unwrap_or(0));
    }
    let magnitude = x.abs().log10().floor() as i32;
    let decimals = sig.saturating_sub(1).saturating_sub(magnitude).max(0_i32);
    format_fixed(x, usize::try_from(decimals).unwrap_or(0))
}

/// Interpret a JSON float as a whole non-negative count (e.g. `21000.0` gas units).
///
/// Returns `None` for fractional, negative, non-finite or out-of-range values.
pub fn f64_to_whole_u64(x: f64) -> Option<u64> {
    if !x.is_finite() || x < 0.0_f64 || x.fract() != 0.0_f64 || x >= u64::MAX as f64 {
        return None;
    }
    Some(x as u64)
}

/// Convert an integer slippage in millionths of a percent into a percentage.
pub fn micro_pct_to_pct(micro_pct: u64) -> f64 {
    micro_pct as f64 / 1_000_000.0_f64
}
