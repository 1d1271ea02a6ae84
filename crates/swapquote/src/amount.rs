//! Fixed-point conversions between human decimal strings and integer base units.
//!
//! Excess fractional digits are truncated, never rounded, so a converted amount can never
//! exceed what the user typed. Every caller goes through [`to_base_units`]; there is no
//! second trimming path.

use alloy::primitives::U256;
use serde::Serializer;

use crate::errors::QuoteError;

fn is_ascii_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a raw base-unit integer (as returned by providers) without going through floats.
///
/// Accepts decimal digits or a `0x`-prefixed hex quantity.
pub fn parse_base_units(s: &str) -> Result<U256, QuoteError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(QuoteError::InvalidAmount("empty base amount".into()));
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(QuoteError::InvalidAmount(format!(
                "base amount is not a hex quantity: {s}"
            )));
        }
        return U256::from_str_radix(hex, 16)
            .map_err(|e| QuoteError::InvalidAmount(format!("base amount out of range: {e}")));
    }
    if !is_ascii_digits(s) {
        return Err(QuoteError::InvalidAmount(format!(
            "base amount is not a decimal integer: {s}"
        )));
    }
    U256::from_str_radix(s, 10)
        .map_err(|e| QuoteError::InvalidAmount(format!("base amount out of range: {e}")))
}

/// Convert a human decimal string (e.g. `"1.5"`) into base units for a token with `decimals`.
pub fn to_base_units(s: &str, decimals: u8) -> Result<U256, QuoteError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(QuoteError::InvalidAmount("empty amount".into()));
    }

    let (whole, frac) = match s.split_once('.') {
        Some((a, b)) => (a, b),
        None => (s, ""),
    };

    if whole.starts_with('-') {
        return Err(QuoteError::InvalidAmount(
            "amount must be non-negative".into(),
        ));
    }
    if whole.is_empty() && frac.is_empty() {
        return Err(QuoteError::InvalidAmount(format!("not a number: {s}")));
    }
    if !is_ascii_digits(whole) || !is_ascii_digits(frac) {
        return Err(QuoteError::InvalidAmount(format!("not a decimal numeral: {s}")));
    }

    let width = usize::from(decimals);
    let kept = frac.get(..width).unwrap_or(frac);

    let mut digits = String::with_capacity(whole.len().saturating_add(width));
    digits.push_str(if whole.is_empty() { "0" } else { whole });
    digits.push_str(kept);
    for _ in kept.len()..width {
        digits.push('0');
    }

    U256::from_str_radix(&digits, 10)
        .map_err(|e| QuoteError::InvalidAmount(format!("amount overflow: {e}")))
}

/// Format base units as a canonical decimal string without using floats.
///
/// Examples:
/// - base=1500000, decimals=6 => "1.5"
/// - base=1, decimals=6 => "0.000001"
pub fn to_human_string(base: U256, decimals: u8) -> String {
    let raw = base.to_string();
    if decimals == 0 {
        return raw;
    }
    let width = usize::from(decimals);

    let padded = if raw.len() <= width {
        let mut p = "0".repeat(width.saturating_add(1).saturating_sub(raw.len()));
        p.push_str(&raw);
        p
    } else {
        raw
    };

    let split = padded.len().saturating_sub(width);
    let (whole, frac) = padded.split_at(split);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_owned()
    } else {
        format!("{whole}.{frac}")
    }
}

/// Serialize base units as a decimal string (providers and UIs expect `"1500000"`, not hex).
pub fn serialize_dec<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

/// Optional variant of [`serialize_dec`].
pub fn serialize_dec_opt<S: Serializer>(v: &Option<U256>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(v) => s.serialize_str(&v.to_string()),
        None => s.serialize_none(),
    }
}
