use alloy::primitives::U256;
use serde::Serialize;
use serde_json::Value;

use crate::{amount, errors::QuoteError, financial_math};

/// Fiat amounts are displayed with this many decimals.
pub const FIAT_DISPLAY_DECIMALS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GasCost {
    /// `gas_units * gas_price`, in native base units (wei).
    #[serde(serialize_with = "amount::serialize_dec")]
    pub native_base_units: U256,
    pub native_human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiat_human: Option<String>,
}

/// Native and fiat cost of running `gas_units` at `gas_price` (native base units per gas).
pub fn estimate_gas_cost(
    gas_units: u64,
    gas_price: U256,
    native_decimals: u8,
    native_fiat_rate: Option<f64>,
) -> Result<GasCost, QuoteError> {
    let native_base_units = U256::from(gas_units)
        .checked_mul(gas_price)
        .ok_or_else(|| QuoteError::InvalidGasParameters("gas cost overflow".into()))?;

    let fiat_human = match native_fiat_rate {
        None => None,
        Some(rate) if financial_math::is_valid_rate(rate) => Some(financial_math::format_fixed(
            financial_math::multiply_by_rate(native_base_units, native_decimals, rate),
            FIAT_DISPLAY_DECIMALS,
        )),
        Some(rate) => {
            return Err(QuoteError::InvalidGasParameters(format!(
                "native fiat rate must be finite and non-negative, got {rate}"
            )))
        }
    };

    Ok(GasCost {
        native_base_units,
        native_human: amount::to_human_string(native_base_units, native_decimals),
        fiat_human,
    })
}

/// Read a provider gas estimate: a JSON number, a decimal string or a `0x` hex quantity.
pub fn gas_units_from_json(v: &Value) -> Result<u64, QuoteError> {
    match v {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return Ok(u);
            }
            n.as_f64()
                .and_then(financial_math::f64_to_whole_u64)
                .ok_or_else(|| {
                    QuoteError::InvalidGasParameters(format!(
                        "gas estimate must be a whole non-negative number, got {n}"
                    ))
                })
        }
        Value::String(s) => {
            let t = s.trim();
            let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => t.parse::<u64>(),
            };
            parsed.map_err(|e| {
                QuoteError::InvalidGasParameters(format!("gas estimate {s:?} is not a count: {e}"))
            })
        }
        Value::Null => Ok(0),
        other => Err(QuoteError::InvalidGasParameters(format!(
            "unexpected gas estimate type: {other}"
        ))),
    }
}

/// Read a provider gas price in native base units (number, decimal or hex string).
pub fn gas_price_from_json(v: &Value) -> Result<U256, QuoteError> {
    match v {
        Value::Number(n) => n.as_u64().map(U256::from).ok_or_else(|| {
            QuoteError::InvalidGasParameters(format!(
                "gas price must be a non-negative integer, got {n}"
            ))
        }),
        Value::String(s) => amount::parse_base_units(s)
            .map_err(|e| QuoteError::InvalidGasParameters(format!("gas price: {e}"))),
        Value::Null => Ok(U256::ZERO),
        other => Err(QuoteError::InvalidGasParameters(format!(
            "unexpected gas price type: {other}"
        ))),
    }
}
