//! Provider payloads in, canonical [`Quote`]s out.
//!
//! Every provider shapes its response a little differently; those differences are absorbed
//! here. One bad payload only ever drops that provider's quote.

use alloy::primitives::{Address, Bytes, U256};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr as _;
use tracing::{debug, warn};

use crate::{
    amount,
    errors::QuoteError,
    financial_math,
    gas::{self, estimate_gas_cost},
    quote::{Quote, TxDescriptor},
    token::TokenRef,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTx {
    from: Option<String>,
    to: Option<String>,
    data: Option<String>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    gas: Value,
    #[serde(default)]
    gas_price: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawInner {
    tx: Option<RawTx>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProviderQuote {
    provider: String,
    #[serde(default)]
    sell_token: Option<String>,
    #[serde(default)]
    buy_token: Option<String>,
    #[serde(default)]
    sell_amount: Value,
    #[serde(default)]
    buy_amount: Value,
    #[serde(default)]
    estimated_gas: Value,
    #[serde(default)]
    gas_price: Value,
    #[serde(default)]
    allowance_target: Option<String>,
    /// Current allowance the wallet has granted the spender, when the provider reports it.
    #[serde(default)]
    allowance: Value,
    #[serde(default)]
    net_value: Value,
    #[serde(default)]
    quote: Option<RawInner>,
    #[serde(default)]
    tx: Option<RawTx>,
}

/// What the normalizer needs to know beyond the payload itself.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub sell_token: &'a TokenRef,
    pub buy_token: &'a TokenRef,
    /// Amount the engine asked for; used when a provider omits `sellAmount`.
    pub requested_sell_amount: U256,
    pub native_decimals: u8,
    pub native_fiat_rate: Option<f64>,
    pub wallet: Option<Address>,
}

fn base_units_from_json(v: &Value) -> Result<Option<U256>, String> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => amount::parse_base_units(s).map(Some).map_err(|e| e.to_string()),
        Value::Number(n) => n
            .as_u64()
            .map(|u| Some(U256::from(u)))
            .ok_or_else(|| format!("not a non-negative integer: {n}")),
        other => Err(format!("unexpected type: {other}")),
    }
}

fn parse_optional_address(s: Option<&str>) -> Result<Option<Address>, String> {
    match s.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => Address::from_str(s)
            .map(|a| (!a.is_zero()).then_some(a))
            .map_err(|e| format!("invalid address {s}: {e}")),
    }
}

fn check_token(
    provider: &str,
    side: &str,
    got: Option<&str>,
    want: &TokenRef,
) -> Result<(), QuoteError> {
    let got = parse_optional_address(got).map_err(|e| QuoteError::malformed(provider, e))?;
    match got {
        Some(addr) if addr != want.address => Err(QuoteError::malformed(
            provider,
            format!(
                "{side} token {addr:#x} does not match requested {:#x}",
                want.address
            ),
        )),
        _ => Ok(()),
    }
}

fn build_tx(
    provider: &str,
    raw: &RawTx,
    wallet: Option<Address>,
) -> Result<Option<TxDescriptor>, QuoteError> {
    let Some(to) = parse_optional_address(raw.to.as_deref())
        .map_err(|e| QuoteError::malformed(provider, format!("tx.to: {e}")))?
    else {
        return Ok(None);
    };
    let from = parse_optional_address(raw.from.as_deref())
        .map_err(|e| QuoteError::malformed(provider, format!("tx.from: {e}")))?
        .or(wallet);
    let data = match raw.data.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => Bytes::new(),
        Some(d) => Bytes::from_str(d)
            .map_err(|e| QuoteError::malformed(provider, format!("tx.data: {e}")))?,
    };
    let value = base_units_from_json(&raw.value)
        .map_err(|e| QuoteError::malformed(provider, format!("tx.value: {e}")))?
        .unwrap_or(U256::ZERO);
    let gas = if raw.gas.is_null() {
        None
    } else {
        Some(gas::gas_units_from_json(&raw.gas)?)
    };
    let gas_price = if raw.gas_price.is_null() {
        None
    } else {
        Some(gas::gas_price_from_json(&raw.gas_price)?)
    };

    Ok(Some(TxDescriptor {
        from,
        to,
        data,
        value,
        gas,
        gas_price,
    }))
}

/// Normalize one raw provider quote.
///
/// Returns `Ok(None)` when the provider has no route (missing or zero `buyAmount`).
pub fn normalize(raw: &Value, ctx: &NormalizeContext<'_>) -> Result<Option<Quote>, QuoteError> {
    let provider_hint = raw
        .get("provider")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_owned();
    let r: RawProviderQuote = serde_json::from_value(raw.clone())
        .map_err(|e| QuoteError::malformed(&provider_hint, e.to_string()))?;
    let provider = r.provider.trim().to_owned();
    if provider.is_empty() {
        return Err(QuoteError::malformed(&provider_hint, "empty provider name"));
    }
    let p = provider.as_str();

    let buy_amount = base_units_from_json(&r.buy_amount)
        .map_err(|e| QuoteError::malformed(p, format!("buyAmount: {e}")))?;
    let Some(buy_amount) = buy_amount.filter(|v| !v.is_zero()) else {
        debug!(provider = p, "provider returned no route");
        return Ok(None);
    };

    let sell_amount = base_units_from_json(&r.sell_amount)
        .map_err(|e| QuoteError::malformed(p, format!("sellAmount: {e}")))?
        .unwrap_or(ctx.requested_sell_amount);
    if sell_amount.is_zero() {
        return Err(QuoteError::malformed(p, "sellAmount is zero"));
    }

    check_token(p, "sell", r.sell_token.as_deref(), ctx.sell_token)?;
    check_token(p, "buy", r.buy_token.as_deref(), ctx.buy_token)?;

    let estimated_gas = gas::gas_units_from_json(&r.estimated_gas)?;
    let gas_price = gas::gas_price_from_json(&r.gas_price)?;
    let gas_cost = estimate_gas_cost(
        estimated_gas,
        gas_price,
        ctx.native_decimals,
        ctx.native_fiat_rate,
    )?;

    let sell_human = amount::to_human_string(sell_amount, ctx.sell_token.decimals);
    let buy_human = amount::to_human_string(buy_amount, ctx.buy_token.decimals);
    let price = financial_math::price_ratio(&buy_human, &sell_human)
        .ok_or_else(|| QuoteError::malformed(p, "cannot derive price ratio"))?;
    let price_text = format!(
        "1 {} \u{2248} {} {}",
        ctx.sell_token.symbol,
        financial_math::format_significant(price, 6),
        ctx.buy_token.symbol
    );

    let allowance_target = parse_optional_address(r.allowance_target.as_deref())
        .map_err(|e| QuoteError::malformed(p, format!("allowanceTarget: {e}")))?;
    let current_allowance = base_units_from_json(&r.allowance)
        .map_err(|e| QuoteError::malformed(p, format!("allowance: {e}")))?;
    let needs_approval = !ctx.sell_token.is_native()
        && allowance_target.is_some()
        && current_allowance.map_or(true, |a| a < sell_amount);

    let net_value = base_units_from_json(&r.net_value)
        .map_err(|e| QuoteError::malformed(p, format!("netValue: {e}")))?;
    let net_value_human = net_value.map(|v| amount::to_human_string(v, ctx.buy_token.decimals));

    let raw_tx = r.quote.and_then(|q| q.tx).or(r.tx);
    let tx = match raw_tx {
        Some(t) => build_tx(p, &t, ctx.wallet)?,
        None => None,
    };

    Ok(Some(Quote {
        provider,
        sell_token: ctx.sell_token.clone(),
        buy_token: ctx.buy_token.clone(),
        sell_amount,
        buy_amount,
        sell_amount_human: sell_human,
        buy_amount_human: buy_human,
        estimated_gas,
        gas_price,
        gas_cost,
        allowance_target,
        needs_approval,
        price,
        price_text,
        net_value,
        net_value_human,
        slippage_micro_pct: 0,
        slippage_pct: 0.0_f64,
        slippage_text: "0.00%".to_owned(),
        tx,
    }))
}

/// Normalize a whole provider response list, dropping (and logging) providers that fail.
pub fn normalize_all(raws: &[Value], ctx: &NormalizeContext<'_>) -> Vec<Quote> {
    let mut out = Vec::with_capacity(raws.len());
    for raw in raws {
        match normalize(raw, ctx) {
            Ok(Some(q)) => out.push(q),
            Ok(None) => {}
            Err(e) => warn!(error = %e, code = e.code(), "dropping provider quote"),
        }
    }
    out
}
