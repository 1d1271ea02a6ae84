//! Best-quote selection and slippage relative to the best quote.
//!
//! Rates are compared by cross-multiplying base-unit amounts in 512 bits, so two quotes
//! for different sell amounts still compare exactly and no product can overflow.

use alloy::primitives::{Uint, U256, U512};
use std::cmp::Ordering;

use crate::{financial_math, quote::Quote};

/// Slippage is tracked in millionths of a percent.
const MICRO_PCT_SCALE: u64 = 100_000_000;

/// Room for a 512-bit cross product times [`MICRO_PCT_SCALE`].
type U576 = Uint<576, 9>;

#[derive(Debug, Clone, PartialEq)]
pub struct RankedQuotes {
    /// Best-first.
    pub quotes: Vec<Quote>,
    /// Index of the best quote; `None` means no route is available.
    pub best: Option<usize>,
}

fn widen(v: U256) -> U512 {
    let [a, b, c, d] = *v.as_limbs();
    U512::from_limbs([a, b, c, d, 0, 0, 0, 0])
}

fn widen_product(v: U512) -> U576 {
    let [a, b, c, d, e, f, g, h] = *v.as_limbs();
    U576::from_limbs([a, b, c, d, e, f, g, h, 0])
}

/// `a` before `b` when `a` yields more output per unit of input; ties go to the cheaper
/// gas cost, then the provider name.
fn compare(a: &Quote, b: &Quote) -> Ordering {
    let a_rate = widen(a.buy_amount) * widen(b.sell_amount);
    let b_rate = widen(b.buy_amount) * widen(a.sell_amount);
    b_rate
        .cmp(&a_rate)
        .then_with(|| {
            a.gas_cost
                .native_base_units
                .cmp(&b.gas_cost.native_base_units)
        })
        .then_with(|| a.provider.cmp(&b.provider))
}

/// Shortfall of `q` against `best`, rounded up so only exact ties report zero.
fn slippage_micro_pct(best: &Quote, q: &Quote) -> u64 {
    let denom = widen(best.buy_amount) * widen(q.sell_amount);
    if denom.is_zero() {
        return 0;
    }
    let reachable = widen(q.buy_amount) * widen(best.sell_amount);
    let diff = denom.saturating_sub(reachable);
    if diff.is_zero() {
        return 0;
    }
    let scaled = widen_product(diff) * U576::from(MICRO_PCT_SCALE);
    let micro = scaled.div_ceil(widen_product(denom));
    u64::try_from(micro).unwrap_or(MICRO_PCT_SCALE)
}

fn annotate(q: &mut Quote, micro_pct: u64) {
    let pct = financial_math::micro_pct_to_pct(micro_pct);
    q.slippage_micro_pct = micro_pct;
    q.slippage_pct = pct;
    q.slippage_text = format!("{}%", financial_math::format_fixed(pct, 2));
}

/// Sort quotes best-first and annotate each with its slippage against the best one.
pub fn rank(mut quotes: Vec<Quote>) -> RankedQuotes {
    quotes.retain(|q| !q.buy_amount.is_zero());
    quotes.sort_by(compare);

    let Some(best) = quotes.first().cloned() else {
        return RankedQuotes {
            quotes,
            best: None,
        };
    };
    for q in &mut quotes {
        let micro = slippage_micro_pct(&best, q);
        annotate(q, micro);
    }
    RankedQuotes {
        quotes,
        best: Some(0),
    }
}
