//! Centralised helpers for user-facing CLI output written to stderr.

use std::{fmt::Write as _, io::Write as _};

use crate::quote::{Phase, QuoteSetSnapshot};

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

/// Print the `watch` banner to stderr (human-operator info only).
pub fn print_watch_banner(version: &str, pair: &str, debounce_ms: u64) {
    stderr_writeln(&format!(
        "swapquote watch\n===============\nVersion  : v{version}\nPair     : {pair}\nDebounce : {debounce_ms} ms\n\nType an amount per line; an empty line clears it. Ctrl-D to quit."
    ));
}

/// Human-readable table of a snapshot. `*` marks the selected quote.
pub fn render_quotes(snap: &QuoteSetSnapshot, native_symbol: &str, fiat: &str) -> String {
    let mut out = String::new();
    if let Some(req) = &snap.request {
        let _w = writeln!(
            out,
            "{} {} -> {} [{}]",
            req.amount,
            req.sell_token.symbol,
            req.buy_token.symbol,
            snap.phase.as_str()
        );
    }
    if let Some(e) = &snap.error {
        let _w = writeln!(out, "error ({}): {}", e.code, e.message);
    }
    if snap.is_no_route() {
        out.push_str("no route available\n");
        return out;
    }
    if snap.phase != Phase::Settled {
        return out;
    }

    for (i, q) in snap.quotes.iter().enumerate() {
        let mark = if snap.selected == Some(i) { '*' } else { ' ' };
        let fiat_gas = q
            .gas_cost
            .fiat_human
            .as_deref()
            .map(|f| format!(" (~{f} {fiat})"))
            .unwrap_or_default();
        let approval = if q.needs_approval {
            "  approval needed"
        } else {
            ""
        };
        let _w = writeln!(
            out,
            "{mark} {:<14} {} {:<8} {:<28} gas {} {native_symbol}{fiat_gas}  -{}{approval}",
            q.provider,
            q.buy_amount_human,
            q.buy_token.symbol,
            q.price_text,
            q.gas_cost.native_human,
            q.slippage_text,
        );
    }
    out
}

pub fn print_quotes(snap: &QuoteSetSnapshot, native_symbol: &str, fiat: &str) {
    let s = render_quotes(snap, native_symbol, fiat);
    stderr_writeln(s.trim_end());
}
