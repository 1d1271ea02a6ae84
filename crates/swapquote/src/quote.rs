use alloy::primitives::{Address, Bytes, U256};
use serde::Serialize;

use crate::{amount, errors::ErrorSummary, gas::GasCost, token::TokenRef};

/// Unsigned transaction a wallet would sign to execute a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    #[serde(serialize_with = "amount::serialize_dec")]
    pub value: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(
        serialize_with = "amount::serialize_dec_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub gas_price: Option<U256>,
}

/// One provider's route, normalized so routes from different providers compare directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub provider: String,

    pub sell_token: TokenRef,
    pub buy_token: TokenRef,
    #[serde(serialize_with = "amount::serialize_dec")]
    pub sell_amount: U256,
    #[serde(serialize_with = "amount::serialize_dec")]
    pub buy_amount: U256,
    pub sell_amount_human: String,
    pub buy_amount_human: String,

    pub estimated_gas: u64,
    #[serde(serialize_with = "amount::serialize_dec")]
    pub gas_price: U256,
    pub gas_cost: GasCost,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowance_target: Option<Address>,
    pub needs_approval: bool,

    /// `buy / sell` in human units; display only.
    pub price: f64,
    pub price_text: String,

    #[serde(
        serialize_with = "amount::serialize_dec_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub net_value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_value_human: Option<String>,

    /// Shortfall versus the best quote in millionths of a percent (exact integer).
    pub slippage_micro_pct: u64,
    pub slippage_pct: f64,
    pub slippage_text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<TxDescriptor>,
}

/// The logical unit of debouncing. Any field change supersedes the previous request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub sell_token: TokenRef,
    pub buy_token: TokenRef,
    pub amount: String,
    pub generation: u64,
}

impl QuoteRequest {
    /// True when `(sell, buy, amount)` describe the same input as this request.
    pub fn same_input(&self, sell: &TokenRef, buy: &TokenRef, amount: &str) -> bool {
        self.sell_token.same_asset(sell)
            && self.buy_token.same_asset(buy)
            && self.amount.trim() == amount.trim()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Debouncing,
    InFlight,
    Settled,
    Failed,
}

impl Phase {
    pub const fn is_loading(self) -> bool {
        matches!(self, Self::Debouncing | Self::InFlight)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Debouncing => "debouncing",
            Self::InFlight => "in_flight",
            Self::Settled => "settled",
            Self::Failed => "failed",
        }
    }
}

/// Immutable view of the engine's current quote set, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSetSnapshot {
    pub phase: Phase,
    pub request: Option<QuoteRequest>,
    /// Ranked best-first.
    pub quotes: Vec<Quote>,
    pub selected: Option<usize>,
    pub loading: bool,
    pub error: Option<ErrorSummary>,
}

impl QuoteSetSnapshot {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn selected_quote(&self) -> Option<&Quote> {
        self.selected.and_then(|i| self.quotes.get(i))
    }

    pub fn best(&self) -> Option<&Quote> {
        self.quotes.first()
    }

    /// A finished request that produced nothing rankable.
    pub fn is_no_route(&self) -> bool {
        matches!(self.phase, Phase::Settled | Phase::Failed) && self.quotes.is_empty()
    }
}
