//! Swap-quote aggregation and pricing.
//!
//! [`engine::QuoteEngine`] turns a changing `(sell, buy, amount)` input into a ranked,
//! continuously updated set of provider quotes. Amounts stay in integer base units end to
//! end; floats appear only in [`financial_math`] for fiat and display values.

pub mod amount;
pub mod cli_output;
pub mod config;
pub mod engine;
pub mod errors;
pub mod financial_math;
pub mod fsutil;
pub mod gas;
pub mod normalize;
pub mod paths;
pub mod price;
pub mod quote;
pub mod rank;
pub mod retry;
pub mod store;
pub mod token;
pub mod transport;

pub use engine::{EngineOptions, QuoteEngine};
pub use errors::{ErrorSummary, QuoteError};
pub use quote::{Phase, Quote, QuoteRequest, QuoteSetSnapshot};
pub use token::{TokenList, TokenRef, TokenResolver};
