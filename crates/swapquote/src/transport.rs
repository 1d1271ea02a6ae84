//! Provider query transport.
//!
//! The aggregator answers `GET {base}/api/trade/quotes?src=&dst=&amount=&from=` with
//! `{ "data": [ rawQuote, ... ] }`; each raw quote is handed to the normalizer untouched.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use eyre::Context as _;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ensure_secure_base_url, EngineConfig},
    errors::QuoteError,
    retry::{try_all_with_backoff, BackoffConfig},
};

#[async_trait]
pub trait QuoteTransport: Send + Sync {
    /// Fetch raw provider quotes for selling `amount` base units of `sell` for `buy`.
    ///
    /// Must return `QuoteError::Cancelled` promptly once `cancel` fires.
    async fn fetch_quotes(
        &self,
        sell: Address,
        buy: Address,
        amount: U256,
        wallet: Option<Address>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, QuoteError>;
}

#[derive(Debug, Deserialize)]
struct QuotesEnvelope {
    #[serde(default)]
    data: Option<Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct HttpQuoteTransport {
    client: reqwest::Client,
    base_urls: Vec<String>,
    backoff: BackoffConfig,
}

impl HttpQuoteTransport {
    pub fn new(cfg: &EngineConfig) -> eyre::Result<Self> {
        let base_urls = cfg.http.quote_base_urls();
        if base_urls.is_empty() {
            eyre::bail!("no quote base url configured");
        }
        for u in &base_urls {
            ensure_secure_base_url("quote_base_url", u)?;
        }
        let client = reqwest::Client::builder()
            .timeout(cfg.http.request_timeout())
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_urls,
            backoff: cfg.retry.backoff(),
        })
    }

    async fn fetch_from(
        &self,
        base: &str,
        sell: Address,
        buy: Address,
        amount: U256,
        wallet: Option<Address>,
    ) -> Result<Vec<Value>, QuoteError> {
        let url = format!("{base}/api/trade/quotes");
        let from = wallet.map(|w| format!("{w:#x}")).unwrap_or_default();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("src", format!("{sell:#x}")),
                ("dst", format!("{buy:#x}")),
                ("amount", amount.to_string()),
                ("from", from),
            ])
            .send()
            .await
            .map_err(|e| QuoteError::TransportFailure(format!("{url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(QuoteError::TransportFailure(format!("{url}: http {status}")));
        }
        let env: QuotesEnvelope = resp
            .json()
            .await
            .map_err(|e| QuoteError::TransportFailure(format!("{url}: decode quotes json: {e}")))?;
        Ok(env.data.unwrap_or_default())
    }
}

#[async_trait]
impl QuoteTransport for HttpQuoteTransport {
    async fn fetch_quotes(
        &self,
        sell: Address,
        buy: Address,
        amount: U256,
        wallet: Option<Address>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, QuoteError> {
        let quotes = try_all_with_backoff(&self.base_urls, &self.backoff, cancel, |base| {
            let base = base.clone();
            async move { self.fetch_from(&base, sell, buy, amount, wallet).await }
        })
        .await?;
        tracing::debug!(count = quotes.len(), "fetched raw provider quotes");
        Ok(quotes)
    }
}
