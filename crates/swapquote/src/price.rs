//! Native gas token fiat rate, refreshed in the background.

use async_trait::async_trait;
use eyre::Context as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    config::{ensure_secure_base_url, EngineConfig},
    financial_math,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Binance,
    Fallback,
    Fixed,
}

impl PriceSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Fallback => "fallback",
            Self::Fixed => "fixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NativeRate {
    pub rate: f64,
    pub source: PriceSource,
}

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rate(&self) -> eyre::Result<f64>;
}

#[derive(Debug, Deserialize)]
struct BinanceTickerPrice {
    price: String,
}

fn is_stable_symbol(symbol: &str) -> bool {
    ["USD", "USDT", "USDC"]
        .iter()
        .any(|s| symbol.eq_ignore_ascii_case(s))
}

/// `{symbol}USDT` spot price from the keyless Binance ticker.
#[derive(Debug, Clone)]
pub struct BinanceRateSource {
    client: Client,
    base_url: String,
    symbol: String,
}

impl BinanceRateSource {
    pub fn new(cfg: &EngineConfig) -> eyre::Result<Self> {
        let base_url = cfg.http.binance_base_url.trim().trim_end_matches('/').to_owned();
        ensure_secure_base_url("binance_base_url", &base_url)?;
        let client = Client::builder()
            .timeout(cfg.http.request_timeout())
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url,
            symbol: cfg.native.symbol.trim().to_uppercase(),
        })
    }
}

#[async_trait]
impl RateSource for BinanceRateSource {
    async fn fetch_rate(&self) -> eyre::Result<f64> {
        if is_stable_symbol(&self.symbol) {
            return Ok(1.0_f64);
        }
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}USDT",
            self.base_url, self.symbol
        );
        let v: BinanceTickerPrice = self
            .client
            .get(url)
            .send()
            .await
            .context("binance request")?
            .error_for_status()
            .context("binance status")?
            .json()
            .await
            .context("binance json")?;
        let p: f64 = v.price.trim().parse().context("parse binance price")?;
        if !financial_math::is_valid_rate(p) {
            eyre::bail!("binance returned an unusable price: {p}");
        }
        Ok(p)
    }
}

/// Owns the refresh task. Dropping the feed stops it.
#[derive(Debug)]
pub struct RateFeed {
    rx: watch::Receiver<Option<NativeRate>>,
    refresh: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl RateFeed {
    /// Spawn the refresh loop. The first fetch starts immediately.
    pub fn spawn(
        source: Arc<dyn RateSource>,
        interval: Duration,
        fallback_rate: Option<f64>,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let refresh = Arc::new(Notify::new());
        let wake = Arc::clone(&refresh);
        let fallback = fallback_rate.filter(|r| financial_math::is_valid_rate(*r));
        let interval = interval.max(Duration::from_secs(1));

        let task = tokio::spawn(async move {
            loop {
                match source.fetch_rate().await {
                    Ok(rate) if financial_math::is_valid_rate(rate) => {
                        debug!(rate, "native rate refreshed");
                        tx.send_replace(Some(NativeRate {
                            rate,
                            source: PriceSource::Binance,
                        }));
                    }
                    Ok(rate) => warn!(rate, "ignoring unusable native rate"),
                    Err(e) => {
                        warn!(error = %e, "native rate refresh failed");
                        if let Some(rate) = fallback {
                            tx.send_if_modified(|cur| {
                                if cur.is_some() {
                                    return false;
                                }
                                *cur = Some(NativeRate {
                                    rate,
                                    source: PriceSource::Fallback,
                                });
                                true
                            });
                        }
                    }
                }

                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = wake.notified() => {}
                }
            }
        });

        Self {
            rx,
            refresh,
            task: Some(task),
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> eyre::Result<Self> {
        let source = BinanceRateSource::new(cfg)?;
        Ok(Self::spawn(
            Arc::new(source),
            Duration::from_secs(cfg.rates.refresh_seconds),
            cfg.rates.fallback_rate,
        ))
    }

    /// A feed that never refreshes. `None` means no fiat conversion is shown.
    pub fn fixed(rate: Option<f64>) -> Self {
        let value = rate
            .filter(|r| financial_math::is_valid_rate(*r))
            .map(|rate| NativeRate {
                rate,
                source: PriceSource::Fixed,
            });
        let (_tx, rx) = watch::channel(value);
        Self {
            rx,
            refresh: Arc::new(Notify::new()),
            task: None,
        }
    }

    pub fn current(&self) -> Option<NativeRate> {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<NativeRate>> {
        self.rx.clone()
    }

    /// Skip the remaining wait and fetch now.
    pub fn refresh_now(&self) {
        self.refresh.notify_one();
    }
}

impl Drop for RateFeed {
    fn drop(&mut self) {
        if let Some(t) = self.task.take() {
            t.abort();
        }
    }
}
