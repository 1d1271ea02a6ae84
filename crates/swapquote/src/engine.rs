//! Request lifecycle: debounce, fetch, normalize, rank, publish.
//!
//! A single actor task owns every piece of mutable state. The [`QuoteEngine`] handle sends it
//! commands and observes an immutable [`QuoteSetSnapshot`] through a watch channel.
//!
//! Each fetch runs in its own task tagged with the generation it was issued for. Any input
//! change bumps the generation and cancels the running fetch; a response is only applied when
//! its generation is still the one in flight, so a slow answer to an old input can never
//! overwrite fresher state.

use alloy::primitives::{Address, U256};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    amount,
    config::EngineConfig,
    errors::{ErrorSummary, QuoteError},
    normalize::{normalize_all, NormalizeContext},
    price::RateFeed,
    quote::{Phase, Quote, QuoteRequest, QuoteSetSnapshot},
    rank,
    token::TokenRef,
    transport::QuoteTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Quiet period an input must stay unchanged before it is sent to providers.
    pub debounce: Duration,
    pub native_decimals: u8,
    pub wallet: Option<Address>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(600),
            native_decimals: 18,
            wallet: None,
        }
    }
}

impl EngineOptions {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            debounce: cfg.debounce(),
            native_decimals: cfg.native.decimals,
            wallet: None,
        }
    }
}

#[derive(Debug)]
enum Command {
    SetInput {
        sell: Option<TokenRef>,
        buy: Option<TokenRef>,
        amount: String,
    },
    SelectQuote {
        provider: String,
        reply: oneshot::Sender<Result<(), QuoteError>>,
    },
    Reset,
    Refresh,
    SwapSides,
    SetWallet(Option<Address>),
    Shutdown,
}

struct FetchOutcome {
    generation: u64,
    sell_amount: U256,
    result: Result<Vec<Value>, QuoteError>,
}

struct InFlight {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl InFlight {
    fn abort(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

fn same_token(a: Option<&TokenRef>, b: Option<&TokenRef>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x.same_asset(y),
        (None, None) => true,
        (Some(_), None) | (None, Some(_)) => false,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

struct Actor {
    transport: Arc<dyn QuoteTransport>,
    rates: Option<RateFeed>,
    native_decimals: u8,
    debounce: Duration,

    sell: Option<TokenRef>,
    buy: Option<TokenRef>,
    amount: String,
    wallet: Option<Address>,

    generation: u64,
    phase: Phase,
    deadline: Option<Instant>,
    in_flight: Option<InFlight>,
    quotes: Vec<Quote>,
    selected: Option<usize>,
    error: Option<ErrorSummary>,

    /// Cleared on teardown; nothing is published afterwards.
    alive: bool,
    snapshots: watch::Sender<QuoteSetSnapshot>,
    results: mpsc::UnboundedSender<FetchOutcome>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut results: mpsc::UnboundedReceiver<FetchOutcome>,
    ) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        self.teardown();
                        break;
                    };
                    if !self.handle(cmd) {
                        break;
                    }
                }
                Some(outcome) = results.recv() => self.on_outcome(outcome),
                () = wait_until(deadline) => self.settle(),
            }
        }
    }

    /// Returns false once the actor should stop.
    fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::SetInput { sell, buy, amount } => self.set_input(sell, buy, amount),
            Command::SelectQuote { provider, reply } => {
                drop(reply.send(self.select(&provider)));
            }
            Command::Reset => {
                self.amount.clear();
                self.restart();
            }
            Command::Refresh => self.refresh(),
            Command::SwapSides => {
                std::mem::swap(&mut self.sell, &mut self.buy);
                self.amount.clear();
                self.restart();
            }
            Command::SetWallet(wallet) => {
                if wallet != self.wallet {
                    self.wallet = wallet;
                    if self.phase != Phase::Idle {
                        self.restart();
                    }
                }
            }
            Command::Shutdown => {
                self.teardown();
                return false;
            }
        }
        true
    }

    fn has_input(&self) -> bool {
        self.sell.is_some() && self.buy.is_some() && !self.amount.trim().is_empty()
    }

    fn request(&self) -> Option<QuoteRequest> {
        if !self.has_input() {
            return None;
        }
        Some(QuoteRequest {
            sell_token: self.sell.clone()?,
            buy_token: self.buy.clone()?,
            amount: self.amount.trim().to_owned(),
            generation: self.generation,
        })
    }

    fn native_rate(&self) -> Option<f64> {
        self.rates.as_ref().and_then(RateFeed::current).map(|r| r.rate)
    }

    fn publish(&self) {
        if !self.alive {
            return;
        }
        self.snapshots.send_replace(QuoteSetSnapshot {
            phase: self.phase,
            request: self.request(),
            quotes: self.quotes.clone(),
            selected: self.selected,
            loading: self.phase.is_loading(),
            error: self.error.clone(),
        });
    }

    /// Invalidate whatever request is pending or in flight and clear the quote set.
    fn supersede(&mut self) {
        if let Some(f) = self.in_flight.take() {
            debug!(generation = f.generation, "cancelling superseded quote request");
            f.abort();
        }
        self.deadline = None;
        self.generation = self.generation.wrapping_add(1);
        self.quotes.clear();
        self.selected = None;
        self.error = None;
    }

    /// Start over from the current input: debounce it if complete, otherwise go idle.
    fn restart(&mut self) {
        self.supersede();
        if self.has_input() {
            self.phase = Phase::Debouncing;
            self.deadline = Some(Instant::now() + self.debounce);
        } else {
            self.phase = Phase::Idle;
        }
        self.publish();
    }

    fn set_input(&mut self, sell: Option<TokenRef>, buy: Option<TokenRef>, amount: String) {
        let unchanged = same_token(self.sell.as_ref(), sell.as_ref())
            && same_token(self.buy.as_ref(), buy.as_ref())
            && self.amount.trim() == amount.trim();
        if unchanged && self.phase != Phase::Idle {
            return;
        }
        self.sell = sell;
        self.buy = buy;
        self.amount = amount;
        self.restart();
    }

    /// The quiet period elapsed (or a refresh skipped it): validate and issue the fetch.
    fn settle(&mut self) {
        self.deadline = None;
        let (Some(sell), Some(buy)) = (self.sell.as_ref(), self.buy.as_ref()) else {
            self.phase = Phase::Idle;
            self.publish();
            return;
        };

        let parsed = amount::to_base_units(&self.amount, sell.decimals).and_then(|a| {
            if a.is_zero() {
                Err(QuoteError::InvalidAmount(
                    "amount must be greater than zero".into(),
                ))
            } else {
                Ok(a)
            }
        });
        let sell_amount = match parsed {
            Ok(a) => a,
            Err(e) => {
                debug!(generation = self.generation, error = %e, "not requesting quotes");
                self.phase = Phase::Idle;
                self.error = Some(e.into());
                self.publish();
                return;
            }
        };

        let generation = self.generation;
        let (sell_addr, buy_addr, wallet) = (sell.address, buy.address, self.wallet);
        info!(
            generation,
            sell = %sell.symbol,
            buy = %buy.symbol,
            amount = %sell_amount,
            "requesting quotes"
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let transport = Arc::clone(&self.transport);
        let results = self.results.clone();
        let task = tokio::spawn(async move {
            let result = transport
                .fetch_quotes(sell_addr, buy_addr, sell_amount, wallet, &token)
                .await;
            drop(results.send(FetchOutcome {
                generation,
                sell_amount,
                result,
            }));
        });

        self.in_flight = Some(InFlight {
            generation,
            cancel,
            task,
        });
        self.phase = Phase::InFlight;
        self.publish();
    }

    fn on_outcome(&mut self, outcome: FetchOutcome) {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.generation == outcome.generation);
        if !self.alive || !current {
            debug!(
                generation = outcome.generation,
                "discarding response for superseded request"
            );
            return;
        }
        self.in_flight = None;

        match outcome.result {
            Ok(raws) => self.apply_quotes(&raws, outcome.sell_amount),
            Err(e) if e.is_cancelled() => {
                debug!(generation = outcome.generation, "quote request cancelled");
            }
            Err(e) => {
                warn!(generation = outcome.generation, error = %e, "quote request failed");
                self.phase = Phase::Failed;
                self.quotes.clear();
                self.selected = None;
                self.error = Some(e.into());
                self.publish();
            }
        }
    }

    fn apply_quotes(&mut self, raws: &[Value], sell_amount: U256) {
        let ranked = {
            let (Some(sell), Some(buy)) = (self.sell.as_ref(), self.buy.as_ref()) else {
                return;
            };
            let ctx = NormalizeContext {
                sell_token: sell,
                buy_token: buy,
                requested_sell_amount: sell_amount,
                native_decimals: self.native_decimals,
                native_fiat_rate: self.native_rate(),
                wallet: self.wallet,
            };
            rank::rank(normalize_all(raws, &ctx))
        };
        info!(
            generation = self.generation,
            received = raws.len(),
            ranked = ranked.quotes.len(),
            best = ranked.quotes.first().map_or("", |q| q.provider.as_str()),
            "quotes settled"
        );
        self.quotes = ranked.quotes;
        self.selected = ranked.best;
        self.error = None;
        self.phase = Phase::Settled;
        self.publish();
    }

    fn select(&mut self, provider: &str) -> Result<(), QuoteError> {
        if self.phase != Phase::Settled {
            return Err(QuoteError::UnknownProvider(provider.to_owned()));
        }
        let idx = self
            .quotes
            .iter()
            .position(|q| q.provider == provider)
            .ok_or_else(|| QuoteError::UnknownProvider(provider.to_owned()))?;
        self.selected = Some(idx);
        self.publish();
        Ok(())
    }

    fn refresh(&mut self) {
        if let Some(r) = &self.rates {
            r.refresh_now();
        }
        if self.has_input() {
            self.supersede();
            self.settle();
        }
    }

    fn teardown(&mut self) {
        self.supersede();
        self.sell = None;
        self.buy = None;
        self.amount.clear();
        self.phase = Phase::Idle;
        self.publish();
        self.alive = false;
        self.rates = None;
        info!("quote engine stopped");
    }
}

/// Handle to the quote engine actor. Dropping it tears the engine down.
#[derive(Debug)]
pub struct QuoteEngine {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<QuoteSetSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl QuoteEngine {
    /// Start the engine actor. Must be called within a tokio runtime.
    pub fn spawn(transport: Arc<dyn QuoteTransport>, rates: RateFeed, opts: EngineOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (res_tx, res_rx) = mpsc::unbounded_channel();
        let (snap_tx, snap_rx) = watch::channel(QuoteSetSnapshot::idle());

        let actor = Actor {
            transport,
            rates: Some(rates),
            native_decimals: opts.native_decimals,
            debounce: opts.debounce,
            sell: None,
            buy: None,
            amount: String::new(),
            wallet: opts.wallet,
            generation: 0,
            phase: Phase::Idle,
            deadline: None,
            in_flight: None,
            quotes: Vec::new(),
            selected: None,
            error: None,
            alive: true,
            snapshots: snap_tx,
            results: res_tx,
        };
        let task = tokio::spawn(actor.run(cmd_rx, res_rx));

        Self {
            commands: cmd_tx,
            snapshots: snap_rx,
            task: Some(task),
        }
    }

    fn send(&self, cmd: Command) -> Result<(), QuoteError> {
        self.commands
            .send(cmd)
            .map_err(|_e| QuoteError::EngineClosed)
    }

    /// Replace the current input. Incomplete input (missing token or blank amount) clears the
    /// published set immediately; anything else is quoted once it stays unchanged for the
    /// debounce period.
    pub fn set_input(
        &self,
        sell: Option<TokenRef>,
        buy: Option<TokenRef>,
        amount: impl Into<String>,
    ) -> Result<(), QuoteError> {
        self.send(Command::SetInput {
            sell,
            buy,
            amount: amount.into(),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<QuoteSetSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> QuoteSetSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Override the default best-quote selection.
    pub async fn select_quote(&self, provider: &str) -> Result<(), QuoteError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SelectQuote {
            provider: provider.to_owned(),
            reply,
        })?;
        rx.await.map_err(|_e| QuoteError::EngineClosed)?
    }

    /// Clear the amount and the quote set; tokens are kept.
    pub fn reset(&self) -> Result<(), QuoteError> {
        self.send(Command::Reset)
    }

    /// Re-issue the current request now, skipping the debounce, and refresh the fiat rate.
    pub fn refresh(&self) -> Result<(), QuoteError> {
        self.send(Command::Refresh)
    }

    /// Exchange sell and buy tokens and clear the amount.
    pub fn swap_sides(&self) -> Result<(), QuoteError> {
        self.send(Command::SwapSides)
    }

    pub fn set_wallet(&self, wallet: Option<Address>) -> Result<(), QuoteError> {
        self.send(Command::SetWallet(wallet))
    }

    /// Tear down and wait for the actor to finish. Pending requests are aborted.
    pub async fn shutdown(mut self) {
        drop(self.send(Command::Shutdown));
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "quote engine task ended abnormally");
            }
        }
    }
}

impl Drop for QuoteEngine {
    fn drop(&mut self) {
        if self.task.is_some() {
            drop(self.send(Command::Shutdown));
        }
    }
}
