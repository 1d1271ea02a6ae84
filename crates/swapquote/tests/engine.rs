use alloy::primitives::{address, Address, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use swapquote::{
    price::RateFeed, token::NATIVE_TOKEN_ADDRESS, transport::QuoteTransport, EngineOptions, Phase,
    QuoteEngine, QuoteError, QuoteSetSnapshot, TokenRef,
};

const USDT: Address = address!("0x55d398326f99059fF775485246999027B3197955");
const WALLET: Address = address!("0x1111111111111111111111111111111111111111");

fn bnb() -> TokenRef {
    TokenRef {
        address: NATIVE_TOKEN_ADDRESS,
        symbol: "BNB".into(),
        name: "BNB".into(),
        decimals: 18,
        fiat_rate: Some(600.0_f64),
        icon: None,
    }
}

fn usdt() -> TokenRef {
    TokenRef {
        address: USDT,
        symbol: "USDT".into(),
        name: "Tether USD".into(),
        decimals: 6,
        fiat_rate: Some(1.0_f64),
        icon: None,
    }
}

fn raw(provider: &str, sell: &str, buy: &str) -> Value {
    json!({
        "provider": provider,
        "sellAmount": sell,
        "buyAmount": buy,
        "estimatedGas": 150_000,
        "gasPrice": "5000000000",
    })
}

#[derive(Debug, Clone)]
struct Reply {
    delay: Duration,
    result: Result<Vec<Value>, QuoteError>,
    /// When false the call keeps running after cancellation, like a server that already answered.
    honor_cancel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    amount: U256,
    wallet: Option<Address>,
}

/// Replies keyed by sell amount; records every call and every call that ran to completion.
#[derive(Default)]
struct ScriptedTransport {
    replies: Mutex<HashMap<U256, Reply>>,
    calls: Mutex<Vec<Call>>,
    completed: Mutex<u32>,
}

impl ScriptedTransport {
    fn reply(&self, amount: U256, reply: Reply) {
        if let Ok(mut r) = self.replies.lock() {
            r.insert(amount, reply);
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn completed(&self) -> u32 {
        self.completed.lock().map(|c| *c).unwrap_or_default()
    }
}

#[async_trait]
impl QuoteTransport for ScriptedTransport {
    async fn fetch_quotes(
        &self,
        _sell: Address,
        _buy: Address,
        amount: U256,
        wallet: Option<Address>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, QuoteError> {
        if let Ok(mut c) = self.calls.lock() {
            c.push(Call { amount, wallet });
        }
        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|r| r.get(&amount).cloned())
            .unwrap_or(Reply {
                delay: Duration::from_millis(10),
                result: Ok(vec![]),
                honor_cancel: true,
            });

        if reply.honor_cancel {
            tokio::select! {
                () = cancel.cancelled() => return Err(QuoteError::Cancelled),
                () = tokio::time::sleep(reply.delay) => {}
            }
        } else {
            tokio::time::sleep(reply.delay).await;
        }
        if let Ok(mut n) = self.completed.lock() {
            *n += 1;
        }
        reply.result
    }
}

fn ok(delay_ms: u64, quotes: Vec<Value>) -> Reply {
    Reply {
        delay: Duration::from_millis(delay_ms),
        result: Ok(quotes),
        honor_cancel: true,
    }
}

fn one_bnb() -> U256 {
    U256::from(1_000_000_000_000_000_000_u128)
}

fn engine(transport: &Arc<ScriptedTransport>) -> QuoteEngine {
    QuoteEngine::spawn(
        Arc::clone(transport) as Arc<dyn QuoteTransport>,
        RateFeed::fixed(Some(600.0_f64)),
        EngineOptions::default(),
    )
}

async fn wait_for(
    rx: &mut watch::Receiver<QuoteSetSnapshot>,
    pred: impl FnMut(&QuoteSetSnapshot) -> bool,
) -> eyre::Result<QuoteSetSnapshot> {
    let snap = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(pred))
        .await
        .map_err(|_e| eyre::eyre!("timed out waiting for snapshot"))??
        .clone();
    Ok(snap)
}

async fn idle_for(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn debounces_bursts_into_one_request_and_ranks_result() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    t.reply(
        one_bnb(),
        ok(
            50,
            vec![
                raw("LiFi", "1000000000000000000", "990000"),
                raw("1inch", "1000000000000000000", "1000000"),
                raw("Dead", "1000000000000000000", "0"),
            ],
        ),
    );
    let e = engine(&t);
    let mut rx = e.subscribe();

    for amount in ["0", "0.", "1"] {
        e.set_input(Some(bnb()), Some(usdt()), amount)?;
        idle_for(100).await;
    }
    let debouncing = e.snapshot();
    assert_eq!(debouncing.phase, Phase::Debouncing);
    assert!(debouncing.loading);
    assert!(t.calls().is_empty(), "fetched before the input settled");

    let snap = wait_for(&mut rx, |s| s.phase == Phase::Settled).await?;
    assert_eq!(t.calls().len(), 1);
    assert_eq!(t.calls()[0].amount, one_bnb());

    assert!(!snap.loading);
    let names: Vec<&str> = snap.quotes.iter().map(|q| q.provider.as_str()).collect();
    assert_eq!(names, vec!["1inch", "LiFi"]);
    assert_eq!(snap.selected, Some(0));
    assert_eq!(snap.quotes[0].slippage_text, "0.00%");
    assert_eq!(snap.quotes[1].slippage_text, "1.00%");
    assert_eq!(snap.quotes[0].gas_cost.fiat_human.as_deref(), Some("0.450000"));
    assert_eq!(
        snap.request.as_ref().map(|r| r.amount.as_str()),
        Some("1")
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stale_response_is_never_published() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    let a = U256::from(1_000_000_u64);
    let b = U256::from(2_000_000_u64);
    // A ignores cancellation and answers late; B answers quickly.
    t.reply(
        a,
        Reply {
            delay: Duration::from_millis(2_000),
            result: Ok(vec![raw("A-route", "1000000", "5")]),
            honor_cancel: false,
        },
    );
    t.reply(b, ok(100, vec![raw("B-route", "2000000", "9")]));

    let e = engine(&t);
    let mut rx = e.subscribe();
    let six = || TokenRef {
        decimals: 6,
        ..bnb()
    };

    e.set_input(Some(six()), Some(usdt()), "1")?;
    wait_for(&mut rx, |s| s.phase == Phase::InFlight).await?;
    e.set_input(Some(six()), Some(usdt()), "2")?;

    let snap = wait_for(&mut rx, |s| s.phase == Phase::Settled).await?;
    assert_eq!(snap.quotes.len(), 1);
    assert_eq!(snap.quotes[0].provider, "B-route");

    // Let A's late answer arrive; nothing may change.
    idle_for(5_000).await;
    let after = e.snapshot();
    assert_eq!(after, snap);
    assert!(after.quotes.iter().all(|q| q.provider != "A-route"));
    assert_eq!(t.calls().len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn clearing_the_amount_clears_immediately_and_aborts_the_call() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    t.reply(one_bnb(), ok(10_000, vec![raw("slow", "1000000000000000000", "1")]));
    let e = engine(&t);
    let mut rx = e.subscribe();

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    wait_for(&mut rx, |s| s.phase == Phase::InFlight).await?;

    e.set_input(Some(bnb()), Some(usdt()), "")?;
    let snap = wait_for(&mut rx, |s| s.phase == Phase::Idle).await?;
    assert!(snap.quotes.is_empty());
    assert!(snap.request.is_none());
    assert!(!snap.loading);

    idle_for(20_000).await;
    assert_eq!(t.completed(), 0, "superseded call kept running");
    assert_eq!(e.snapshot().phase, Phase::Idle);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn invalid_amount_issues_no_request() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    let e = engine(&t);
    let mut rx = e.subscribe();

    e.set_input(Some(bnb()), Some(usdt()), "1,5")?;
    let snap = wait_for(&mut rx, |s| s.error.is_some()).await?;
    assert_eq!(snap.phase, Phase::Idle);
    assert!(snap.quotes.is_empty());
    assert_eq!(snap.error.as_ref().map(|e| e.code), Some("invalid_amount"));

    e.set_input(Some(bnb()), Some(usdt()), "0")?;
    idle_for(1_000).await;
    assert_eq!(e.snapshot().error.map(|e| e.code), Some("invalid_amount"));
    assert!(t.calls().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transport_failure_publishes_empty_failed_set() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    t.reply(
        one_bnb(),
        Reply {
            delay: Duration::from_millis(10),
            result: Err(QuoteError::TransportFailure("http 502".into())),
            honor_cancel: true,
        },
    );
    let e = engine(&t);
    let mut rx = e.subscribe();

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    let snap = wait_for(&mut rx, |s| s.phase == Phase::Failed).await?;
    assert!(snap.quotes.is_empty());
    assert!(snap.is_no_route());
    assert_eq!(snap.error.map(|e| e.code), Some("transport_failure"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelled_result_is_dropped_without_publishing() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    t.reply(
        one_bnb(),
        Reply {
            delay: Duration::from_millis(10),
            result: Err(QuoteError::Cancelled),
            honor_cancel: true,
        },
    );
    let e = engine(&t);
    let mut rx = e.subscribe();

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    let in_flight = wait_for(&mut rx, |s| s.phase == Phase::InFlight).await?;
    idle_for(1_000).await;

    assert_eq!(t.completed(), 1);
    assert!(!rx.has_changed()?, "cancelled result was published");
    assert_eq!(e.snapshot(), in_flight);
    assert!(e.snapshot().error.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn only_zero_output_routes_means_no_route() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    t.reply(
        one_bnb(),
        ok(
            10,
            vec![
                raw("Dead", "1000000000000000000", "0"),
                json!({"provider": "Broken", "buyAmount": "1x"}),
            ],
        ),
    );
    let e = engine(&t);
    let mut rx = e.subscribe();

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    let snap = wait_for(&mut rx, |s| s.phase == Phase::Settled).await?;
    assert!(snap.is_no_route());
    assert_eq!(snap.selected, None);
    assert!(snap.error.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn selection_can_be_overridden() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    t.reply(
        one_bnb(),
        ok(
            10,
            vec![
                raw("1inch", "1000000000000000000", "1000000"),
                raw("LiFi", "1000000000000000000", "990000"),
            ],
        ),
    );
    let e = engine(&t);
    let mut rx = e.subscribe();

    assert_eq!(
        e.select_quote("1inch").await,
        Err(QuoteError::UnknownProvider("1inch".into()))
    );

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    wait_for(&mut rx, |s| s.phase == Phase::Settled).await?;
    e.select_quote("LiFi").await?;
    let snap = e.snapshot();
    assert_eq!(snap.selected_quote().map(|q| q.provider.as_str()), Some("LiFi"));
    assert_eq!(snap.best().map(|q| q.provider.as_str()), Some("1inch"));
    assert!(matches!(
        e.select_quote("Paraswap").await,
        Err(QuoteError::UnknownProvider(_))
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn resubmitting_the_same_input_is_a_no_op() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    t.reply(one_bnb(), ok(10, vec![raw("1inch", "1000000000000000000", "1")]));
    let e = engine(&t);
    let mut rx = e.subscribe();

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    idle_for(300).await;
    e.set_input(Some(bnb()), Some(usdt()), " 1 ")?;
    let first = wait_for(&mut rx, |s| s.phase == Phase::Settled).await?;

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    idle_for(2_000).await;
    assert_eq!(t.calls().len(), 1);
    assert_eq!(e.snapshot(), first);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_skips_debounce_and_reissues() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    t.reply(one_bnb(), ok(10, vec![raw("1inch", "1000000000000000000", "1")]));
    let e = engine(&t);
    let mut rx = e.subscribe();

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    let first = wait_for(&mut rx, |s| s.phase == Phase::Settled).await?;

    let gen = |s: &QuoteSetSnapshot| s.request.as_ref().map(|r| r.generation);
    let before = gen(&first);
    e.refresh()?;
    // No debounce: the new request is in flight right away.
    idle_for(1).await;
    assert_eq!(t.calls().len(), 2);
    let second = wait_for(&mut rx, |s| s.phase == Phase::Settled && gen(s) > before).await?;
    assert_eq!(second.quotes.len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn swap_sides_and_reset_return_to_idle() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    let e = engine(&t);
    let mut rx = e.subscribe();

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    wait_for(&mut rx, |s| s.phase == Phase::Settled).await?;

    e.swap_sides()?;
    let swapped = wait_for(&mut rx, |s| s.phase == Phase::Idle).await?;
    assert!(swapped.request.is_none());

    // The engine now holds USDT -> BNB with a blank amount; typing an amount quotes that pair.
    e.set_input(Some(usdt()), Some(bnb()), "2")?;
    let snap = wait_for(&mut rx, |s| s.phase == Phase::Settled).await?;
    assert_eq!(snap.request.as_ref().map(|r| r.sell_token.symbol.as_str()), Some("USDT"));
    assert_eq!(t.calls().last().map(|c| c.amount), Some(U256::from(2_000_000_u64)));

    e.reset()?;
    let reset = wait_for(&mut rx, |s| s.phase == Phase::Idle).await?;
    assert!(reset.quotes.is_empty());
    assert!(reset.request.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn wallet_change_requotes_with_new_sender() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    let e = engine(&t);
    let mut rx = e.subscribe();

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    wait_for(&mut rx, |s| s.phase == Phase::Settled).await?;
    e.set_wallet(Some(WALLET))?;
    wait_for(&mut rx, |s| s.phase == Phase::Debouncing).await?;
    wait_for(&mut rx, |s| s.phase == Phase::Settled).await?;

    let calls = t.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].wallet, None);
    assert_eq!(calls[1].wallet, Some(WALLET));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_pending_work_and_rejects_commands() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    t.reply(one_bnb(), ok(10_000, vec![raw("slow", "1000000000000000000", "1")]));
    let e = engine(&t);
    let mut rx = e.subscribe();

    e.set_input(Some(bnb()), Some(usdt()), "1")?;
    wait_for(&mut rx, |s| s.phase == Phase::InFlight).await?;
    e.shutdown().await;

    let last = rx.borrow().clone();
    assert_eq!(last.phase, Phase::Idle);
    assert!(last.quotes.is_empty());

    idle_for(20_000).await;
    assert_eq!(*rx.borrow(), last, "state changed after teardown");
    assert_eq!(t.completed(), 0, "pending call survived teardown");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_the_actor() -> eyre::Result<()> {
    let t = Arc::new(ScriptedTransport::default());
    let e = engine(&t);
    let mut rx = e.subscribe();
    drop(e);
    // The actor exits once it sees the shutdown; the snapshot sender goes with it.
    assert!(rx.changed().await.is_err() || rx.changed().await.is_err());
    Ok(())
}
