#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use eyre::Context as _;
use std::{io::Write as _, path::PathBuf, sync::Arc, time::Duration};
use tokio::io::AsyncBufReadExt as _;
use tracing_subscriber::prelude::*;

use swapquote::{
    amount, cli_output,
    config::EngineConfig,
    paths::SwapquotePaths,
    price::RateFeed,
    store::ConfigStore,
    token::NATIVE_TOKEN_ADDRESS,
    transport::HttpQuoteTransport,
    EngineOptions, Phase, QuoteEngine, QuoteSetSnapshot, TokenList, TokenRef, TokenResolver as _,
};

#[derive(Parser, Debug)]
#[command(name = "swapquote", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Args, Debug)]
struct PairArgs {
    /// Token to sell: symbol or address from the token list, or `ADDRESS:SYMBOL:DECIMALS`.
    #[arg(long)]
    sell: String,
    /// Token to buy (same forms as `--sell`).
    #[arg(long)]
    buy: String,
    /// JSON token list (overrides `token_list_path` from config).
    #[arg(long)]
    tokens: Option<PathBuf>,
    /// Wallet that would execute the swap; passed to providers as `from`.
    #[arg(long)]
    wallet: Option<Address>,
    /// Use a fixed native fiat rate instead of fetching one.
    #[arg(long)]
    rate: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, rank and print quotes for one amount.
    Quote {
        #[command(flatten)]
        pair: PairArgs,
        /// Human amount of the sell token, e.g. `1.5`.
        #[arg(long)]
        amount: String,
        /// Emit the snapshot as JSON to stdout.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Read amounts from stdin, one per line, and print every settled quote set.
    ///
    /// Lines starting with `:` are commands: `:swap`, `:refresh`, `:reset`, `:select PROVIDER`.
    Watch {
        #[command(flatten)]
        pair: PairArgs,
        /// Emit snapshots as JSON lines to stdout.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print the effective configuration (config.toml plus env overrides).
    Config,
}

fn init_logging(paths: &SwapquotePaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("swapquote.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn write_stdout_line(s: &str) -> eyre::Result<()> {
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")
}

fn native_token(cfg: &EngineConfig) -> TokenRef {
    TokenRef {
        address: NATIVE_TOKEN_ADDRESS,
        symbol: cfg.native.symbol.clone(),
        name: cfg.native.symbol.clone(),
        decimals: cfg.native.decimals,
        fiat_rate: None,
        icon: None,
    }
}

fn load_tokens(cfg: &EngineConfig, path: Option<&PathBuf>) -> eyre::Result<TokenList> {
    let from_cfg = cfg.token_list_path.as_ref().map(PathBuf::from);
    let mut list = match path.or(from_cfg.as_ref()) {
        Some(p) => TokenList::load(p)?,
        None => TokenList::default(),
    };
    if list.get(&NATIVE_TOKEN_ADDRESS).is_none() {
        list.insert(native_token(cfg));
    }
    Ok(list)
}

/// `ADDRESS:SYMBOL:DECIMALS`, a listed address, or a listed symbol.
async fn resolve_token(list: &TokenList, arg: &str) -> eyre::Result<TokenRef> {
    let parts: Vec<&str> = arg.trim().split(':').collect();
    match parts.as_slice() {
        [addr, symbol, decimals] => Ok(TokenRef {
            address: addr
                .parse()
                .with_context(|| format!("invalid token address: {addr}"))?,
            symbol: (*symbol).to_owned(),
            name: (*symbol).to_owned(),
            decimals: decimals
                .parse()
                .with_context(|| format!("invalid token decimals: {decimals}"))?,
            fiat_rate: None,
            icon: None,
        }),
        [one] => match one.parse::<Address>() {
            Ok(addr) => list.resolve(addr).await,
            Err(_) => list.find(one),
        },
        _ => eyre::bail!("expected SYMBOL, ADDRESS or ADDRESS:SYMBOL:DECIMALS, got {arg}"),
    }
}

async fn rate_feed(cfg: &EngineConfig, fixed: Option<f64>) -> eyre::Result<RateFeed> {
    if fixed.is_some() {
        return Ok(RateFeed::fixed(fixed));
    }
    let feed = RateFeed::from_config(cfg)?;
    // Give the first fetch a moment so fiat gas costs show up on the first quote set.
    let mut rx = feed.subscribe();
    drop(tokio::time::timeout(Duration::from_secs(3), rx.wait_for(Option::is_some)).await);
    match feed.current() {
        Some(r) => tracing::info!(rate = r.rate, source = r.source.as_str(), "native fiat rate"),
        None => tracing::warn!("no native fiat rate yet; fiat gas costs hidden"),
    }
    Ok(feed)
}

struct Session {
    engine: QuoteEngine,
    sell: TokenRef,
    buy: TokenRef,
}

async fn resolve_pair(
    cfg: &EngineConfig,
    pair: &PairArgs,
) -> eyre::Result<(TokenRef, TokenRef)> {
    let tokens = load_tokens(cfg, pair.tokens.as_ref())?;
    let sell = resolve_token(&tokens, &pair.sell)
        .await
        .context("resolve --sell")?;
    let buy = resolve_token(&tokens, &pair.buy)
        .await
        .context("resolve --buy")?;
    if sell.same_asset(&buy) {
        eyre::bail!("sell and buy tokens must differ");
    }
    Ok((sell, buy))
}

async fn start_session(
    cfg: &EngineConfig,
    pair: &PairArgs,
    (sell, buy): (TokenRef, TokenRef),
) -> eyre::Result<Session> {
    let transport = HttpQuoteTransport::new(cfg)?;
    let rates = rate_feed(cfg, pair.rate).await?;
    let mut opts = EngineOptions::from_config(cfg);
    opts.wallet = pair.wallet;
    let engine = QuoteEngine::spawn(Arc::new(transport), rates, opts);
    Ok(Session { engine, sell, buy })
}

/// Settled, failed, or rejected before any request went out.
fn is_terminal(s: &QuoteSetSnapshot) -> bool {
    matches!(s.phase, Phase::Settled | Phase::Failed)
        || (s.phase == Phase::Idle && s.error.is_some())
}

fn emit(snap: &QuoteSetSnapshot, cfg: &EngineConfig, json: bool) -> eyre::Result<()> {
    if json {
        let s = serde_json::to_string(snap).context("serialize quotes")?;
        write_stdout_line(&s)
    } else {
        cli_output::print_quotes(snap, &cfg.native.symbol, &cfg.rates.fiat);
        Ok(())
    }
}

async fn run_quote(
    cfg: &EngineConfig,
    pair: &PairArgs,
    amount_s: &str,
    json: bool,
) -> eyre::Result<()> {
    let tokens = resolve_pair(cfg, pair).await?;
    // Reject bad input up front so it never costs a network round-trip.
    amount::to_base_units(amount_s, tokens.0.decimals)?;
    let session = start_session(cfg, pair, tokens).await?;

    let mut rx = session.engine.subscribe();
    session
        .engine
        .set_input(Some(session.sell.clone()), Some(session.buy.clone()), amount_s)?;
    session.engine.refresh()?;

    let wait = cfg
        .http
        .request_timeout()
        .saturating_mul(u32::try_from(cfg.retry.rounds.max(1)).unwrap_or(u32::MAX))
        .saturating_add(Duration::from_secs(5));
    let snap = tokio::time::timeout(wait, rx.wait_for(is_terminal))
        .await
        .context("timed out waiting for quotes")?
        .context("quote engine stopped")?
        .clone();
    session.engine.shutdown().await;

    emit(&snap, cfg, json)?;
    if let Some(e) = snap.error {
        eyre::bail!("{}", e.message);
    }
    Ok(())
}

async fn run_watch(cfg: &EngineConfig, pair: &PairArgs, json: bool) -> eyre::Result<()> {
    let session = start_session(cfg, pair, resolve_pair(cfg, pair).await?).await?;
    if !json {
        cli_output::print_watch_banner(
            env!("CARGO_PKG_VERSION"),
            &format!("{} -> {}", session.sell.symbol, session.buy.symbol),
            cfg.debounce_ms,
        );
    }

    let mut rx = session.engine.subscribe();
    let printer_cfg = cfg.clone();
    let printer = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snap = rx.borrow_and_update().clone();
            if is_terminal(&snap) {
                if let Err(e) = emit(&snap, &printer_cfg, json) {
                    tracing::warn!(error = %e, "failed to print quotes");
                }
            }
        }
    });

    let (mut sell, mut buy) = (session.sell.clone(), session.buy.clone());
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let line = line.trim();
        let engine = &session.engine;
        let res = match line.split_once(' ').map_or((line, ""), |(a, b)| (a, b.trim())) {
            (":swap", _) => {
                std::mem::swap(&mut sell, &mut buy);
                engine.swap_sides()
            }
            (":refresh", _) => engine.refresh(),
            (":reset", _) => engine.reset(),
            (":select", provider) => engine.select_quote(provider).await,
            _ => engine.set_input(Some(sell.clone()), Some(buy.clone()), line),
        };
        if let Err(e) = res {
            tracing::warn!(error = %e, "command rejected");
        }
    }

    // Let a pending request finish before tearing down.
    let mut done = session.engine.subscribe();
    drop(
        tokio::time::timeout(
            cfg.http.request_timeout().saturating_add(cfg.debounce()),
            done.wait_for(|s| !s.loading),
        )
        .await,
    );
    session.engine.shutdown().await;
    printer.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = SwapquotePaths::discover()?;
    paths.ensure_private_dirs()?;
    let _log_guard = init_logging(&paths);

    match cli.cmd {
        Command::Quote { pair, amount, json } => {
            let cfg = ConfigStore::new(&paths).load_or_init_default()?;
            run_quote(&cfg, &pair, &amount, json)
                .await
                .context("quote failed")
        }
        Command::Watch { pair, json } => {
            let cfg = ConfigStore::new(&paths).load_or_init_default()?;
            run_watch(&cfg, &pair, json).await.context("watch failed")
        }
        Command::Paths => {
            let s = serde_json::to_string(&paths).context("serialize paths")?;
            write_stdout_line(&s)
        }
        Command::Config => {
            let cfg = ConfigStore::new(&paths).load_or_init_default()?;
            let s = toml::to_string_pretty(&cfg).context("serialize config")?;
            write_stdout_line(s.trim_end())
        }
    }
}
