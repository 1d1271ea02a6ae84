use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::BackoffConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Quote aggregator base URL. Quotes are fetched from `{base}/api/trade/quotes`.
    pub quote_base_url: String,
    /// Tried in order after the primary fails.
    pub fallback_quote_base_urls: Vec<String>,
    /// Binance public API base URL (keyless). Used for the native token fiat rate.
    pub binance_base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            quote_base_url: "http://127.0.0.1:3000".into(),
            fallback_quote_base_urls: vec![],
            binance_base_url: "https://api.binance.com".into(),
            request_timeout_seconds: 20,
        }
    }
}

impl HttpConfig {
    /// Primary then fallbacks, blanks and duplicates removed.
    pub fn quote_base_urls(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for u in std::iter::once(&self.quote_base_url).chain(&self.fallback_quote_base_urls) {
            let u = u.trim().trim_end_matches('/');
            if !u.is_empty() && !out.iter().any(|o| o == u) {
                out.push(u.to_owned());
            }
        }
        out
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

/// The chain's gas token. Gas cost is denominated in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeTokenConfig {
    pub symbol: String,
    pub decimals: u8,
}

impl Default for NativeTokenConfig {
    fn default() -> Self {
        Self {
            symbol: "BNB".into(),
            decimals: 18,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    pub refresh_seconds: u64,
    /// Used until the first successful fetch, when every fetch has failed so far.
    pub fallback_rate: Option<f64>,
    /// Reference fiat the rate is quoted in (display label).
    pub fiat: String,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            refresh_seconds: 30,
            fallback_rate: None,
            fiat: "USD".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub rounds: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let b = BackoffConfig::default();
        Self {
            rounds: b.rounds,
            base_delay_ms: u64::try_from(b.base_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(b.max_delay.as_millis()).unwrap_or(u64::MAX),
            jitter_max_ms: b.jitter_max_ms,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            rounds: self.rounds.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_max_ms: self.jitter_max_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub http: HttpConfig,
    pub native: NativeTokenConfig,
    pub rates: RateConfig,
    pub retry: RetryConfig,
    /// Quiet period before a changed input is sent to providers.
    pub debounce_ms: u64,
    /// Optional JSON token list used to resolve symbols on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_list_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            native: NativeTokenConfig::default(),
            rates: RateConfig::default(),
            retry: RetryConfig::default(),
            debounce_ms: 600,
            token_list_path: None,
        }
    }
}

impl EngineConfig {
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

pub fn allow_insecure_http() -> bool {
    std::env::var("SWAPQUOTE_ALLOW_INSECURE_HTTP")
        .ok()
        .is_some_and(|v| {
            matches!(
                v.as_str(),
                "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON"
            )
        })
}

pub fn is_loopback_http(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let u = url.trim();
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

/// Base URLs must be https, or plain http on loopback, unless insecure http is allowed.
pub fn ensure_secure_base_url(name: &str, url: &str) -> eyre::Result<()> {
    let u = url.trim();
    if u.starts_with("https://") || is_loopback_http(u) || allow_insecure_http() {
        return Ok(());
    }
    eyre::bail!(
        "{name} must use https (or loopback); set SWAPQUOTE_ALLOW_INSECURE_HTTP=1 to override"
    )
}
