use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::QuoteError;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Number of full rounds. Each round tries every endpoint once.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each backoff sleep.
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            // Quotes go stale fast; a short bounded retry beats a long one.
            rounds: 2,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(2),
            jitter_max_ms: 150,
        }
    }
}

fn compute_backoff_delay(cfg: &BackoffConfig, round: usize) -> Duration {
    let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
    let pow2 = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let base_ms = u64::try_from(cfg.base_delay.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(cfg.max_delay.as_millis()).unwrap_or(u64::MAX);
    let ms = base_ms.saturating_mul(pow2).min(max_ms);
    let jitter = if cfg!(test) || cfg.jitter_max_ms == 0 {
        0
    } else {
        // Avoid holding a non-Send RNG across await points.
        let range = cfg.jitter_max_ms.saturating_add(1);
        if range == 0 {
            0
        } else {
            rand::random::<u64>() % range
        }
    };
    Duration::from_millis(ms.saturating_add(jitter))
}

/// Try `op(item)` across all items, in order, for `rounds` rounds. Between rounds, sleep with
/// exponential backoff + jitter, but only after every item has failed.
///
/// Every attempt and every sleep is raced against `cancel`; once it fires the in-flight attempt
/// is dropped and `QuoteError::Cancelled` is returned.
pub async fn try_all_with_backoff<I, T, Fut>(
    items: &[I],
    cfg: &BackoffConfig,
    cancel: &CancellationToken,
    mut op: impl FnMut(&I) -> Fut + Send,
) -> Result<T, QuoteError>
where
    I: Sync,
    Fut: std::future::Future<Output = Result<T, QuoteError>> + Send,
{
    if items.is_empty() {
        return Err(QuoteError::TransportFailure(
            "no endpoints configured".into(),
        ));
    }
    if cfg.rounds == 0 {
        return Err(QuoteError::TransportFailure(
            "invalid backoff config: rounds=0".into(),
        ));
    }

    let mut last_err: Option<QuoteError> = None;

    for round in 0..cfg.rounds {
        for item in items {
            let res = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(QuoteError::Cancelled),
                r = op(item) => r,
            };
            match res {
                Ok(v) => return Ok(v),
                Err(QuoteError::Cancelled) => return Err(QuoteError::Cancelled),
                Err(e) => {
                    tracing::debug!(error = %e, round, "endpoint attempt failed");
                    last_err = Some(e);
                }
            }
        }

        if round + 1 < cfg.rounds {
            let d = compute_backoff_delay(cfg, round);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(QuoteError::Cancelled),
                () = tokio::time::sleep(d) => {}
            }
        }
    }

    Err(last_err.unwrap_or_else(|| QuoteError::TransportFailure("unknown error".into())))
}
