//! Endpoint fallback with bounded exponential backoff.
//!
//! Transport-level only: used for reads and raw-transaction broadcast against a list of
//! RPC URLs. Pipeline steps never go through here a second time after a chain-level error.

use std::{future::Future, time::Duration};

#[derive(Debug, Clone)]
pub struct Backoff {
    /// Full passes over the endpoint list.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each sleep.
    pub jitter_max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

impl Backoff {
    /// No sleeping and a single pass.
    #[cfg(test)]
    pub const fn single_pass() -> Self {
        Self {
            rounds: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_max_ms: 0,
        }
    }

    fn delay_after(&self, round: usize) -> Duration {
        let shift = u32::try_from(round.min(16)).unwrap_or(16);
        let factor = 1_u32.checked_shl(shift).unwrap_or(u32::MAX);
        let exp = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_ms = if self.jitter_max_ms == 0 {
            0
        } else {
            rand::random::<u64>() % self.jitter_max_ms.saturating_add(1)
        };
        exp.saturating_add(Duration::from_millis(jitter_ms))
    }
}

/// Run `op` against each endpoint in order until one succeeds, for `cfg.rounds` passes.
/// Sleeps only after a whole pass has failed. The last error is returned with `label`.
pub async fn first_ok<E, T, Fut>(
    endpoints: &[E],
    cfg: &Backoff,
    mut op: impl FnMut(&E) -> Fut + Send,
    label: &'static str,
) -> eyre::Result<T>
where
    E: Sync,
    Fut: Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("{label}: no rpc endpoints configured");
    }
    if cfg.rounds == 0 {
        eyre::bail!("{label}: invalid backoff (rounds=0)");
    }

    let mut last_err: Option<eyre::Report> = None;
    for round in 0..cfg.rounds {
        for endpoint in endpoints {
            match op(endpoint).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::debug!(round, error = %format!("{e:#}"), "{label} attempt failed");
                    last_err = Some(e);
                }
            }
        }
        if round + 1 < cfg.rounds {
            tokio::time::sleep(cfg.delay_after(round)).await;
        }
    }

    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("unknown error"))
        .wrap_err(label))
}
