//! Exponential backoff retry policy for the Workflow Executor (spec §4.5,
//! §7).
//!
//! `delay(i) = seconds * multiplier.powi(i - 1)` for retry attempt `i >= 1`;
//! the first (non-retry) attempt never waits. There is deliberately no
//! jitter — retries are meant to be reproducible in tests and logs.

use std::future::Future;
use std::time::Duration;

use apiflow_core::ExponentialBackoff;

/// The delay before retry attempt `i` (1-indexed: `i == 1` is the first
/// retry after the original attempt). `i == 0` — the original attempt —
/// always returns [`Duration::ZERO`].
#[must_use]
pub fn delay_for_attempt(backoff: &ExponentialBackoff, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let seconds = backoff.seconds * backoff.multiplier.powi((attempt - 1) as i32);
    Duration::from_secs_f64(seconds.max(0.0))
}

/// Runs `op` until it succeeds, `should_retry` rejects the error, or the
/// policy's retry budget (`exponential.attempts`) is exhausted.
///
/// `op` is called once up front with no delay. Each subsequent call is
/// preceded by [`delay_for_attempt`]'s wait for that retry's index.
pub async fn retry<T, E, F, Fut>(
    backoff: &ExponentialBackoff,
    mut should_retry: impl FnMut(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = match op().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    for attempt in 1..backoff.attempts {
        if !should_retry(&last_err) {
            return Err(last_err);
        }
        let delay = delay_for_attempt(backoff, attempt);
        if !delay.is_zero() {
            tracing::debug!(attempt, delay_secs = delay.as_secs_f64(), "waiting before retry");
            tokio::time::sleep(delay).await;
        }
        last_err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
    }

    Err(last_err)
}
