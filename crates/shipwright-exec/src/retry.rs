//! Retry and wait combinators.
//!
//! Both return a result-or-failure value instead of looping on bare sleeps,
//! so the update pipeline composes pull retries and health polling the same
//! way.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

// ─── Backoff ──────────────────────────────────────────────────────────────

/// Exponential backoff: the delay after attempt `n` (1-indexed) is
/// `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Every attempt failed; carries the last error.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Run `op` until it succeeds or `policy.max_attempts` is reached, sleeping
/// with exponential backoff in between.
///
/// `on_retry(attempt, &error, delay)` is called after each failed attempt that
/// will be retried, before sleeping.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: Backoff,
    mut on_retry: R,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, &E, Duration),
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last: e,
                })
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                on_retry(attempt, &e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ─── poll_until ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum PollError<E> {
    /// The deadline passed without the check reporting ready.
    TimedOut { waited: Duration },
    /// The check itself failed; polling stopped.
    Aborted(E),
}

/// Call `check` every `interval` until it yields `Some`, it errors, or
/// `timeout` elapses. The check always runs at least once.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    let deadline = started + timeout;
    loop {
        match check().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => return Err(PollError::Aborted(e)),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::TimedOut {
                waited: now - started,
            });
        }
        let next = (now + interval).min(deadline);
        if next > now {
            tokio::time::sleep_until(next).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}
