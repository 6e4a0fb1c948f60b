//! Retry policy and bounded polling.
//!
//! Every wait in the controller goes through one of these two helpers, so
//! nothing can block without a deadline.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Retry policy for admin commands and probes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Total attempts, the first one included.
    pub max_attempts: u32,

    /// Upper bound on a single delay.
    pub max_delay: Option<Duration>,
}

impl RetryPolicy {
    /// Delay after the `attempts`-th failed attempt (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1), capped at `max_delay`.
    ///
    /// Example with base_delay=2s, multiplier=2.0:
    /// - after attempt 1: 2s
    /// - after attempt 2: 4s
    /// - after attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(delay_secs.max(0.0)).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

// Stand-in deadline for timeouts too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Why a bounded wait ended without the condition holding.
#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("condition not met within {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("{0}")]
    Check(E),
}

/// Poll `check` every `interval` until it yields `Some`, errors, or
/// `timeout` elapses.
///
/// The check always runs at least once, even with a zero timeout.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let deadline = start.checked_add(timeout).unwrap_or(start + FAR_FUTURE);
    loop {
        if let Some(value) = check().await.map_err(PollError::Check)? {
            return Ok(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::TimedOut { timeout });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
