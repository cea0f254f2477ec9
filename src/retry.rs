//! Bounded retry with exponential backoff around one backend call.
//!
//! ## Why a wrapper
//!
//! Retry is policy, not engine behaviour: the backends report *what* went
//! wrong through [`OcrError`], and [`RetryPolicy::run`] decides whether
//! another attempt is worth it. Only `RateLimited` and `Transient` are
//! retried; everything else is handed back after the first attempt.
//!
//! Delay before attempt `n + 1` is
//! `min(base_delay × 2^(n-1) + jitter, max_delay)`, where jitter is a random
//! 0–25 % of the exponential term. A provider `retry_after` hint raises the
//! delay to at least the hinted value (still capped). With the defaults the
//! sequence is roughly 1 s → 2 s → 4 s.

use crate::error::OcrError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry parameters for one backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 25 % random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Successful call plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Final error after the policy gave up.
#[derive(Debug, Clone)]
pub struct RetryFailure {
    pub error: OcrError,
    pub attempts: u32,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Exponential delay after failed attempt `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32, err: &OcrError) -> Duration {
        let mut delay = self.backoff(attempt);
        if self.jitter {
            let quarter = delay.as_millis() as u64 / 4;
            if quarter > 0 {
                delay += Duration::from_millis(rand::thread_rng().gen_range(0..=quarter));
            }
        }
        if let OcrError::RateLimited {
            retry_after: Some(hint),
        } = err
        {
            delay = delay.max(*hint);
        }
        delay.min(self.max_delay)
    }

    /// Call `call(attempt)` until it succeeds, fails non-retryably, or
    /// `max_attempts` is reached.
    pub async fn run<T, F, Fut>(&self, page: usize, mut call: F) -> Result<Retried<T>, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OcrError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(page, attempt, "page succeeded after retry");
                    }
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) if !error.is_retryable() => {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                    });
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(page, attempts = attempt, "Page {page}: giving up: {error}");
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    let delay = self.delay_for(attempt, &error);
                    warn!(
                        "Page {}: attempt {}/{} failed ({}), retrying in {}ms",
                        page,
                        attempt,
                        max_attempts,
                        error,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
