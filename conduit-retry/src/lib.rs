//! Bounded retry and backoff logic for conduit backend transfers
//!
//! Upload and download paths of every backend adapter go through
//! [`retry_blocking`], so a single [`RetryPolicy`] decides how many extra
//! attempts a transient failure earns. Permanent failures are surfaced on the
//! first attempt; transient ones are surfaced unchanged once the retry budget
//! is spent.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for categorizing errors as transient or permanent
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// How many times a transient failure is retried, and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one (0 disables retrying)
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Upper bound for any single delay
    pub max_interval: Duration,
    /// Growth factor applied to the delay after each retry
    pub multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self::with_retries(0)
    }

    /// Retry up to `max_retries` times with the default backoff curve
    pub fn with_retries(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    /// Override the delay before the first retry
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        if self.max_interval < interval {
            self.max_interval = interval;
        }
        self
    }

    fn backoff(&self) -> AttemptLimited {
        let inner = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build();
        AttemptLimited {
            inner,
            remaining: self.max_retries,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Exponential backoff that gives up after a fixed number of delays
struct AttemptLimited {
    inner: ExponentialBackoff,
    remaining: usize,
}

impl Backoff for AttemptLimited {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.inner.next_backoff()
    }
}

/// Execute `f` until it succeeds, fails permanently, or the retry budget is spent
///
/// `f` receives the 1-based attempt number.
pub fn retry_blocking<T, E, F>(op_name: &str, policy: &RetryPolicy, f: F) -> Result<T, E>
where
    E: RetryableError + Display,
    F: FnMut(usize) -> Result<T, E>,
{
    retry_blocking_notify(op_name, policy, f, |_, _| {})
}

/// Like [`retry_blocking`], calling `on_retry(attempt, &error)` before every retry
pub fn retry_blocking_notify<T, E, F, N>(
    op_name: &str,
    policy: &RetryPolicy,
    mut f: F,
    mut on_retry: N,
) -> Result<T, E>
where
    E: RetryableError + Display,
    F: FnMut(usize) -> Result<T, E>,
    N: FnMut(usize, &E),
{
    let mut backoff = policy.backoff();
    let mut attempt = 1;

    loop {
        match f(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = op_name, attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() => match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        operation = op_name,
                        attempt = attempt,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    on_retry(attempt, &err);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                None => {
                    if policy.max_retries > 0 {
                        warn!(operation = op_name, attempts = attempt, error = %err, "Retry budget exhausted");
                    }
                    return Err(err);
                }
            },
            Err(err) => {
                debug!(operation = op_name, attempt = attempt, error = %err, "Permanent failure, not retrying");
                return Err(err);
            }
        }
    }
}
