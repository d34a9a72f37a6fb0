//! Bounded retry with multiplicative backoff for remote store calls.
//!
//! # Responsibility
//! - Re-run an operation while it fails with an error the caller marks as
//!   retryable, up to a fixed number of attempts.
//! - Grow the wait between attempts by a fixed multiplier.
//!
//! # Invariants
//! - `tries` counts total attempts and is always at least 1.
//! - Errors rejected by the predicate are returned after a single attempt.
//! - After the last attempt the last error is returned unchanged.

use log::{info, warn};
use std::fmt::Display;
use std::time::Duration;

pub const DEFAULT_TRIES: u32 = 10;
pub const DEFAULT_DELAY_SECS: u64 = 1;
pub const DEFAULT_BACKOFF: u32 = 2;

/// Retry combinator parameterized by attempt count, initial delay and
/// backoff multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    tries: u32,
    delay: Duration,
    backoff: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_TRIES,
            Duration::from_secs(DEFAULT_DELAY_SECS),
            DEFAULT_BACKOFF,
        )
    }
}

impl RetryPolicy {
    /// Creates a policy; `tries` and `backoff` are clamped to at least 1.
    pub fn new(tries: u32, delay: Duration, backoff: u32) -> Self {
        Self {
            tries: tries.max(1),
            delay,
            backoff: backoff.max(1),
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1)
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn backoff(&self) -> u32 {
        self.backoff
    }

    /// Wait applied after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.backoff.checked_pow(exponent).unwrap_or(u32::MAX);
        self.delay.saturating_mul(factor)
    }

    /// Runs `call` until it succeeds, fails with an error `is_retryable`
    /// rejects, or all attempts are used.
    ///
    /// Blocks the calling thread for the backoff intervals.
    pub fn run<T, E, F, P>(&self, operation: &str, is_retryable: P, mut call: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            "event=retry module=retry status=recovered operation={} attempts={}",
                            operation, attempt
                        );
                    }
                    return Ok(value);
                }
                Err(err) if is_retryable(&err) && attempt < self.tries => {
                    let wait = self.delay_after(attempt);
                    warn!(
                        "event=retry module=retry status=retrying operation={} attempt={} max_attempts={} delay_ms={} error={}",
                        operation,
                        attempt,
                        self.tries,
                        wait.as_millis(),
                        err
                    );
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    if is_retryable(&err) {
                        warn!(
                            "event=retry module=retry status=exhausted operation={} attempts={} error={}",
                            operation, attempt, err
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;
    use std::cell::Cell;
    use std::time::Duration;

    #[derive(Debug, PartialEq, Eq)]
    enum FakeError {
        Transient,
        Fatal,
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn is_transient(err: &FakeError) -> bool {
        *err == FakeError::Transient
    }

    fn instant(tries: u32) -> RetryPolicy {
        RetryPolicy::new(tries, Duration::ZERO, 2)
    }

    #[test]
    fn recovers_when_failures_stay_below_attempt_bound() {
        let calls = Cell::new(0);
        let result = instant(5).run("op", is_transient, || {
            calls.set(calls.get() + 1);
            if calls.get() <= 3 {
                Err(FakeError::Transient)
            } else {
                Ok("done")
            }
        });

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn exhausted_retries_return_last_error_after_exact_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = instant(4).run("op", is_transient, || {
            calls.set(calls.get() + 1);
            Err(FakeError::Transient)
        });

        assert_eq!(result, Err(FakeError::Transient));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn non_retryable_error_is_returned_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), _> = instant(10).run("op", is_transient, || {
            calls.set(calls.get() + 1);
            Err(FakeError::Fatal)
        });

        assert_eq!(result, Err(FakeError::Fatal));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn delay_grows_by_backoff_factor() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), 3);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(300));
        assert_eq!(policy.delay_after(3), Duration::from_millis(900));
    }

    #[test]
    fn zero_tries_is_clamped_to_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO, 0);
        assert_eq!(policy.tries(), 1);
        assert_eq!(policy.backoff(), 1);
    }
}
