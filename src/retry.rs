//! Bounded retry with per-attempt backoff, shared by page and image fetches.

use std::time::Duration;

/// Default number of attempts (initial plus retries).
pub const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default backoff in milliseconds before each retry.
pub const DEFAULT_BACKOFF_MS: [u64; 2] = [1000, 2000];

/// Error from the last attempt plus how many attempts were made.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Attempt count and backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RETRY_COUNT,
            DEFAULT_BACKOFF_MS.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        )
    }
}

impl RetryPolicy {
    /// `attempts` is clamped to at least 1. When `backoff` is shorter than
    /// `attempts - 1` its last value is reused; empty means no wait.
    pub fn new(attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Vec::new())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff
            .get(attempt as usize)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the attempt
    /// bound is reached. `op` receives the 1-based attempt number.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, E>,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, Exhausted<E>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(error) => {
                    if attempt >= self.attempts || !is_retryable(&error) {
                        return Err(Exhausted {
                            error,
                            attempts: attempt,
                        });
                    }
                    let delay = self.delay_after(attempt - 1);
                    tracing::debug!(attempt, ?delay, "retrying after transient failure");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Vec::new())
    }

    #[test]
    fn succeeds_after_transient_errors() {
        let calls = Cell::new(0);
        let result: Result<u32, Exhausted<&str>> = fast(3).run(
            |attempt| {
                calls.set(calls.get() + 1);
                if attempt < 3 {
                    Err("reset")
                } else {
                    Ok(attempt)
                }
            },
            |_| true,
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn stops_at_attempt_bound() {
        let result: Result<(), Exhausted<&str>> = fast(3).run(|_| Err("timeout"), |_| true);
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.error, "timeout");
    }

    #[test]
    fn non_retryable_error_returns_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), Exhausted<u16>> = fast(5).run(
            |_| {
                calls.set(calls.get() + 1);
                Err(404)
            },
            |status| *status >= 500,
        );
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Vec::new()).attempts(), 1);
        assert_eq!(RetryPolicy::none().attempts(), 1);
    }

    #[test]
    fn backoff_reuses_last_delay() {
        let p = RetryPolicy::new(4, vec![Duration::from_millis(5), Duration::from_millis(7)]);
        assert_eq!(p.delay_after(0), Duration::from_millis(5));
        assert_eq!(p.delay_after(1), Duration::from_millis(7));
        assert_eq!(p.delay_after(2), Duration::from_millis(7));
    }
}
