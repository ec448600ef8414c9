//! Bounded retry with a fixed delay for network-dependent operations.

use crate::constants;
use crate::models::config::RetrySection;
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Treated as at least 1.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_secs(constants::DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            delay: Duration::from_secs(section.delay_secs),
        }
    }
}

/// Waits between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Every attempt failed. Carries the last error's message.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryError {
    pub operation: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Retries `op` according to a policy.
pub struct RetryExecutor<'a> {
    policy: RetryPolicy,
    sleeper: &'a dyn Sleeper,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(policy: RetryPolicy, sleeper: &'a dyn Sleeper) -> Self {
        Self { policy, sleeper }
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt index. The delay is applied between
    /// attempts only, never after the last one.
    pub fn run<T, E, F>(&self, operation: &str, mut op: F) -> Result<T, RetryError>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        error = %e,
                        "attempt failed"
                    );
                    if attempt >= max_attempts {
                        return Err(RetryError {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    self.sleeper.sleep(self.policy.delay);
                    attempt += 1;
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::RecordingSleeper;
    use super::*;

    #[test]
    fn test_always_failing_uses_whole_budget() {
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);
        let mut seen = Vec::new();
        let result: Result<(), RetryError> = retry.run("mirror refresh", |attempt| {
            seen.push(attempt);
            Err("connection refused")
        });

        let err = result.unwrap_err();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "connection refused");
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn test_success_after_transient_failure() {
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);
        let value = retry
            .run("pull", |attempt| if attempt < 2 { Err("timeout") } else { Ok(42) })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(sleeper.delays().len(), 1);
    }

    #[test]
    fn test_first_success_never_sleeps() {
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);
        let value: Result<&str, RetryError> = retry.run("noop", |_| Ok::<_, String>("done"));
        assert_eq!(value.unwrap(), "done");
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy {
            max_attempts: 0,
            delay: Duration::from_millis(10),
        };
        let retry = RetryExecutor::new(policy, &sleeper);
        let mut calls = 0;
        let result: Result<(), RetryError> = retry.run("once", |_| {
            calls += 1;
            Err("nope")
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn test_error_message_names_operation() {
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(
            RetryPolicy {
                max_attempts: 2,
                delay: Duration::ZERO,
            },
            &sleeper,
        );
        let err = retry
            .run("docker signing key", |_| Err::<(), _>("dns failure"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "docker signing key failed after 2 attempt(s): dns failure"
        );
    }
}
