//! Bounded retry of remote calls.

use crate::error::RemoteError;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on a single exponential backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// How many attempts a remote operation gets and how long to wait between them.
pub trait RetryPolicy: Send + Sync + Debug {
    /// Total attempts, including the first one. Always at least 1.
    fn max_attempts(&self) -> u32;

    /// The wait after failed attempt number `attempt` (1-based) before the next one.
    fn delay(&self, attempt: u32) -> Duration;
}

/// The backoff setting in `config.json`.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

serde_plain::derive_display_from_serialize!(Backoff);

/// Waits the same time after every failure.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    max_attempts: u32,
    delay: Duration,
}

impl FixedDelay {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl RetryPolicy for FixedDelay {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Doubles the wait after each failure, starting at `base` and capped at one minute.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    base: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base
            .checked_mul(1 << exponent)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }
}

/// Retries without waiting. Used by tests.
#[derive(Debug, Clone, Copy)]
pub struct NoDelay {
    max_attempts: u32,
}

impl NoDelay {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl RetryPolicy for NoDelay {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// The result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, RemoteError>,
    pub attempts: u32,
}

/// Runs `operation` until it succeeds, fails permanently, or `policy.max_attempts()` attempts
/// have been made. The closure receives the 1-based attempt number.
pub async fn retry<T, F, Fut>(policy: &dyn RetryPolicy, operation_name: &str, mut operation: F) -> Retried<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let max_attempts = policy.max_attempts().max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt, "Remote operation succeeded after retry"
                    );
                }
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if !e.is_transient() => {
                warn!(
                    operation = operation_name,
                    attempt, "Remote operation failed permanently: {e}"
                );
                return Retried {
                    result: Err(e),
                    attempts: attempt,
                };
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt, "Remote operation failed, no attempts left: {e}"
                );
                return Retried {
                    result: Err(e),
                    attempts: attempt,
                };
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Remote operation failed, retrying: {e}"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delays() {
        let fixed = FixedDelay::new(3, Duration::from_millis(2000));
        assert_eq!(fixed.delay(1), Duration::from_millis(2000));
        assert_eq!(fixed.delay(5), Duration::from_millis(2000));

        let exp = ExponentialBackoff::new(5, Duration::from_millis(500));
        assert_eq!(exp.delay(1), Duration::from_millis(500));
        assert_eq!(exp.delay(2), Duration::from_millis(1000));
        assert_eq!(exp.delay(3), Duration::from_millis(2000));
        assert_eq!(exp.delay(40), MAX_DELAY);

        assert_eq!(NoDelay::new(0).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let retried = retry(&NoDelay::new(3), "op", |_| async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(RemoteError::transient("busy"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(retried.result.unwrap(), 3);
        assert_eq!(retried.attempts, 3);
    }

    #[tokio::test]
    async fn test_transient_exhausts_attempts() {
        let retried: Retried<()> = retry(&NoDelay::new(3), "op", |_| async {
            Err(RemoteError::transient("busy"))
        })
        .await;
        assert!(retried.result.is_err());
        assert_eq!(retried.attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_stops_immediately() {
        let calls = AtomicU32::new(0);
        let retried: Retried<()> = retry(&NoDelay::new(3), "op", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(RemoteError::permanent(format!("denied on {attempt}"))) }
        })
        .await;
        assert_eq!(retried.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(retried.result.unwrap_err().message().contains("denied on 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_waits() {
        let start = tokio::time::Instant::now();
        let retried: Retried<()> = retry(
            &FixedDelay::new(3, Duration::from_secs(2)),
            "op",
            |_| async { Err(RemoteError::transient("busy")) },
        )
        .await;
        assert_eq!(retried.attempts, 3);
        // Two waits between three attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }
}
