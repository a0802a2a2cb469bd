// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded retry with a pluggable backoff.
//!
//! ```text
//!   Attempting(1) ──ok──> Succeeded
//!        │
//!       err, n < max ── sleep(delay_for_attempt(n)) ──> Attempting(n + 1)
//!        │
//!       err, n == max ──> Failed
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Delay to wait after a failed attempt. `attempt` starts at 1.
pub trait Backoff: fmt::Debug + Send + Sync {
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
}

/// `base * attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub base: Duration,
}

impl Default for LinearBackoff {
    fn default() -> Self {
        LinearBackoff {
            base: DEFAULT_BASE_DELAY,
        }
    }
}

impl Backoff for LinearBackoff {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt)
    }
}

/// `base * 2^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff for ExponentialBackoff {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// No delay between attempts. Mostly useful in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImmediateRetry;

impl Backoff for ImmediateRetry {
    fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Arc<dyn Backoff>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(DEFAULT_MAX_ATTEMPTS, Arc::new(LinearBackoff::default()))
    }
}

impl RetryPolicy {
    /// `max_attempts` is raised to 1 when zero.
    pub fn new(max_attempts: u32, backoff: Arc<dyn Backoff>) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `op` until it succeeds or `max_attempts` calls have failed, in
    /// which case the last error is returned. `op` receives the attempt
    /// number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(
                        "{label}: attempt {attempt}/{} failed: {e}, retrying in {} ms",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_linear_backoff() {
        let backoff = LinearBackoff::default();
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = ExponentialBackoff {
            base: Duration::from_millis(50),
            max: Duration::from_secs(1),
        };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(64), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_attempts_raised_to_one() {
        let policy = RetryPolicy::new(0, Arc::new(ImmediateRetry));
        assert_eq!(policy.max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_after_max_attempts() {
        let policy = RetryPolicy::new(4, Arc::new(ImmediateRetry));
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = policy
            .run("test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("failure {attempt}")) }
            })
            .await;
        assert_eq!(result, Err("failure 4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_returns_first_success() {
        let policy = RetryPolicy::new(5, Arc::new(ImmediateRetry));
        let result: Result<u32, String> = policy
            .run("test", |attempt| async move {
                if attempt < 3 {
                    Err("not yet".to_string())
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sleeps_between_attempts() {
        let policy = RetryPolicy::new(3, Arc::new(LinearBackoff::default()));
        let start = tokio::time::Instant::now();
        let _: Result<(), &str> = policy.run("test", |_| async { Err("down") }).await;
        // 100 ms after the first failure, 200 ms after the second.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }
}
