//! Retry with exponential backoff
//!
//! One policy value and one helper shared by every sink, so backoff
//! behaviour is defined in a single place.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy: attempt ceiling plus exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Delay multiplier per further failure
    pub multiplier: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a doubling policy
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Set upper delay bound
    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

        Duration::try_from_secs_f64(delay_secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Check if another attempt is allowed after `attempts` tries
    pub fn should_attempt(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Final error of a retried operation
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts made
    pub attempts: u32,
    /// Error of the last attempt
    pub last_error: E,
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// `operation` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_attempt(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!("Attempt {} failed: {}; retrying in {:?}", attempt, e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(RetryError {
                    attempts: attempt,
                    last_error: e,
                })
            }
        }
    }
}
