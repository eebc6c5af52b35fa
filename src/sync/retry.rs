//! Bounded exponential backoff with a per-call timeout

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default attempt cap per item or listing page
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Retry settings applied to every store call made during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    /// Budget for a single store call; an expired call is a transient error
    #[serde(rename = "call_timeout_ms", with = "duration_millis")]
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// The last error of an operation that gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError {
    pub error: StoreError,
    pub attempts: u32,
    /// Retrying stopped early because the run was cancelled
    pub cancelled: bool,
}

impl RetryPolicy {
    /// Fast settings for tests and simulation
    pub fn test() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            call_timeout: Duration::from_secs(5),
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from `base_delay`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Run one store call under `call_timeout`
    pub async fn timed<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.call_timeout)),
        }
    }

    /// Call `op` until it succeeds, fails permanently, or runs out of attempts
    ///
    /// `op` receives the 1-based attempt number. Only transient errors are
    /// retried. Cancellation interrupts the backoff sleep, never a call.
    pub async fn retry<T, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_transient() || attempt >= max_attempts {
                return Err(RetryError {
                    error,
                    attempts: attempt,
                    cancelled: false,
                });
            }

            let delay = self.backoff(attempt);
            warn!(
                operation = what,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient store error, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError {
                        error,
                        attempts: attempt,
                        cancelled: true,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Serde helper for `Duration` as integer milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
