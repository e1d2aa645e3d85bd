//! Bounded retry with exponential backoff
//!
//! Every attempt runs under a per-request timeout; a timeout counts as a
//! transient failure, although the request may still have taken effect.
//! Callers that write must check for that before repeating the write (see
//! [`crate::LedgerPort::append`]). Permanent failures are returned
//! immediately.

use crate::error::AppendError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for ledger requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff growth per attempt
    pub multiplier: f64,
    /// Upper bound on any single delay, in milliseconds
    pub max_backoff_ms: u64,
    /// Per-attempt timeout, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            multiplier: 2.0,
            max_backoff_ms: 8_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// With attempt count (at least one)
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// With initial backoff
    #[inline]
    #[must_use]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = duration_ms(backoff);
        self
    }

    /// With per-attempt timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_ms(timeout);
        self
    }

    /// Per-attempt timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay after failed attempt number `attempt` (1-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let raw = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exp);
        #[allow(clippy::cast_precision_loss)]
        let capped = raw.min(self.max_backoff_ms as f64);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped as u64)
    }

    /// Check the policy is usable
    ///
    /// # Errors
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".into());
        }
        if self.request_timeout_ms == 0 {
            return Err("retry.request_timeout_ms must be positive".into());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("retry.multiplier must be >= 1.0".into());
        }
        Ok(())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
///
/// `op` receives the 1-based attempt number.
///
/// # Errors
/// The last error seen: the permanent one, or the final transient one.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, AppendError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AppendError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.request_timeout(), op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(AppendError::transient(format!(
                "{what} timed out after {}ms",
                policy.request_timeout_ms
            ))),
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(what, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!(what, attempt, ?delay, error = %err, "transient failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(what, attempt, error = %err, "giving up");
                return Err(err);
            }
        }
    }
}
