//! Retry policy and the retry-wrapped call primitive.
//!
//! [`RetryPolicy`] is plain data: how many retries, the base delay and the
//! cap. [`with_retry()`] applies it to any async operation. Only idempotent
//! reads go through here; mutations are never retried, so a transient
//! failure on a booking can't turn into a double booking.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::telemetry;
use crate::{CoachwayError, Result};

/// Retry behaviour for transient errors.
///
/// Exponential backoff: `initial_delay * 2^attempt`, capped at `max_delay`.
/// Defaults give 1s, 2s, 4s across three retries (four attempts total).
///
/// ```rust
/// # use coachway::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new()
///     .max_retries(2)
///     .initial_delay(Duration::from_millis(200));
/// assert_eq!(policy.delay_for(1), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. 0 = no retry. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound for any single delay. Default: 5s.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Total attempts this policy allows, initial request included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a failure on `attempt` (0-based) should be retried.
    pub fn should_retry(&self, error: &CoachwayError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }

    /// Backoff before the retry that follows `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Backoff honouring a provider `Retry-After` hint, still capped.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after
            .map(|hint| hint.min(self.max_delay))
            .unwrap_or_else(|| self.delay_for(attempt))
    }
}

/// Run `f` until it succeeds, fails permanently, or the policy is spent.
///
/// Permanent errors return immediately and unchanged. When the last allowed
/// attempt still fails transiently, the error is wrapped in
/// [`CoachwayError::RetriesExhausted`] carrying the final failure.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(&e, attempt) => {
                metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => operation.to_owned())
                    .increment(1);
                let delay = policy.effective_delay(attempt, e.retry_after());
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_transient() && attempt > 0 => {
                return Err(CoachwayError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn should_retry_respects_budget_and_kind() {
        let policy = RetryPolicy::default();
        let transient = CoachwayError::Server {
            status: 502,
            message: "bad gateway".into(),
        };
        let permanent = CoachwayError::Api {
            status: 400,
            message: "invalid date".into(),
        };

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&permanent, 0));
        assert!(!policy.should_retry(&CoachwayError::Unauthorized("expired".into()), 0));
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.effective_delay(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.effective_delay(0, Some(Duration::from_secs(60))),
            Duration::from_secs(5)
        );
        assert_eq!(policy.effective_delay(1, None), Duration::from_secs(2));
    }

    #[test]
    fn disabled_policy_allows_one_attempt() {
        let policy = RetryPolicy::disabled();
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(&CoachwayError::Network("down".into()), 0));
    }
}
