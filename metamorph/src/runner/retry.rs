//! Bounded step retries.

use crate::cancellation::CancellationToken;
use crate::errors::{MetamorphError, Result};
use crate::manifest::{Backoff, RetryPolicy};
use crate::utils::DurationParseError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Upper bound for a single exponential wait.
const MAX_DELAY: Duration = Duration::from_secs(3600);

/// A resolved retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Total attempts, at least 1.
    pub attempts: u32,
    /// Wait before the second attempt.
    pub interval: Duration,
    /// Growth of the wait.
    pub backoff: Backoff,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::single()
    }
}

impl RetrySchedule {
    /// One attempt, no retries.
    #[must_use]
    pub const fn single() -> Self {
        Self {
            attempts: 1,
            interval: Duration::ZERO,
            backoff: Backoff::Constant,
        }
    }

    /// Resolves a step's policy; no policy means a single attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is malformed.
    pub fn from_policy(policy: Option<&RetryPolicy>) -> std::result::Result<Self, DurationParseError> {
        let Some(policy) = policy else {
            return Ok(Self::single());
        };
        Ok(Self {
            attempts: policy.attempts(),
            interval: policy.interval()?,
            backoff: policy.backoff,
        })
    }

    /// Returns the wait before `attempt` (1-based). The first attempt never waits.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match self.backoff {
            Backoff::Constant => self.interval,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 2);
                self.interval.saturating_mul(factor).min(MAX_DELAY)
            }
        }
    }
}

/// Errors that another attempt cannot fix.
fn is_retryable(error: &MetamorphError) -> bool {
    !matches!(
        error,
        MetamorphError::Cancelled(_)
            | MetamorphError::Unsupported { .. }
            | MetamorphError::RuntimeUnavailable(_)
            | MetamorphError::Validation(_)
    )
}

/// Runs `operation` until it succeeds or the schedule is exhausted.
///
/// The operation receives the 1-based attempt number. Cancellation is
/// checked before and after every wait; a cancelled token ends the loop with
/// the cancellation error. Returns the final result and the number of
/// attempts made.
pub async fn with_retry<T, F, Fut>(
    schedule: &RetrySchedule,
    cancel: &CancellationToken,
    key: &str,
    mut operation: F,
) -> (Result<T>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if attempt >= schedule.attempts || !is_retryable(&e) => return (Err(e), attempt),
            Err(e) => {
                let delay = schedule.delay_before(attempt + 1);
                warn!(
                    step = key,
                    attempt,
                    max_attempts = schedule.attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Attempt failed, retrying"
                );

                if let Err(cancelled) = cancel.check() {
                    return (Err(cancelled), attempt);
                }
                tokio::time::sleep(delay).await;
                if let Err(cancelled) = cancel.check() {
                    return (Err(cancelled), attempt);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failure(code: i32) -> MetamorphError {
        MetamorphError::NonZeroExit {
            code,
            output: String::new(),
        }
    }

    #[test]
    fn test_from_policy() {
        assert_eq!(RetrySchedule::from_policy(None).unwrap(), RetrySchedule::single());

        let policy = RetryPolicy::new(0, "").with_backoff(Backoff::Exponential);
        let schedule = RetrySchedule::from_policy(Some(&policy)).unwrap();
        assert_eq!(schedule.attempts, 1);

        assert!(RetrySchedule::from_policy(Some(&RetryPolicy::new(2, "later"))).is_err());
    }

    #[test]
    fn test_delays() {
        let constant = RetrySchedule {
            attempts: 4,
            interval: Duration::from_millis(100),
            backoff: Backoff::Constant,
        };
        assert_eq!(constant.delay_before(1), Duration::ZERO);
        assert_eq!(constant.delay_before(2), Duration::from_millis(100));
        assert_eq!(constant.delay_before(4), Duration::from_millis(100));

        let exponential = RetrySchedule {
            backoff: Backoff::Exponential,
            ..constant
        };
        assert_eq!(exponential.delay_before(2), Duration::from_millis(100));
        assert_eq!(exponential.delay_before(3), Duration::from_millis(200));
        assert_eq!(exponential.delay_before(4), Duration::from_millis(400));
        assert_eq!(exponential.delay_before(60), MAX_DELAY);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let schedule = RetrySchedule {
            attempts: 3,
            ..RetrySchedule::single()
        };

        let (result, attempts) = with_retry(&schedule, &CancellationToken::new(), "flaky", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(failure(1))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_with_last_error() {
        let schedule = RetrySchedule {
            attempts: 2,
            ..RetrySchedule::single()
        };
        let (result, attempts) = with_retry(&schedule, &CancellationToken::new(), "broken", |attempt| async move {
            Err::<(), _>(failure(i32::try_from(attempt).unwrap_or(0)))
        })
        .await;

        assert_eq!(attempts, 2);
        assert_eq!(result.unwrap_err().exit_code(), Some(2));
    }

    #[tokio::test]
    async fn test_cancellation_between_attempts() {
        let token = CancellationToken::new();
        let schedule = RetrySchedule {
            attempts: 5,
            ..RetrySchedule::single()
        };

        let (result, attempts) = with_retry(&schedule, &token, "step", |_| {
            token.cancel("stop");
            async { Err::<(), _>(failure(1)) }
        })
        .await;

        assert_eq!(attempts, 1);
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_unsupported_is_not_retried() {
        let schedule = RetrySchedule {
            attempts: 5,
            ..RetrySchedule::single()
        };
        let (result, attempts) = with_retry(&schedule, &CancellationToken::new(), "build", |_| async {
            Err::<(), _>(MetamorphError::Unsupported {
                runtime: "local".into(),
                operation: "build_image".into(),
            })
        })
        .await;

        assert_eq!(attempts, 1);
        assert!(result.is_err());
    }
}
