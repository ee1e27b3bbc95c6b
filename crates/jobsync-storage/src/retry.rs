use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{error, warn};

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub trait Retryable {
    fn disposition(&self) -> RetryDisposition;
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Bounded attempts with exponential backoff: `retry_delay`, then doubled per
/// attempt (1s, 2s, 4s …), capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no sleeping between attempts.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            retry_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Defaults overridden by `JOBSYNC_MAX_RETRIES` and
    /// `JOBSYNC_RETRY_DELAY_SECS`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut policy = Self::default();
        if let Some(raw) = get("JOBSYNC_MAX_RETRIES") {
            policy.max_retries = raw
                .trim()
                .parse()
                .ok()
                .filter(|n: &usize| *n > 0)
                .ok_or(ConfigError::Invalid {
                    key: "JOBSYNC_MAX_RETRIES",
                    value: raw.clone(),
                })?;
        }
        if let Some(raw) = get("JOBSYNC_RETRY_DELAY_SECS") {
            let secs = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or(ConfigError::Invalid {
                    key: "JOBSYNC_RETRY_DELAY_SECS",
                    value: raw.clone(),
                })?;
            policy.retry_delay = Duration::from_secs_f64(secs);
        }
        Ok(policy)
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.retry_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget runs out. The last error is returned unchanged.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_retries.max(1);
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.disposition() == RetryDisposition::NonRetryable {
            return Err(err);
        }
        if attempt >= attempts {
            error!(label, attempts, error = %err, "all retry attempts failed");
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt - 1);
        warn!(
            label,
            attempt,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "request failed; backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    enum FakeError {
        Transient,
        Fatal,
    }

    impl Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for FakeError {
        fn disposition(&self) -> RetryDisposition {
            match self {
                Self::Transient => RetryDisposition::Retryable,
                Self::Fatal => RetryDisposition::NonRetryable,
            }
        }
    }

    #[test]
    fn default_backoff_doubles_from_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            retry_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn statuses_are_classified() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), RetryDisposition::NonRetryable);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let result: Result<&str, FakeError> = with_retry(&RetryPolicy::immediate(3), "op", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(FakeError::Transient)
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), FakeError> = with_retry(&RetryPolicy::immediate(3), "op", || {
            calls.set(calls.get() + 1);
            async { Err(FakeError::Transient) }
        })
        .await;
        assert!(matches!(result, Err(FakeError::Transient)));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), FakeError> = with_retry(&RetryPolicy::immediate(5), "op", || {
            calls.set(calls.get() + 1);
            async { Err(FakeError::Fatal) }
        })
        .await;
        assert!(matches!(result, Err(FakeError::Fatal)));
        assert_eq!(calls.get(), 1);
    }
}
