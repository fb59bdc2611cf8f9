use std::time::Duration;

use common::error::AppError;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

/// Explicit retry policy value. The retried operation stays free of backoff
/// logic; callers combine a policy with [`is_non_retryable`] and drive the
/// schedule from [`RetryPolicy::delays`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Delay before the first retry; subsequent delays double.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Jittered exponential backoff schedule: `2^attempt x base_delay`,
    /// capped at `max_delay`, one entry per retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let half_base = u64::try_from(self.base_delay.as_millis() / 2).unwrap_or(500).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(half_base)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1))
    }
}

/// Errors that retrying cannot fix: bad credentials, forbidden access, and
/// malformed requests abort the retry loop immediately. Everything else
/// (network trouble, timeouts, 429/5xx) is considered transient.
pub fn is_non_retryable(error: &AppError) -> bool {
    match error {
        AppError::Validation(_) => true,
        AppError::OpenAI(err) => {
            let text = err.to_string().to_lowercase();
            text.contains("invalid_request")
                || text.contains("invalid api key")
                || text.contains("incorrect api key")
                || text.contains("unauthorized")
                || text.contains("forbidden")
                || text.contains("401")
                || text.contains("403")
        }
        _ => false,
    }
}
