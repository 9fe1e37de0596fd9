use std::{future::Future, time::Duration};

use tokio::time::timeout;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::warn;

use crate::error::AppError;

/// Timeout and backoff applied to every capability and store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy with no backoff delay, useful for tests and local backends.
    pub fn immediate(attempts: usize) -> Self {
        Self {
            attempts,
            base_delay_ms: 1,
            max_delay_ms: 1,
            timeout: Duration::from_secs(5),
        }
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        // ExponentialBackoff yields factor * 2^n with base 2.
        let factor = self.base_delay_ms.div_ceil(2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(Duration::from_millis(self.max_delay_ms.max(1)))
            .map(jitter)
            .take(self.attempts.saturating_sub(1))
    }
}

/// Runs `action` with a per-attempt timeout, retrying with bounded exponential
/// backoff while the error is transient. Validation errors are returned after
/// the first attempt.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut action: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let per_attempt = policy.timeout;
    RetryIf::spawn(
        policy.backoff(),
        || {
            let attempt = action();
            async move {
                match timeout(per_attempt, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(format!(
                        "{operation} exceeded {}ms",
                        per_attempt.as_millis()
                    ))),
                }
            }
        },
        |err: &AppError| {
            let transient = err.is_transient();
            if transient {
                warn!(operation, error = %err, "transient failure; retrying");
            }
            transient
        },
    )
    .await
}
