//! Bounded retry with exponential backoff.

use std::future::Future;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::AppError;

/// Result of a retried operation plus the number of attempts made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, AppError>,
    pub attempts: u32,
}

/// Runs `op` until it succeeds, fails permanently, or the policy is exhausted.
///
/// Only transient errors are retried, so a permanently failing target is
/// attempted exactly `max_retries + 1` times and a rejected one exactly once.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, target: &str, mut op: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                }
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    target_url = target,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt + 1,
                }
            }
        }
    }
}
