//! Retry logic for transient upstream errors
//!
//! Exponential backoff over a bounded attempt count. Only
//! `Error::Transient` is retried; quota exhaustion, corruption and every
//! other kind fail immediately so callers can apply their own policy.

use std::time::Duration;
use vvc_common::Result;

/// Retry an async operation on transient errors.
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "search page", "download")
/// * `max_retries` - Additional attempts after the first failure
/// * `backoff_ms` - Initial backoff, doubled each retry and capped at 30s
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    max_retries: u32,
    backoff_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut wait_ms = backoff_ms.max(1);

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_transient() && attempt <= max_retries => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = wait_ms,
                    error = %err,
                    "Transient error, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                wait_ms = (wait_ms * 2).min(30_000);
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "Retry budget exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vvc_common::Error;

    #[tokio::test]
    async fn succeeds_first_attempt() {
        let result = retry_transient("op", 3, 1, || async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_transient("op", 3, 1, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Transient("503".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn quota_error_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry_transient("op", 5, 1, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::QuotaExhausted("all keys".into())) }
        })
        .await;

        assert!(result.unwrap_err().is_quota());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_budget_bounded() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry_transient("op", 2, 1, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Transient("timeout".into())) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 3); // first try + 2 retries
    }
}
