//! Retry loop shared by every fetch adapter
//!
//! Transient failures are retried with exponential backoff until the
//! policy runs out of attempts. Permanent failures surface on the first
//! attempt. The abort token is consulted before each attempt and raced
//! against every backoff sleep.

use crate::error::{FetchError, TransferError, TransferResult};
use rangeflow_types::RetryPolicy;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `operation` under `policy`, passing the 1-based attempt number
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    abort: &CancellationToken,
    mut operation: F,
) -> TransferResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        if abort.is_cancelled() {
            return Err(TransferError::Aborted);
        }

        attempt += 1;
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_retryable() {
            debug!("Non-retryable fetch failure on attempt {}: {}", attempt, error);
            return Err(TransferError::NonRetryable(error));
        }

        if attempt >= attempts {
            return Err(TransferError::RetryExhausted {
                attempts,
                source: error,
            });
        }

        let delay = policy.delay_for(attempt);
        warn!(
            "Fetch failed (attempt {}/{}): {}. Retrying in {:?}",
            attempt, attempts, error, delay
        );

        tokio::select! {
            _ = abort.cancelled() => return Err(TransferError::Aborted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            min_delay_ms: 100,
            max_delay_ms: 1_000,
            factor: 2.0,
        }
    }

    fn transient() -> FetchError {
        FetchError::Status { status: 503, url: "http://example.com".into() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let abort = CancellationToken::new();

        let result = with_retry(&policy(3), &abort, move |_| async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let abort = CancellationToken::new();

        let result: TransferResult<()> = with_retry(&policy(3), &abort, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        assert!(matches!(result, Err(TransferError::RetryExhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_skips_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let abort = CancellationToken::new();

        let result: TransferResult<()> = with_retry(&policy(5), &abort, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Status { status: 404, url: "http://example.com".into() })
        })
        .await;

        assert!(matches!(result, Err(TransferError::NonRetryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_interrupts_backoff() {
        let abort = CancellationToken::new();
        let trigger = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result: TransferResult<()> =
            with_retry(&policy(5), &abort, |_| async { Err(transient()) }).await;

        assert!(matches!(result, Err(TransferError::Aborted)));
    }
}
