//! Wrappers for remote calls: retry with backoff and timeouts.
//!
//! The coordinator never retries or times out on its own. Callers that want
//! either wrap the remote call they hand to [`crate::Coordinator::run`]:
//!
//! ```rust,ignore
//! coordinator
//!     .run(op, || with_timeout(Duration::from_secs(5), with_retry(&retry, || remote.add(item))))
//!     .await;
//! ```

use crate::config::RetryConfig;
use crate::error::RemoteError;
use std::future::Future;
use std::time::Duration;

/// Calls `call` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` is reached. Returns the last error on exhaustion.
pub async fn with_retry<R, F, Fut>(config: &RetryConfig, mut call: F) -> Result<R, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, RemoteError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let delay = config.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match call().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                tracing::debug!(attempt, error = %e, "retrying remote call");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fails with [`RemoteError::Timeout`] if `call` does not settle within
/// `duration`.
pub async fn with_timeout<R, Fut>(duration: Duration, call: Fut) -> Result<R, RemoteError>
where
    Fut: Future<Output = Result<R, RemoteError>>,
{
    match tokio::time::timeout(duration, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(?duration, "remote call timed out");
            Err(RemoteError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast(5), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RemoteError::network("flaky"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&fast(5), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Rejected("out of stock".into()))
        })
        .await;

        assert_eq!(result, Err(RemoteError::Rejected("out of stock".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&fast(3), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Timeout)
        })
        .await;

        assert_eq!(result, Err(RemoteError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_retry_calls_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let _: Result<(), _> = with_retry(&RetryConfig::no_retry(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::network("down"))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_maps_to_timeout_error() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), async {
            std::future::pending::<Result<(), RemoteError>>().await
        })
        .await;
        assert_eq!(result, Err(RemoteError::Timeout));
    }

    #[tokio::test]
    async fn timeout_passes_through_result() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, RemoteError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
