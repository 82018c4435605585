//! The retry envelope every public sync store operation is wrapped in.
//!
//! `spec.md` §4.1 "Retry policy": "up to 3 retries on non-fatal errors with
//! exponential backoff starting at 100ms (100, 200, 400). A distinguished
//! *non-retryable* error kind short-circuits."

use std::future::Future;
use std::time::Duration;

use metrics::histogram;
use tracing::{instrument, warn};

use crate::error::{AppError, InfraError};
use crate::metrics::SYNC_STORE_RETRY_ATTEMPTS;

/// Base delay for the first retry; doubles on each subsequent attempt.
const BASE_DELAY_MS: u64 = 100;
/// Maximum number of retries after the initial attempt.
const MAX_RETRIES: u32 = 3;

/// Run `op`, retrying up to [`MAX_RETRIES`] times with exponential backoff
/// on any error except [`InfraError::NonRetryable`].
///
/// `op_name` is used only for log correlation.
///
/// # Errors
/// Returns the last error encountered once retries are exhausted, or
/// immediately on a non-retryable error.
#[instrument(skip(op))]
pub async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => {
                histogram!(SYNC_STORE_RETRY_ATTEMPTS, "op" => op_name.to_string()).record(f64::from(attempt));
                return Ok(value);
            }
            Err(err) => {
                let non_retryable = matches!(
                    &err,
                    AppError::Infra(InfraError::NonRetryable(_))
                );
                if non_retryable || attempt >= MAX_RETRIES {
                    histogram!(SYNC_STORE_RETRY_ATTEMPTS, "op" => op_name.to_string()).record(f64::from(attempt));
                    if attempt > 0 {
                        warn!(op = op_name, attempt, error = %err, "retry exhausted");
                    }
                    return Err(err);
                }
                let delay = BASE_DELAY_MS * 2u64.pow(attempt);
                warn!(op = op_name, attempt, delay_ms = delay, error = %err, "retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_try_without_delay() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, AppError> = with_retry("op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_limit() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, AppError> = with_retry("op", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(AppError::Infra(InfraError::Timeout("slow".into())))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, AppError> = with_retry("op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Infra(InfraError::Timeout("slow".into())))
        })
        .await;
        assert!(result.is_err());
        // Initial attempt + MAX_RETRIES retries.
        assert_eq!(calls.load(Ordering::SeqCst), 1 + MAX_RETRIES);
    }

    #[tokio::test]
    async fn non_retryable_short_circuits_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, AppError> = with_retry("op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Infra(InfraError::NonRetryable("fatal".into())))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
