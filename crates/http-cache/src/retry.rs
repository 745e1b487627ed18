//! Retry logic with exponential backoff for artifact API requests
//!
//! Only transport failures are retried. A response with any status code is a
//! definitive answer and is handed back to the cache untouched.

use crate::config::RetryConfig;
use crate::{Error, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry a fallible async operation with exponential backoff
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = create_backoff(config);
    let mut attempts = 0;

    loop {
        attempts += 1;

        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts = attempts,
                        "Request succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !is_retryable(&err) => return Err(err),
            Err(err) => {
                if attempts >= config.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempts = attempts,
                        error = %err,
                        "Request failed after maximum retries"
                    );
                    return Err(Error::transport(format!(
                        "{operation_name} failed after {attempts} attempts: {err}"
                    )));
                }

                let Some(duration) = backoff.next_backoff() else {
                    return Err(err);
                };
                warn!(
                    operation = operation_name,
                    attempts = attempts,
                    error = %err,
                    retry_in_ms = duration.as_millis(),
                    "Request failed, retrying"
                );
                tokio::time::sleep(duration).await;
            }
        }
    }
}

/// Create exponential backoff from config
fn create_backoff(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(config.initial_backoff_ms))
        .with_max_interval(Duration::from_millis(config.max_backoff_ms))
        .with_multiplier(config.backoff_multiplier)
        .with_max_elapsed_time(None) // max_attempts bounds the loop
        .build()
}

/// Determine if an error is worth another attempt
fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::Transport { .. })
}
