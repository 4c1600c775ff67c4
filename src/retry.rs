//! Retry logic with linear backoff
//!
//! Download tasks retry with a linear schedule: the n-th retry waits
//! `n * base_delay` (capped at `max_delay`, optionally jittered). Every wait
//! observes the run's cancellation token.
//!
//! # Example
//!
//! ```no_run
//! use feed_harvest::config::RetryConfig;
//! use feed_harvest::retry::retry_with_backoff;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> feed_harvest::Result<()> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let value = retry_with_backoff(
//!     &config,
//!     &cancel,
//!     |_attempt| async { Ok::<_, feed_harvest::Error>(7) },
//!     |retry, err, delay| tracing::warn!(retry, error = %err, ?delay, "retrying"),
//! )
//! .await?;
//! assert_eq!(value, 7);
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{AcquisitionError, Error, SurfaceError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, artifacts that never showed up, locked
/// files) return `true`. Permanent failures (configuration, cancellation) return
/// `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Only timeouts and connection failures are worth another request
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            Error::Surface(e) => e.is_retryable(),
            Error::Acquisition(e) => e.is_retryable(),
            Error::Config { .. } => false,
            Error::Serialization(_) => false,
            Error::Cancelled => false,
            Error::Other(_) => false,
        }
    }
}

impl IsRetryable for SurfaceError {
    fn is_retryable(&self) -> bool {
        match self {
            SurfaceError::Unavailable(_) => false,
            SurfaceError::StaleElement { .. } => true,
            SurfaceError::NotFound { .. } => true,
            SurfaceError::Script(_) => true,
        }
    }
}

impl IsRetryable for AcquisitionError {
    fn is_retryable(&self) -> bool {
        match self {
            AcquisitionError::TriggerFailed { .. } => true,
            AcquisitionError::MatchTimeout { .. } => true,
            AcquisitionError::RelocationFailed { .. } => true,
            AcquisitionError::FileLocked { .. } => true,
            // 4xx responses and similar will not change on a retry
            AcquisitionError::Fetch { .. } => false,
        }
    }
}

/// Delay before retry number `retry` (1-based): `retry * base_delay`, capped
#[must_use]
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let delay = config.base_delay.saturating_mul(retry).min(config.max_delay);
    if config.jitter {
        add_jitter(delay)
    } else {
        delay
    }
}

/// Sleep for `duration` unless `cancel` fires first
///
/// Returns [`Error::Cancelled`] when the token was (or becomes) cancelled.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), Error> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Execute an async operation with linear backoff retry logic
///
/// `operation` receives the 0-based attempt number. `on_retry` is called with
/// the retry number, the error and the chosen delay before each wait. The
/// operation is attempted at most `1 + config.max_retries` times.
///
/// Returns the successful result, the last error after all retries are
/// exhausted, or the first non-retryable error. Cancellation during a wait
/// surfaces as `E::from(Error::Cancelled)`.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display + From<Error>,
    R: FnMut(u32, &E, Duration),
{
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e)
                if e.is_retryable() && attempt < config.max_retries && !cancel.is_cancelled() =>
            {
                attempt += 1;
                let delay = backoff_delay(config, attempt);

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                on_retry(attempt, &e, delay);
                sleep_or_cancel(delay, cancel).await.map_err(E::from)?;
            }
            Err(e) => {
                if e.is_retryable() && attempt >= config.max_retries {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 50% of the delay.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=0.5);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
