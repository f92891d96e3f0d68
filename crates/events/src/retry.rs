//! Exponential backoff for durable log appends.

use std::future::Future;
use std::time::Duration;

use delayq_core::{Error, Result, RetryConfig};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Delay schedule derived from a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
}

impl Backoff {
    /// Create a schedule from retry settings.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total attempts, the first one included.
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.config.max_attempts.saturating_add(1)
    }

    /// Delay before `attempt` (0-indexed). The first attempt never waits.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_ms =
            self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.config.max_delay_ms as f64);

        let final_ms = if self.config.jitter {
            // up to 25%
            capped_ms * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms as u64)
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successful value, if any.
    pub value: Option<T>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Last error encountered, if the operation never succeeded.
    pub last_error: Option<Error>,
    /// Time spent, delays included.
    pub total_duration: Duration,
}

impl<T> RetryOutcome<T> {
    /// Check if the operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.value.is_some()
    }

    /// Convert to a Result, wrapping exhaustion in `Error::PersistFailed`.
    ///
    /// # Errors
    ///
    /// Returns `Error::PersistFailed` carrying the attempt count and last error.
    pub fn into_result(self) -> Result<T> {
        match (self.value, self.last_error) {
            (Some(v), _) => Ok(v),
            (None, Some(e)) => Err(Error::persist_failed(self.attempts, e.to_string())),
            (None, None) => Err(Error::persist_failed(
                self.attempts,
                "retry completed with no value and no error",
            )),
        }
    }
}

/// Run `operation` until it succeeds, a non-retryable error occurs, or
/// attempts run out, sleeping on the backoff schedule between tries.
pub async fn retry_with_backoff<T, F, Fut>(backoff: &Backoff, mut operation: F) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let total_attempts = backoff.total_attempts();
    let mut last_error = None;
    let mut attempts = 0;

    for attempt in 0..total_attempts {
        let delay = backoff.delay(attempt);
        if !delay.is_zero() {
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after delay");
            tokio::time::sleep(delay).await;
        }
        attempts = attempt + 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return RetryOutcome {
                    value: Some(value),
                    attempts,
                    last_error: None,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) => {
                let retryable = e.is_retryable();
                warn!(
                    attempt,
                    error = %e,
                    retryable,
                    remaining = total_attempts - attempt - 1,
                    "Operation failed"
                );
                last_error = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    RetryOutcome {
        value: None,
        attempts,
        last_error,
        total_duration: start.elapsed(),
    }
}
