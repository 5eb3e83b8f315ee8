use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::ErrorClass;

// ============================================================================
// Exponential Backoff Retry
// ============================================================================
//
// Retries an operation while its failures classify as transient. Fatal and
// unknown failures are returned on the first occurrence; a transient failure
// on the last attempt is returned as-is. Callers never see the retries.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Execute `operation`, retrying with exponential backoff while `classify`
/// reports the error as transient.
pub async fn retry_on_transient<F, Fut, T, E, C>(
    config: &RetryConfig,
    classify: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> ErrorClass,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                let class = classify(&error);
                if class != ErrorClass::Transient {
                    tracing::debug!(
                        error = %error,
                        class = class.as_str(),
                        "Non-transient failure, not retrying"
                    );
                    return Err(error);
                }

                if attempt >= config.max_attempts {
                    tracing::warn!(
                        attempt = attempt,
                        error = %error,
                        "Transient failure persisted after all retries"
                    );
                    return Err(error);
                }

                let delay = config.delay_after(attempt);
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying after delay"
                );

                sleep(delay).await;
            }
        }
    }
}
