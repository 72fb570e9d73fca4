use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::errors::{GatewayError, GatewayResult};

// -----------------------------------------------------------------------------
// ----- RetryPolicy -----------------------------------------------------------

/// Bounded retry with a linear backoff schedule. A `RateLimited` error sleeps
/// the mandated wait plus `flood_margin` instead of the schedule, and consumes
/// an attempt like any other retryable failure.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub flood_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            flood_margin: Duration::from_secs(1),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RetryPolicy: Public ---------------------------------------------------

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based), for non-flood errors.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * attempt
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned verbatim.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts || !err.is_retryable() => {
                    return Err(err);
                }
                Err(GatewayError::RateLimited { wait }) => {
                    let pause = wait + self.flood_margin;
                    warn!("{what}: rate limited, sleeping {pause:?} before retry");
                    sleep(pause).await;
                }
                Err(err) => {
                    let pause = self.backoff(attempt);
                    warn!("{what}: attempt {attempt} failed ({err}), retrying in {pause:?}");
                    sleep(pause).await;
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
