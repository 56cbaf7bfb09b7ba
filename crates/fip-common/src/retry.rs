//! Retry utilities with bounded exponential backoff.
//!
//! Every external call made during a reconciliation cycle goes through
//! [`retry_with_backoff`]. All failures are treated as retryable; once the
//! step budget is spent the last error is returned wrapped in
//! [`Error::RetriesExhausted`]. Delays between attempts observe the caller's
//! [`CancellationToken`], so losing leadership or shutting down never waits
//! out a backoff.
//!
//! # Example
//!
//! ```ignore
//! use fip_common::retry::{retry_with_backoff, Backoff};
//!
//! let servers = retry_with_backoff(&Backoff::default(), "list_servers", &cancel, || async {
//!     cloud.list_instances().await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{Error, Result};

/// Exponential backoff policy
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every failed attempt (>= 1)
    pub factor: f64,
    /// Maximum number of attempts, including the first one
    pub steps: u32,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            factor: 1.2,
            steps: 5,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based), capped at
    /// `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Execute an async operation with bounded exponential backoff.
///
/// Retries until the operation succeeds, `backoff.steps` attempts have been
/// made, or `cancel` fires. A cancelled wait returns [`Error::Cancelled`];
/// exhaustion returns [`Error::RetriesExhausted`] carrying the last error.
pub async fn retry_with_backoff<F, Fut, T>(
    backoff: &Backoff,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let steps = backoff.steps.max(1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(operation_name));
        }
        attempt += 1;

        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if attempt >= steps {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %err,
                "Operation failed after max retries"
            );
            return Err(Error::RetriesExhausted {
                operation: operation_name.to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = backoff.delay_for(attempt);
        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "Operation failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled(operation_name)),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Stretch a period by a random amount of up to `max_factor` times itself.
///
/// Used to spread out replicas polling the same resource.
pub fn jittered(period: Duration, max_factor: f64) -> Duration {
    if max_factor <= 0.0 {
        return period;
    }
    let extra = rand::thread_rng().gen_range(0.0..max_factor);
    period + Duration::from_secs_f64(period.as_secs_f64() * extra)
}
