//! # Retry and Pacing
//!
//! [`RetryPolicy`] absorbs rate limiting with bounded exponential backoff.
//! [`RequestScheduler`] pairs it with the fixed pauses that keep the whole
//! run under the catalog's request quota.
//!
//! ## Backoff
//!
//! ```text
//! attempt 0 -> 429 -> sleep base
//! attempt 1 -> 429 -> sleep base * 2
//! attempt 2 -> 429 -> sleep base * 4
//! ...        after max_retries attempts: give up with `None`
//! ```
//!
//! When the catalog sends `Retry-After` and it is longer than the computed
//! delay, the longer wait is used.

use crate::catalog::CatalogError;
use crate::clock::Sleeper;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    /// Delay after the given zero-based failed attempt.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `operation` until it succeeds, fails permanently, or has been
    /// rate limited `max_retries` times.
    ///
    /// * `Ok(Some(value))` - the operation succeeded
    /// * `Ok(None)` - still rate limited after the last attempt; the caller
    ///   skips this item
    /// * `Err(error)` - any non rate-limit error, returned without retrying
    pub fn invoke<T, F>(
        &self,
        sleeper: &dyn Sleeper,
        what: &str,
        mut operation: F,
    ) -> Result<Option<T>, CatalogError>
    where
        F: FnMut() -> Result<T, CatalogError>,
    {
        for attempt in 0..self.max_retries {
            match operation() {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{what} succeeded after {} retries", attempt);
                    }
                    return Ok(Some(value));
                }
                Err(CatalogError::RateLimited { retry_after }) => {
                    let delay = self.backoff(attempt).max(retry_after.unwrap_or_default());
                    warn!(
                        "Rate limited on {what} (attempt {}/{}), retrying in {:.1}s",
                        attempt + 1,
                        self.max_retries,
                        delay.as_secs_f64()
                    );
                    sleeper.sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }

        warn!("Max retries exceeded for {what}, skipping");
        Ok(None)
    }
}

/// Fixed pauses between remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// After each per-track request.
    pub track_delay: Duration,
    /// After each batch.
    pub batch_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            track_delay: Duration::from_secs(1),
            batch_delay: Duration::from_secs(1),
        }
    }
}

impl Pacing {
    /// No pauses at all.
    pub fn none() -> Self {
        Self {
            track_delay: Duration::ZERO,
            batch_delay: Duration::ZERO,
        }
    }
}

/// Serializes every remote call of a run through one retry policy, one set
/// of pauses, and one clock.
#[derive(Clone)]
pub struct RequestScheduler {
    retry: RetryPolicy,
    pacing: Pacing,
    sleeper: Arc<dyn Sleeper>,
}

impl RequestScheduler {
    pub fn new(retry: RetryPolicy, pacing: Pacing, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { retry, pacing, sleeper }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// [`RetryPolicy::invoke`] on this scheduler's clock.
    pub fn call<T, F>(&self, what: &str, operation: F) -> Result<Option<T>, CatalogError>
    where
        F: FnMut() -> Result<T, CatalogError>,
    {
        self.retry.invoke(self.sleeper.as_ref(), what, operation)
    }

    pub fn after_track(&self) {
        self.sleeper.sleep(self.pacing.track_delay);
    }

    pub fn after_batch(&self) {
        self.sleeper.sleep(self.pacing.batch_delay);
    }
}
