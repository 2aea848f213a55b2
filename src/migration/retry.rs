//! Bounded retry with linear back-off

use crate::migration::MigrationError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Function used to wait between attempts
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Retry policy for engine calls
///
/// Attempt `k` (zero based) waits `k × unit` before running, so the first
/// attempt is immediate. Only errors for which
/// [`MigrationError::is_retryable`] holds are retried.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    unit: Duration,
    sleeper: Sleeper,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            unit: Duration::from_secs(1),
            sleeper: Arc::new(std::thread::sleep),
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    /// Replace the wait function (tests use this to avoid real sleeps)
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out
    ///
    /// `op` receives the attempt number. A `Dirty` failure following an
    /// earlier retryable failure means the earlier attempt broke the
    /// database, so that earlier error is returned instead.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T, MigrationError>
    where
        F: FnMut(u32) -> Result<T, MigrationError>,
    {
        let mut last_err: Option<MigrationError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::warn!(operation, attempt, "retrying migration operation");
                (self.sleeper)(self.unit * attempt);
            }

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::error!(operation, attempt, error = %e, "migration operation failed");
                    if !e.is_retryable() {
                        return Err(match (e, last_err) {
                            (MigrationError::Dirty { .. }, Some(root)) => root,
                            (e, _) => e,
                        });
                    }
                    last_err = Some(e);
                }
            }
        }

        tracing::error!(operation, attempts = self.max_retries + 1, "all migration retries exhausted");
        Err(last_err.unwrap_or(MigrationError::Closed))
    }
}
