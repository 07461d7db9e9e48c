//! # Conflict Retry
//!
//! Every write path of the reconciler runs inside [`RetryPolicy::run`]: the
//! attempt re-reads the current state, recomputes the mutation and writes it.
//! Only optimistic-concurrency conflicts are retried, after a fixed pause.
//! Any other failure ends the loop immediately.
//!
//! With the defaults (400 attempts, 25 ms apart) a handler gives up after
//! roughly ten seconds of continuous contention.

use crate::error::ControllerError;
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::debug;

/// Default maximum number of attempts per write.
pub const MAX_UPDATE_RETRY: u32 = 400;

/// Default pause between two attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Bounded, fixed-interval retry on write conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_UPDATE_RETRY, RETRY_INTERVAL)
    }
}

impl RetryPolicy {
    /// Create a policy. A zero attempt count is raised to one.
    #[must_use]
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Maximum number of attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause between attempts
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound of the time spent sleeping between attempts
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }

    /// Runs `attempt` until it succeeds, fails with something other than a
    /// conflict, or the attempt budget is spent.
    ///
    /// `attempt` is called once per try and must re-read whatever state it
    /// mutates; reusing a value read by an earlier try would conflict again.
    pub async fn run<'a, T, F>(&self, operation: &str, mut attempt: F) -> Result<T, ControllerError>
    where
        F: FnMut() -> BoxFuture<'a, Result<T, ControllerError>>,
    {
        for n in 1..=self.max_attempts {
            match attempt().await {
                Ok(value) => {
                    if n > 1 {
                        debug!("{} succeeded on attempt {}", operation, n);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_conflict() => {
                    debug!("{} conflicted on attempt {}/{}: {}", operation, n, self.max_attempts, e);
                    if n < self.max_attempts {
                        tokio::time::sleep(self.interval).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(ControllerError::RetriesExhausted {
            operation: operation.to_string(),
            attempts: self.max_attempts,
        })
    }
}
