//! Retry Policy
//!
//! Re-runs a network operation when it fails with a transient error.
//! Retries happen immediately; the policy only wraps the call and never
//! interprets a successful result.

use std::future::Future;
use tracing::warn;

use crate::errors::Result;

/// Retry budget for one network operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::types::DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries after the first call
    ///
    /// A budget of 3 allows up to four calls in total; 0 disables retries.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Retries allowed after the first call
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total calls this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Runs `operation`, retrying transient failures
    ///
    /// Non-transient errors are returned on first occurrence. When the budget
    /// runs out, the last transient error is returned.
    pub async fn run<F, Fut, T>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        operation = name,
                        retry = retries,
                        max_retries = self.max_retries,
                        error = %e,
                        "transient failure, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
