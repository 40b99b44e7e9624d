// SPDX-License-Identifier: MIT
//! Exponential-backoff retry for store commits and other fallible calls.

use std::time::Duration;
use tracing::warn;

/// Retry policy: `max_attempts` total tries, delay doubling from
/// `initial_delay` up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Millisecond-scale delays for unit tests.
    pub fn instant() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }
}

/// Call `f` until it succeeds or `config.max_attempts` is exhausted,
/// sleeping between attempts. Returns the last error when all attempts fail.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_attempts => {
                warn!(attempt, max = config.max_attempts, error = %e, "attempt failed — retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(config.max_delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
