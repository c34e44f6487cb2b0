//! Retry utilities with exponential backoff and jitter.
//!
//! Every call the operator makes outside its own process (API server reads and
//! writes, metrics scrapes) goes through [`with_timeout`], and the transient
//! ones through [`retry_transient`]. Requeue delays for failed reconciles come
//! from a [`BackoffTracker`] so a flapping pipeline backs off independently of
//! its neighbours.
//!
//! # Example
//!
//! ```ignore
//! use conduit::retry::{retry_transient, RetryConfig};
//!
//! let data = retry_transient(&RetryConfig::default(), "read_secret", || async {
//!     reader.read(&namespace, &name).await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (always bounded; 0 is treated as 1)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Un-jittered delay before attempt `attempt + 1`, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1).min(32) as i32);
        let secs = (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

fn jittered(delay: Duration) -> Duration {
    // 0.5x to 1.5x of the delay
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries while `should_retry` accepts the error, up to `max_attempts`.
/// Returns the last error once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !should_retry(&e) {
                    return Err(e);
                }
                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = jittered(config.delay_for(attempt));
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry an operation returning [`crate::Error`], giving up immediately on
/// errors that are not [`Error::is_retryable`].
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    retry_with_backoff(config, operation_name, Error::is_retryable, operation).await
}

/// Bound an external call by a deadline.
///
/// The inner future is dropped when the deadline passes, which cancels any
/// in-flight request it owns.
pub async fn with_timeout<Fut, T>(
    limit: Duration,
    operation_name: &str,
    operation: Fut,
) -> crate::Result<T>
where
    Fut: Future<Output = crate::Result<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!(
            "{operation_name} after {}ms",
            limit.as_millis()
        ))),
    }
}

/// Per-object failure counter used to compute requeue delays.
#[derive(Debug)]
pub struct BackoffTracker {
    config: RetryConfig,
    failures: DashMap<String, u32>,
}

impl BackoffTracker {
    /// Create a tracker using the delays from `config`
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Record another failure for `key` and return how long to wait.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut entry = self.failures.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
        self.config.delay_for(*entry)
    }

    /// Forget the failure history for `key` after a successful reconcile
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Number of consecutive failures recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|v| *v).unwrap_or(0)
    }
}
