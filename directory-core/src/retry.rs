//! Retry utilities for directory backend calls.
//!
//! Provides configurable retry logic with exponential backoff. Whether an error is
//! retried depends on the [`OperationClass`]: reads retry on any transient failure,
//! writes only when the server confirmed the request was not applied.

use crate::error::AppError;
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Whether an operation only observes state or mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Read,
    Write,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial backoff duration before first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff duration.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a config from the `http.max_retries` / `http.initial_backoff_ms` options.
    pub fn new(max_retries: u32, initial_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            ..Default::default()
        }
    }

    /// Create a config with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate backoff duration for a given attempt.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);

        if self.add_jitter {
            // Add up to 25% jitter
            let jitter = rand::thread_rng().gen_range(0..=backoff_ms / 4);
            duration += Duration::from_millis(jitter);
        }

        duration
    }

    /// Backoff for an attempt, stretched to honour a server-provided Retry-After.
    fn delay_for(&self, attempt: u32, err: &AppError) -> Duration {
        let backoff = self.backoff_duration(attempt);
        match err.retry_after() {
            Some(secs) => backoff.max(Duration::from_secs(secs).min(self.max_backoff)),
            None => backoff,
        }
    }
}

/// Execute a backend call with retry logic.
///
/// # Example
/// ```ignore
/// let user = retry_call(&RetryConfig::default(), "get_user", OperationClass::Read, || async {
///     client.fetch_user(&email).await
/// })
/// .await?;
/// ```
pub async fn retry_call<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    class: OperationClass,
    f: F,
) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_retryable(class) {
                    return Err(err);
                }

                if attempt >= config.max_retries {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        kind = %err.kind(),
                        message = %err.message(),
                        "Call failed after max retries"
                    );
                    return Err(err);
                }

                let backoff = config.delay_for(attempt, &err);
                warn!(
                    operation = operation_name,
                    class = class.as_str(),
                    attempt = attempt + 1,
                    kind = %err.kind(),
                    backoff_ms = backoff.as_millis() as u64,
                    "Call failed, retrying after backoff"
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
