use tokio::time::{sleep, Duration};

use crate::Result;

#[derive(Clone)]
pub struct RetryConfig {
    max_retries: u32,
    initial_delay: Duration,
}

impl RetryConfig {
    /// At least one attempt is always made; a zero retry count is treated
    /// as one.
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            initial_delay,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
        }
    }
}

/// Runs `operation` up to `max_retries` times with exponential backoff,
/// returning the last error once attempts are exhausted.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut last_error = None;
    while attempts < config.max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                last_error = Some(e);
                attempts += 1;
                if attempts < config.max_retries {
                    sleep(config.initial_delay * 2u32.pow(attempts)).await;
                }
            }
        }
    }

    Err(last_error.expect("retry loop ran at least once"))
}
