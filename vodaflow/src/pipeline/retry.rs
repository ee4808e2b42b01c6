//! Retry utilities for outbound HTTP calls.
//!
//! Transient failures (retryable status codes, timeouts, connection errors)
//! are retried with exponential backoff. Exhaustion is returned to the
//! caller, which reports it as a normal stage-level failure.

use crate::config::RetryConfig;
use crate::errors::VodaflowError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Outcome of one attempt, as seen by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Hand the result to the caller.
    Done,
    /// Try again after a backoff.
    Retry,
}

/// Calculates the backoff before retry `attempt`, applying jitter if enabled.
#[must_use]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let delay = config.delay_for_attempt(attempt);
    if !config.jitter || delay.is_zero() {
        return delay;
    }
    let half = delay / 2;
    let extra = rand::thread_rng().gen_range(0.0..=half.as_secs_f64());
    half + Duration::from_secs_f64(extra)
}

/// Runs `op` until `classify` says the result is final or retries run out.
///
/// The last result is returned either way.
pub async fn with_retry<T, F, Fut, C>(config: &RetryConfig, mut op: F, classify: C) -> T
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    C: Fn(&T) -> RetryDecision,
{
    let mut attempt = 0;
    loop {
        let result = op(attempt).await;
        if attempt >= config.max_retries || classify(&result) == RetryDecision::Done {
            return result;
        }
        let delay = backoff_delay(config, attempt);
        debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Retrying request");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Classifies an HTTP result for [`with_retry`].
#[must_use]
pub fn classify_response(
    config: &RetryConfig,
    result: &Result<reqwest::Response, VodaflowError>,
) -> RetryDecision {
    match result {
        Ok(response) if config.should_retry_status(response.status().as_u16()) => {
            RetryDecision::Retry
        }
        Ok(_) => RetryDecision::Done,
        Err(err) if err.is_transient() => RetryDecision::Retry,
        Err(_) => RetryDecision::Done,
    }
}

/// Sends a request with the retry policy.
///
/// The request must be cloneable (no streaming body). A response whose
/// status stayed retryable after the last attempt is still returned so the
/// caller can report it.
pub async fn send_with_retry(
    config: &RetryConfig,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, VodaflowError> {
    with_retry(
        config,
        |_| {
            let attempt = request.try_clone();
            async move {
                let attempt = attempt.ok_or_else(|| {
                    VodaflowError::Internal("request cannot be retried".to_string())
                })?;
                attempt.send().await.map_err(VodaflowError::from)
            }
        },
        |result| classify_response(config, result),
    )
    .await
}
