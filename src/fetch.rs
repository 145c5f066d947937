//! Metrics fetching over HTTP
//!
//! `MetricsFetcher` is the leaf I/O primitive: one GET with explicit connect
//! and read timeouts, every failure folded into `CheckError::Fetch`. It never
//! retries by itself — `retry_call` wraps it at the call site, so validation
//! (single-shot) and scheduled runs (retried per policy) share the primitive.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::errors::CheckError;

/// Default connect timeout for metrics endpoints.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Default read timeout for metrics endpoints.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry behavior attached to a provider instance at construction.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts (first call included).
    pub retries: u32,
    /// Delay before the first re-attempt.
    pub delay: Duration,
    /// Multiplier applied to the delay after every failed attempt.
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(1),
            backoff: 2.0,
        }
    }
}

impl RetryPolicy {
    // Delay before re-attempt number `attempt` (1-indexed): delay * backoff^(attempt-1)
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay.mul_f64(self.backoff.powi(attempt as i32 - 1))
    }
}

/// Execute an async operation with retry and multiplicative backoff.
///
/// Intermediate failures are logged at info level only; the final failure is
/// surfaced to the caller unchanged.
pub async fn retry_call<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, CheckError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CheckError>>,
{
    let attempts = policy.retries.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                let delay = policy.delay_for_attempt(attempt);
                info!(
                    attempt,
                    max = attempts,
                    delay_secs = delay.as_secs_f64(),
                    "attempt failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Leaf HTTP fetcher for metrics exposition payloads.
#[derive(Debug, Clone)]
pub struct MetricsFetcher {
    client: Client,
}

impl MetricsFetcher {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, CheckError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| CheckError::Fetch(format!("could not build http client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch the raw exposition payload from `url`.
    ///
    /// Any transport error, timeout or non-2xx status surfaces as
    /// `CheckError::Fetch`; nothing propagates past this boundary.
    pub async fn fetch(&self, url: &str) -> Result<String, CheckError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CheckError::Fetch(format!("failed to fetch {url} ({e})")))?;
        let response = response
            .error_for_status()
            .map_err(|e| CheckError::Fetch(format!("failed to fetch {url} ({e})")))?;
        response
            .text()
            .await
            .map_err(|e| CheckError::Fetch(format!("failed to read body from {url} ({e})")))
    }
}
