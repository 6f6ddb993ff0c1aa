//! HTTP execution with retries.
//!
//! One shared, pooled `reqwest::Client` per process. The executor sends a
//! prebuilt [`ProviderRequest`], classifies failures, and retries transient
//! ones (network faults, 408, 429, 5xx) with exponential backoff, ±20 %
//! jitter, and `Retry-After` support. Cancellation aborts both backoff
//! waits and in-flight I/O; no retry follows a cancellation.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use sb_domain::config::RetryTemplate;
use sb_domain::error::{Error, Result};
use sb_translate::ProviderRequest;

/// Default per-request deadline for non-streaming calls. Streaming calls
/// pass no deadline; only the SSE inactivity window bounds them.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|error| Error::Network(error.to_string()))?;
        Ok(Self { client })
    }

    /// Send `request`, retrying per `retry`. On success the raw response is
    /// returned with its body unread, so callers can either parse JSON or
    /// consume an SSE stream.
    pub async fn execute(
        &self,
        request: &ProviderRequest,
        retry: &RetryTemplate,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let attempts = retry.max_attempts.max(1);
        let mut last_error = Error::Network("request was never attempted".into());

        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.attempt(request, timeout, cancel).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    let final_attempt = attempt + 1 >= attempts;
                    if matches!(error, Error::Cancelled) || !error.is_retriable() || final_attempt {
                        return Err(error);
                    }
                    let delay = retry_delay(retry, attempt, &error);
                    tracing::debug!(
                        url = %request.url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying provider request"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }

    async fn attempt(
        &self,
        request: &ProviderRequest,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sent = builder.send() => sent.map_err(from_reqwest)?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), message, retry_after_secs))
    }
}

/// Map a reqwest failure into the domain error kinds.
fn from_reqwest(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout(error.to_string())
    } else {
        Error::Network(error.to_string())
    }
}

fn classify_status(status: u16, message: String, retry_after_secs: Option<u64>) -> Error {
    match status {
        401 | 403 => Error::AuthFailed { status, message },
        429 => Error::RateLimited {
            retry_after_secs,
            message,
        },
        _ => Error::Http { status, message },
    }
}

/// Backoff for the attempt that just failed: `initial × 2^attempt` with
/// ±20 % jitter, capped. A `Retry-After` hint wins over the computed value
/// (also capped, so a hostile header cannot park us for minutes).
fn retry_delay(retry: &RetryTemplate, attempt: u32, error: &Error) -> Duration {
    if let Error::RateLimited {
        retry_after_secs: Some(secs),
        ..
    } = error
    {
        return Duration::from_millis(secs.saturating_mul(1_000).min(retry.max_delay_ms));
    }

    let base = retry
        .initial_delay_ms
        .saturating_mul(1u64 << attempt.min(16))
        .min(retry.max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis(((base as f64) * jitter) as u64)
}
